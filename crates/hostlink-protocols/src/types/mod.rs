//! Core data types.

mod instance;
mod outcome;
mod retry;

pub use instance::*;
pub use outcome::*;
pub use retry::*;
