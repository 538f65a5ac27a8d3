//! Error types for the HostLink protocol layer.

mod code;
mod host;
mod link;

pub use code::*;
pub use host::*;
pub use link::*;
