//! # HostLink Protocols
//!
//! Shared vocabulary for the HostLink automation engine.
//! Contains only types and seam traits - no implementations.
//!
//! ## Seams
//!
//! - [`RunningObjectRegistry`] - The OS object-activation registry
//! - [`HostHandle`] - A reference-counted handle to an object inside a host process
//! - [`ProcessProbe`] - OS-level process liveness
//! - [`MemoryProbe`] - Resident memory of the controller process

pub mod error;
pub mod handle;
pub mod probe;
pub mod registry;
pub mod types;

pub use error::{ErrorCode, HostError, HostLinkError};
pub use handle::{HandleRef, HostHandle};
pub use probe::{MemoryProbe, ProcessProbe};
pub use registry::{RegistryEntry, RunningObjectRegistry};
pub use types::*;
