//! Handles to objects living inside a host process.

use std::sync::Arc;

use crate::error::HostError;

/// Shared handle type stored in the connection table.
pub type HandleRef = Arc<dyn HostHandle>;

/// A reference-counted handle to an object owned by a host process.
///
/// A handle returned by [`RunningObjectRegistry::bind`](crate::RunningObjectRegistry::bind)
/// carries one reference owned by the caller. Every successful `add_ref`
/// must be balanced by exactly one `release`. Once the count reaches zero
/// every call fails with a disconnected error.
///
/// Calls are blocking; callers run them off the async executor.
pub trait HostHandle: Send + Sync {
    /// Take one more reference. Returns the new count.
    fn add_ref(&self) -> Result<u32, HostError>;

    /// Drop one reference. Returns the remaining count.
    fn release(&self) -> u32;

    /// Read a property, following a dotted path (`Solution.FullName`).
    fn get_property(&self, path: &str) -> Result<String, HostError>;

    /// Run a named host command with a free-form argument string.
    fn execute_command(&self, command: &str, args: &str) -> Result<(), HostError>;
}
