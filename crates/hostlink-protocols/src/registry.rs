//! The OS object-activation registry.

use crate::error::HostError;
use crate::handle::HandleRef;

/// One entry of the registry, identified by its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub display_name: String,
}

impl RegistryEntry {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
        }
    }
}

/// Access to the registry of running, cross-process objects.
pub trait RunningObjectRegistry: Send + Sync {
    /// Enumerate every entry.
    ///
    /// The outer error means the registry itself could not be reached.
    /// Inner errors are entries whose display name could not be read.
    fn entries(&self) -> Result<Vec<Result<RegistryEntry, HostError>>, HostError>;

    /// Bind the object registered under `entry`.
    ///
    /// The returned handle carries one reference owned by the caller.
    fn bind(&self, entry: &RegistryEntry) -> Result<HandleRef, HostError>;
}
