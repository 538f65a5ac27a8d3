//! OS-level probes.

use chrono::{DateTime, Utc};

/// Process table queries.
pub trait ProcessProbe: Send + Sync {
    /// Whether a process with this id currently exists.
    fn is_alive(&self, pid: u32) -> bool;

    /// When the process started, if known.
    fn start_time(&self, pid: u32) -> Option<DateTime<Utc>>;
}

/// Resident memory of the controller process.
pub trait MemoryProbe: Send + Sync {
    /// Resident working set in bytes, if it can be read.
    fn resident_bytes(&self) -> Option<u64>;
}
