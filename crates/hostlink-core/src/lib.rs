//! # HostLink Core
//!
//! Connection lifecycle and resilient execution engine for automating a
//! long-running host application through the OS object-activation registry.
//!
//! ## Components
//!
//! - [`Lease`] - Scoped acquire/release with exactly-once release
//! - [`RegistryScanner`] - Discovers host instances in the registry
//! - [`ConnectionManager`] - Owns the table of live connections
//! - [`HealthMonitor`] - Interval-driven probing and eviction
//! - [`OperationExecutor`] - Timeout, retry and memory-pressure policy for calls
//! - [`HostLink`] - The facade exposed to collaborators
//!
//! ## Cancellation
//!
//! Timeouts are cooperative. When a call exceeds its bound the caller stops
//! waiting and gets a `TIMEOUT` outcome, but the call already dispatched to the
//! host is not interrupted and may still complete on the host side.

pub mod classify;
pub mod connection;
pub mod executor;
pub mod health;
pub mod host;
pub mod lease;
pub mod locks;
pub mod memory;
pub mod process;
pub mod scanner;
pub mod testing;

pub use classify::{Classified, ClassificationTable};
pub use connection::ConnectionManager;
pub use executor::{CallError, OperationExecutor};
pub use health::{Eviction, HealthMonitor, HealthReport, MonitorHandle, ProbeVerdict};
pub use host::{HostLink, HostLinkBuilder};
pub use lease::{HandleLease, Lease, LeaseReleased, adopt_handle, borrow_handle};
pub use locks::PidLocks;
pub use memory::{CleanupHook, MemoryGuard, MemoryStatus};
pub use process::{SystemMemoryProbe, SystemProcessProbe};
pub use scanner::{Candidate, RegistryScanner, ScanReport, SkippedEntry};
