//! Discovered host instances and their connection state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Active solution name reported when none is open or it cannot be read.
pub const NO_SOLUTION: &str = "none";

/// Connection state of a host instance.
///
/// `Unknown -> Connecting -> Connected`, then one of the terminal states.
/// `Connected -> Connected` is the health-check self transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unknown,
    Connecting,
    Connected,
    /// Probe or call failure. Terminal.
    Failed,
    /// Probe timed out. Terminal.
    Timeout,
    /// Explicit disconnect. Terminal.
    Disconnected,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Failed | ConnectionState::Timeout | ConnectionState::Disconnected
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Failed, Timeout, Unknown};

        match (self, next) {
            (Unknown, Connecting) => true,
            (Connecting, Connected) | (Connecting, Failed) | (Connecting, Timeout) => true,
            (Connected, Connected | Failed | Timeout | Disconnected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unknown => write!(f, "unknown"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Timeout => write!(f, "timeout"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A running host process reachable through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalInstance {
    /// Owning process id. Unique per instance.
    pub process_id: u32,
    /// Host version, taken from the registry display name.
    pub version: String,
    /// Full name of the open solution, or [`NO_SOLUTION`].
    pub active_solution: String,
    /// Process start time.
    pub start_time: DateTime<Utc>,
    /// Current connection state.
    pub status: ConnectionState,
}

impl ExternalInstance {
    pub fn new(process_id: u32, version: impl Into<String>) -> Self {
        Self {
            process_id,
            version: version.into(),
            active_solution: NO_SOLUTION.to_string(),
            start_time: Utc::now(),
            status: ConnectionState::Unknown,
        }
    }

    pub fn with_active_solution(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.active_solution = if name.trim().is_empty() {
            NO_SOLUTION.to_string()
        } else {
            name
        };
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_status(mut self, status: ConnectionState) -> Self {
        self.status = status;
        self
    }

    pub fn has_solution(&self) -> bool {
        self.active_solution != NO_SOLUTION
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
