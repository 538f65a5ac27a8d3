//! Error codes surfaced to collaborators.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ErrorClassification;

/// Stable error code attached to every failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The host process is not present in the registry.
    NotFound,
    /// The process id has no entry in the connection table.
    NotConnected,
    /// The bounded wait elapsed before the call completed.
    Timeout,
    /// A transient failure persisted past the retry budget.
    TransientRetryExhausted,
    /// The host refused the call for permission reasons.
    AccessDenied,
    /// The controller is under memory pressure.
    MemoryPressure,
    /// Anything else.
    Fatal,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::TransientRetryExhausted => "TRANSIENT_RETRY_EXHAUSTED",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::MemoryPressure => "MEMORY_PRESSURE",
            ErrorCode::Fatal => "FATAL",
        }
    }

    /// Whether retrying the same request later is sensible.
    pub fn retryable(&self) -> bool {
        match self {
            ErrorCode::NotFound
            | ErrorCode::NotConnected
            | ErrorCode::Timeout
            | ErrorCode::TransientRetryExhausted
            | ErrorCode::MemoryPressure => true,
            ErrorCode::AccessDenied | ErrorCode::Fatal => false,
        }
    }

    /// Classification reported alongside this code.
    pub fn classification(&self) -> ErrorClassification {
        match self {
            ErrorCode::NotFound | ErrorCode::NotConnected => ErrorClassification::NotFound,
            ErrorCode::Timeout => ErrorClassification::Timeout,
            ErrorCode::TransientRetryExhausted => ErrorClassification::Transient,
            ErrorCode::AccessDenied => ErrorClassification::AccessDenied,
            ErrorCode::MemoryPressure => ErrorClassification::MemoryPressure,
            ErrorCode::Fatal => ErrorClassification::Fatal,
        }
    }

    /// Code surfaced for a final classification.
    pub fn from_classification(classification: ErrorClassification) -> Self {
        match classification {
            ErrorClassification::Transient => ErrorCode::TransientRetryExhausted,
            ErrorClassification::Timeout => ErrorCode::Timeout,
            ErrorClassification::AccessDenied => ErrorCode::AccessDenied,
            ErrorClassification::MemoryPressure => ErrorCode::MemoryPressure,
            ErrorClassification::NotFound => ErrorCode::NotFound,
            ErrorClassification::None | ErrorClassification::Fatal => ErrorCode::Fatal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
