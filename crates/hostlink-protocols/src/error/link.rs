//! API-level errors returned by HostLink operations.

use std::time::Duration;

use thiserror::Error;

use super::{ErrorCode, HostError};

#[derive(Debug, Clone, Error)]
pub enum HostLinkError {
    #[error("No host instance with process id {0} is registered")]
    NotFound(u32),

    #[error("Process {0} is not connected")]
    NotConnected(u32),

    /// `code` is decided by the classification table that built the error.
    #[error("Registry access failed: {source}")]
    Registry { source: HostError, code: ErrorCode },

    #[error("Lease '{0}' has already been released")]
    LeaseReleased(String),

    #[error("Host call failed: {source}")]
    Host { source: HostError, code: ErrorCode },

    #[error("{0} did not complete within {1:?}")]
    Timeout(String, Duration),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Background task aborted: {0}")]
    Aborted(String),
}

impl HostLinkError {
    pub fn registry(source: HostError, code: ErrorCode) -> Self {
        HostLinkError::Registry { source, code }
    }

    pub fn host(source: HostError, code: ErrorCode) -> Self {
        HostLinkError::Host { source, code }
    }

    /// Surfaced code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            HostLinkError::NotFound(_) => ErrorCode::NotFound,
            HostLinkError::NotConnected(_) | HostLinkError::LeaseReleased(_) => {
                ErrorCode::NotConnected
            }
            HostLinkError::Registry { code, .. } | HostLinkError::Host { code, .. } => *code,
            HostLinkError::Timeout(..) => ErrorCode::Timeout,
            HostLinkError::Unsupported(_) | HostLinkError::Aborted(_) => ErrorCode::Fatal,
        }
    }

    /// Raw protocol code, if the error came from the host.
    pub fn raw_code(&self) -> Option<i32> {
        match self {
            HostLinkError::Registry { source, .. } | HostLinkError::Host { source, .. } => {
                Some(source.code)
            }
            _ => None,
        }
    }
}
