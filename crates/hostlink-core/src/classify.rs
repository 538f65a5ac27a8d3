//! Central classification of raw host error codes.
//!
//! Every decision about whether a host failure is retried, and what it is
//! reported as, is made here.

use std::collections::HashMap;

use hostlink_config::ClassificationConfig;
use hostlink_protocols::error::codes;
use hostlink_protocols::types::OperationFailure;
use hostlink_protocols::{ErrorClassification, ErrorCode, HostError, HostLinkError};

use crate::executor::CallError;

/// Static table of known codes.
const KNOWN_CODES: &[(i32, ErrorClassification, &str)] = &[
    (
        codes::RPC_E_CALL_REJECTED,
        ErrorClassification::Transient,
        "The host rejected the call because it is busy",
    ),
    (
        codes::RPC_E_SERVERCALL_RETRYLATER,
        ErrorClassification::Transient,
        "The host asked the caller to retry later",
    ),
    (
        codes::RPC_E_TIMEOUT,
        ErrorClassification::Transient,
        "The remote procedure call timed out",
    ),
    (
        codes::CO_E_SERVER_EXEC_FAILURE,
        ErrorClassification::Transient,
        "The host process failed to start serving the object",
    ),
    (
        codes::RPC_E_DISCONNECTED,
        ErrorClassification::NotFound,
        "The host object disconnected from its clients",
    ),
    (
        codes::RPC_E_SERVER_DIED,
        ErrorClassification::NotFound,
        "The host process exited during the call",
    ),
    (
        codes::RPC_E_SERVER_DIED_DNE,
        ErrorClassification::NotFound,
        "The host process exited before the call was dispatched",
    ),
    (
        codes::RPC_S_SERVER_UNAVAILABLE,
        ErrorClassification::NotFound,
        "The host process is unavailable",
    ),
    (
        codes::MK_E_UNAVAILABLE,
        ErrorClassification::NotFound,
        "The object is no longer registered",
    ),
    (
        codes::E_ACCESSDENIED,
        ErrorClassification::AccessDenied,
        "Access to the host object was denied",
    ),
    (
        codes::E_OUTOFMEMORY,
        ErrorClassification::MemoryPressure,
        "The call ran out of memory",
    ),
    (
        codes::E_FAIL,
        ErrorClassification::Fatal,
        "The host reported an unspecified failure",
    ),
    (
        codes::E_NOINTERFACE,
        ErrorClassification::Fatal,
        "The host object does not support the requested interface",
    ),
    (
        codes::DISP_E_UNKNOWNNAME,
        ErrorClassification::Fatal,
        "The host object has no member with that name",
    ),
    (
        codes::DISP_E_EXCEPTION,
        ErrorClassification::Fatal,
        "The host raised an exception while running the call",
    ),
    (
        codes::DISP_E_TYPEMISMATCH,
        ErrorClassification::Fatal,
        "An argument or return value had an unexpected type",
    ),
];

const UNRECOGNIZED: &str = "The host reported an unrecognized failure";
const CONFIGURED_TRANSIENT: &str = "Configured as a transient host failure";

/// Result of classifying a raw code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub classification: ErrorClassification,
    pub description: String,
}

/// Lookup table from raw code to classification.
#[derive(Debug, Clone)]
pub struct ClassificationTable {
    entries: HashMap<i32, (ErrorClassification, String)>,
}

impl ClassificationTable {
    /// Table with the built-in codes. `E_FAIL` is fatal.
    pub fn new() -> Self {
        let entries = KNOWN_CODES
            .iter()
            .map(|(code, classification, description)| {
                (*code, (*classification, description.to_string()))
            })
            .collect();
        Self { entries }
    }

    pub fn from_config(config: &ClassificationConfig) -> Self {
        let mut table = Self::new();
        if config.general_failure_is_transient {
            table.mark_transient(codes::E_FAIL);
        }
        for code in &config.extra_transient_codes {
            table.mark_transient(*code as i32);
        }
        table
    }

    /// Add `code` to the transient allowlist.
    pub fn mark_transient(&mut self, code: i32) {
        self.entries
            .entry(code)
            .and_modify(|(classification, _)| *classification = ErrorClassification::Transient)
            .or_insert_with(|| {
                (
                    ErrorClassification::Transient,
                    CONFIGURED_TRANSIENT.to_string(),
                )
            });
    }

    pub fn classify(&self, code: i32) -> Classified {
        match self.entries.get(&code) {
            Some((classification, description)) => Classified {
                classification: *classification,
                description: description.clone(),
            },
            None => Classified {
                classification: ErrorClassification::Fatal,
                description: UNRECOGNIZED.to_string(),
            },
        }
    }

    pub fn is_transient(&self, code: i32) -> bool {
        self.classify(code).classification == ErrorClassification::Transient
    }

    /// Structured failure for a host error whose retries, if any, are spent.
    pub fn failure_for(&self, error: &HostError) -> (ErrorClassification, OperationFailure) {
        let classified = self.classify(error.code);
        let description = if error.message.is_empty() {
            format!("{} ({})", classified.description, error.code_hex())
        } else {
            format!(
                "{} ({}): {}",
                classified.description,
                error.code_hex(),
                error.message
            )
        };
        let code = ErrorCode::from_classification(classified.classification);
        (classified.classification, OperationFailure::new(code, description))
    }
}

impl ClassificationTable {
    /// Surfaced code for a host error reported as-is, without retries.
    pub fn code_for(&self, error: &HostError) -> ErrorCode {
        ErrorCode::from_classification(self.classify(error.code).classification)
    }

    /// API error for a failed registry call.
    pub fn registry_error(&self, error: CallError) -> HostLinkError {
        match error {
            CallError::Host(source) => {
                let code = self.code_for(&source);
                HostLinkError::registry(source, code)
            }
            CallError::Timeout(after) => HostLinkError::Timeout("Registry access".to_string(), after),
            CallError::Aborted(reason) => HostLinkError::Aborted(reason),
        }
    }

    /// API error for a failed call into a host object.
    pub fn host_error(&self, operation: &str, error: CallError) -> HostLinkError {
        match error {
            CallError::Host(source) => {
                let code = self.code_for(&source);
                HostLinkError::host(source, code)
            }
            CallError::Timeout(after) => HostLinkError::Timeout(operation.to_string(), after),
            CallError::Aborted(reason) => HostLinkError::Aborted(reason),
        }
    }
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_codes_are_transient() {
        let table = ClassificationTable::new();
        assert!(table.is_transient(codes::RPC_E_CALL_REJECTED));
        assert!(table.is_transient(codes::RPC_E_SERVERCALL_RETRYLATER));
    }

    #[test]
    fn test_general_failure_is_fatal_by_default() {
        let table = ClassificationTable::new();
        assert!(!table.is_transient(codes::E_FAIL));
        assert_eq!(
            table.classify(codes::E_FAIL).classification,
            ErrorClassification::Fatal
        );
    }

    #[test]
    fn test_general_failure_opt_in() {
        let config = ClassificationConfig {
            general_failure_is_transient: true,
            extra_transient_codes: Vec::new(),
        };
        let table = ClassificationTable::from_config(&config);
        assert!(table.is_transient(codes::E_FAIL));
    }

    #[test]
    fn test_extra_transient_codes() {
        let config = ClassificationConfig {
            general_failure_is_transient: false,
            extra_transient_codes: vec![0x8000_FFFF],
        };
        let table = ClassificationTable::from_config(&config);
        let classified = table.classify(0x8000_FFFF_u32 as i32);
        assert_eq!(classified.classification, ErrorClassification::Transient);
        assert_eq!(classified.description, CONFIGURED_TRANSIENT);
    }

    #[test]
    fn test_unknown_code_is_fatal() {
        let table = ClassificationTable::new();
        let classified = table.classify(0x1234);
        assert_eq!(classified.classification, ErrorClassification::Fatal);
        assert_eq!(classified.description, UNRECOGNIZED);
    }

    #[test]
    fn test_failure_for_access_denied() {
        let table = ClassificationTable::new();
        let (classification, failure) =
            table.failure_for(&HostError::new(codes::E_ACCESSDENIED, "elevated host"));
        assert_eq!(classification, ErrorClassification::AccessDenied);
        assert_eq!(failure.code, ErrorCode::AccessDenied);
        assert!(!failure.retryable);
        assert!(failure.description.contains("0x80070005"));
        assert!(failure.description.contains("elevated host"));
    }

    #[test]
    fn test_failure_for_exhausted_transient() {
        let table = ClassificationTable::new();
        let (_, failure) = table.failure_for(&HostError::new(codes::RPC_E_CALL_REJECTED, ""));
        assert_eq!(failure.code, ErrorCode::TransientRetryExhausted);
        assert!(failure.retryable);
    }

    #[test]
    fn test_registry_access_denied_is_classified() {
        let table = ClassificationTable::new();
        let err = table.registry_error(CallError::Host(HostError::new(
            codes::E_ACCESSDENIED,
            "no table",
        )));
        assert!(matches!(err, HostLinkError::Registry { .. }));
        assert_eq!(err.code(), ErrorCode::AccessDenied);
        assert_eq!(err.raw_code(), Some(codes::E_ACCESSDENIED));
    }

    #[test]
    fn test_busy_host_error_is_retryable() {
        let table = ClassificationTable::new();
        let err = table.host_error(
            "Bind",
            CallError::Host(HostError::new(codes::RPC_E_CALL_REJECTED, "busy")),
        );
        assert_eq!(err.code(), ErrorCode::TransientRetryExhausted);
        assert!(err.code().retryable());
    }

    #[test]
    fn test_timed_out_call_is_timeout() {
        let table = ClassificationTable::new();
        let err = table.host_error("Bind", CallError::Timeout(std::time::Duration::from_secs(1)));
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(err.to_string().starts_with("Bind"));
    }

    #[test]
    fn test_unknown_code_for_is_fatal() {
        let table = ClassificationTable::new();
        assert_eq!(table.code_for(&HostError::new(0x1234, "odd")), ErrorCode::Fatal);
    }

    #[test]
    fn test_server_died_is_not_found() {
        let table = ClassificationTable::new();
        assert_eq!(
            table.classify(codes::RPC_S_SERVER_UNAVAILABLE).classification,
            ErrorClassification::NotFound
        );
    }
}
