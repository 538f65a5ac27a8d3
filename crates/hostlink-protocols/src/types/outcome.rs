//! Operation outcomes.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Classification of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// The operation succeeded.
    None,
    /// Expected to succeed if retried after a delay.
    Transient,
    /// Everything not classified otherwise.
    Fatal,
    /// The bounded wait elapsed.
    Timeout,
    /// Permission failure.
    AccessDenied,
    /// The controller's memory guard refused the call.
    MemoryPressure,
    /// Registry entry, process or connection absent.
    NotFound,
}

/// Structured description of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub code: ErrorCode,
    pub description: String,
    pub retryable: bool,
}

impl OperationFailure {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            retryable: code.retryable(),
        }
    }
}

/// Result of one `execute` call. Built once, read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome<T = ()> {
    operation: String,
    success: bool,
    classification: ErrorClassification,
    retry_attempts: u32,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<OperationFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<T>,
}

impl<T> OperationOutcome<T> {
    pub fn succeeded(
        operation: impl Into<String>,
        value: T,
        retry_attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            operation: operation.into(),
            success: true,
            classification: ErrorClassification::None,
            retry_attempts,
            duration_ms,
            raw_code: None,
            failure: None,
            value: Some(value),
        }
    }

    pub fn failed(
        operation: impl Into<String>,
        classification: ErrorClassification,
        failure: OperationFailure,
        raw_code: Option<i32>,
        retry_attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            operation: operation.into(),
            success: false,
            classification,
            retry_attempts,
            duration_ms,
            raw_code,
            failure: Some(failure),
            value: None,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn classification(&self) -> ErrorClassification {
        self.classification
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn raw_code(&self) -> Option<i32> {
        self.raw_code
    }

    pub fn failure(&self) -> Option<&OperationFailure> {
        self.failure.as_ref()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.failure.as_ref().map(|f| f.code)
    }

    /// Whether trying the same request again later is sensible.
    pub fn retryable(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.retryable)
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Drop the value, keeping the rest of the outcome.
    pub fn discard_value(self) -> OperationOutcome<()> {
        OperationOutcome {
            operation: self.operation,
            success: self.success,
            classification: self.classification,
            retry_attempts: self.retry_attempts,
            duration_ms: self.duration_ms,
            raw_code: self.raw_code,
            failure: self.failure,
            value: self.value.map(|_| ()),
        }
    }
}

#[cfg(test)]
#[path = "outcome_tests.rs"]
mod tests;
