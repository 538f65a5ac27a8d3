//! Bounded, retried execution of host calls.
//!
//! Every attempt borrows a fresh lease through the caller's lookup, runs the
//! blocking host call on the blocking pool and waits for it under a timeout.
//! Transient failures are retried with exponential backoff; everything else
//! is reported on first occurrence.
//!
//! Timeouts are cooperative. A call that exceeds its bound is abandoned, not
//! interrupted: the host may still finish it. The attempt's lease travels
//! with the call and is released when the host returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use hostlink_protocols::types::OperationFailure;
use hostlink_protocols::{
    ErrorClassification, ErrorCode, HostError, HostHandle, HostLinkError, OperationOutcome,
    RetryPolicy,
};

use crate::classify::ClassificationTable;
use crate::lease::HandleLease;
use crate::memory::{MemoryGuard, MemoryStatus};

/// Failure of a single bounded call, made without retries.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Call failed: {0}")]
    Host(#[from] HostError),

    #[error("Call task aborted: {0}")]
    Aborted(String),
}

pub(crate) enum Attempt<T> {
    Completed(T),
    Failed(HostError),
    TimedOut,
    Aborted(String),
}

impl<T> Attempt<T> {
    pub(crate) fn into_result(self, timeout: Duration) -> Result<T, CallError> {
        match self {
            Attempt::Completed(value) => Ok(value),
            Attempt::Failed(err) => Err(CallError::Host(err)),
            Attempt::TimedOut => Err(CallError::Timeout(timeout)),
            Attempt::Aborted(reason) => Err(CallError::Aborted(reason)),
        }
    }
}

/// Runs operations against leased handles.
pub struct OperationExecutor {
    classifier: Arc<ClassificationTable>,
    memory: Arc<MemoryGuard>,
}

impl OperationExecutor {
    pub fn new(classifier: Arc<ClassificationTable>, memory: Arc<MemoryGuard>) -> Self {
        Self { classifier, memory }
    }

    pub fn classifier(&self) -> &Arc<ClassificationTable> {
        &self.classifier
    }

    pub fn memory(&self) -> &Arc<MemoryGuard> {
        &self.memory
    }

    /// Run `op` under the memory guard, a timeout per attempt and `policy`.
    ///
    /// `lookup` is called once per attempt; its failure is reported at once
    /// and never retried.
    pub async fn execute<T, L, Op>(
        &self,
        name: &str,
        lookup: L,
        op: Op,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> OperationOutcome<T>
    where
        T: Send + 'static,
        L: Fn() -> Result<HandleLease, HostLinkError>,
        Op: Fn(&dyn HostHandle) -> Result<T, HostError> + Send + Sync + 'static,
    {
        let started = Instant::now();
        let op = Arc::new(op);

        if let MemoryStatus::Refused { resident, limit } = self.memory.check() {
            warn!(
                "Refusing '{}': resident memory {} bytes exceeds limit {}",
                name, resident, limit
            );
            return OperationOutcome::failed(
                name,
                ErrorClassification::MemoryPressure,
                OperationFailure::new(
                    ErrorCode::MemoryPressure,
                    format!(
                        "Resident memory {} MiB exceeds the {} MiB limit",
                        resident / (1024 * 1024),
                        limit / (1024 * 1024)
                    ),
                ),
                None,
                0,
                elapsed_ms(started),
            );
        }

        let mut attempt: u32 = 0;
        loop {
            let lease = match lookup() {
                Ok(lease) => lease,
                Err(err) => {
                    debug!("'{}' could not acquire a handle: {}", name, err);
                    let code = err.code();
                    return OperationOutcome::failed(
                        name,
                        code.classification(),
                        OperationFailure::new(code, err.to_string()),
                        err.raw_code(),
                        attempt,
                        elapsed_ms(started),
                    );
                }
            };

            match run_bounded(lease, op.clone(), timeout).await {
                Attempt::Completed(value) => {
                    debug!("'{}' succeeded after {} retries", name, attempt);
                    return OperationOutcome::succeeded(name, value, attempt, elapsed_ms(started));
                }
                Attempt::TimedOut => {
                    warn!(
                        "'{}' timed out after {:?}; the host may still complete the call",
                        name, timeout
                    );
                    return OperationOutcome::failed(
                        name,
                        ErrorClassification::Timeout,
                        OperationFailure::new(
                            ErrorCode::Timeout,
                            format!("No response within {} ms", timeout.as_millis()),
                        ),
                        None,
                        attempt,
                        elapsed_ms(started),
                    );
                }
                Attempt::Aborted(reason) => {
                    return OperationOutcome::failed(
                        name,
                        ErrorClassification::Fatal,
                        OperationFailure::new(ErrorCode::Fatal, reason),
                        None,
                        attempt,
                        elapsed_ms(started),
                    );
                }
                Attempt::Failed(err) => {
                    if self.classifier.is_transient(err.code) && attempt < policy.max_retries {
                        let delay = policy.delay_for_attempt(attempt);
                        warn!(
                            "'{}' failed transiently (attempt {}/{}): {}, retrying in {:?}",
                            name,
                            attempt + 1,
                            policy.max_retries + 1,
                            err,
                            delay
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    let (classification, failure) = self.classifier.failure_for(&err);
                    debug!("'{}' failed ({}): {}", name, failure.code, failure.description);
                    return OperationOutcome::failed(
                        name,
                        classification,
                        failure,
                        Some(err.code),
                        attempt,
                        elapsed_ms(started),
                    );
                }
            }
        }
    }

    /// One bounded property read, no retries. Used by health checks.
    pub async fn probe(
        &self,
        lease: HandleLease,
        property: &str,
        timeout: Duration,
    ) -> Result<String, CallError> {
        read_property(lease, property, timeout).await
    }
}

/// Read `property` through `lease` under `timeout`, consuming the lease.
pub(crate) async fn read_property(
    lease: HandleLease,
    property: &str,
    timeout: Duration,
) -> Result<String, CallError> {
    let property = property.to_string();
    let read = Arc::new(move |handle: &dyn HostHandle| handle.get_property(&property));
    run_bounded(lease, read, timeout).await.into_result(timeout)
}

/// Run `op` on the blocking pool, waiting at most `timeout`.
///
/// The lease moves into the blocking task so the handle is never used after
/// release, even when the wait is abandoned.
pub(crate) async fn run_bounded<T, Op>(
    lease: HandleLease,
    op: Arc<Op>,
    timeout: Duration,
) -> Attempt<T>
where
    T: Send + 'static,
    Op: Fn(&dyn HostHandle) -> Result<T, HostError> + Send + Sync + 'static,
{
    run_blocking(timeout, move || {
        let mut lease = lease;
        let result = match lease.value() {
            Ok(handle) => op(handle.as_ref()),
            Err(released) => Err(HostError::from(released)),
        };
        lease.release();
        result
    })
    .await
}

/// Run blocking registry, host or OS work, waiting at most `timeout`.
///
/// Work abandoned on timeout keeps running and its output is dropped when it
/// finishes. Events it logs go to the caller's subscriber.
pub(crate) async fn run_blocking<T, F>(timeout: Duration, work: F) -> Attempt<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, HostError> + Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    let task = tokio::task::spawn_blocking(move || {
        tracing::dispatcher::with_default(&dispatch, work)
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => Attempt::Completed(value),
        Ok(Ok(Err(err))) => Attempt::Failed(err),
        Ok(Err(join)) => Attempt::Aborted(join.to_string()),
        Err(_) => Attempt::TimedOut,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
