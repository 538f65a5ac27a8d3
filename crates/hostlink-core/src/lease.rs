//! Scoped leases over externally reference-counted resources.
//!
//! A [`Lease`] owns a value together with the function that releases it.
//! Release runs exactly once: either explicitly through [`Lease::release`]
//! or when the lease is dropped, whichever comes first. Releasing again is a
//! no-op logged at debug level.
//!
//! Leases obtained through [`Lease::child`] are independent of their parent:
//! releasing a child never touches the parent's reference.

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, trace};

use hostlink_protocols::{HandleRef, HostError, HostLinkError};

static NEXT_LEASE_ID: AtomicU64 = AtomicU64::new(1);

type Releaser<T> = Box<dyn FnOnce(T) + Send + Sync>;

/// A lease over a host handle.
pub type HandleLease = Lease<HandleRef>;

/// The lease was used after it had been released.
#[derive(Debug, Clone, Error)]
#[error("Lease '{label}' has already been released")]
pub struct LeaseReleased {
    pub label: String,
}

impl From<LeaseReleased> for HostLinkError {
    fn from(err: LeaseReleased) -> Self {
        HostLinkError::LeaseReleased(err.label)
    }
}

impl From<LeaseReleased> for HostError {
    fn from(err: LeaseReleased) -> Self {
        HostError::disconnected(err.to_string())
    }
}

/// Exactly-once release guard for a resource.
pub struct Lease<T> {
    id: u64,
    label: String,
    state: Option<(T, Releaser<T>)>,
}

impl<T> Lease<T> {
    /// Acquire a value from `factory` and arrange for `release` to run once.
    ///
    /// If the factory fails nothing was acquired and nothing is released.
    pub fn acquire<E, F, R>(label: impl Into<String>, factory: F, release: R) -> Result<Self, E>
    where
        F: FnOnce() -> Result<T, E>,
        R: FnOnce(T) + Send + Sync + 'static,
    {
        let value = factory()?;
        let lease = Self {
            id: NEXT_LEASE_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            state: Some((value, Box::new(release))),
        };
        trace!("Lease #{} acquired: {}", lease.id, lease.label);
        Ok(lease)
    }

    /// Unique id of this lease.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The leased value, or `None` once released.
    pub fn get(&self) -> Option<&T> {
        self.state.as_ref().map(|(value, _)| value)
    }

    /// The leased value, or an error once released.
    pub fn value(&self) -> Result<&T, LeaseReleased> {
        self.get().ok_or_else(|| LeaseReleased {
            label: self.label.clone(),
        })
    }

    pub fn is_released(&self) -> bool {
        self.state.is_none()
    }

    /// Release now. Idempotent.
    pub fn release(&mut self) {
        self.release_inner(true);
    }

    fn release_inner(&mut self, explicit: bool) {
        match self.state.take() {
            Some((value, release)) => {
                release(value);
                trace!("Lease #{} released: {}", self.id, self.label);
            }
            None if explicit => {
                debug!(
                    "Lease #{} ({}) already released, ignoring repeated release",
                    self.id, self.label
                );
            }
            None => {}
        }
    }

    /// Acquire a child resource reached through this lease's value.
    ///
    /// The child has its own release; it outlives or predeceases the parent
    /// independently.
    pub fn child<U, E, F, R>(
        &self,
        label: impl Into<String>,
        factory: F,
        release: R,
    ) -> Result<Lease<U>, E>
    where
        E: From<LeaseReleased>,
        F: FnOnce(&T) -> Result<U, E>,
        R: FnOnce(U) + Send + Sync + 'static,
    {
        let parent = self.value()?;
        Lease::acquire(label, || factory(parent), release)
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        self.release_inner(false);
    }
}

impl<T> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Take ownership of a reference the caller already holds.
///
/// Used for handles fresh from the registry, which arrive with one reference.
pub fn adopt_handle(label: impl Into<String>, handle: HandleRef) -> HandleLease {
    let lease = Lease::acquire(label, || Ok::<_, Infallible>(handle), |h: HandleRef| {
        h.release();
    });
    match lease {
        Ok(lease) => lease,
        Err(never) => match never {},
    }
}

/// Take an additional reference on `handle`, released with the lease.
pub fn borrow_handle(label: impl Into<String>, handle: &HandleRef) -> Result<HandleLease, HostError> {
    Lease::acquire(
        label,
        || {
            handle.add_ref()?;
            Ok(handle.clone())
        },
        |h: HandleRef| {
            h.release();
        },
    )
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
