//! # HostLink COM
//!
//! Object-activation registry backend for Windows: host instances are found
//! in the COM running-object table and driven through `IDispatch`.
//!
//! On other platforms the crate is empty.

#[cfg(windows)]
mod apartment;
#[cfg(windows)]
mod dispatch;
#[cfg(windows)]
mod rot;

#[cfg(windows)]
pub use apartment::{ComApartment, ensure_apartment};
#[cfg(windows)]
pub use dispatch::DispatchHandle;
#[cfg(windows)]
pub use rot::RotRegistry;

#[cfg(windows)]
fn host_error(err: windows::core::Error) -> hostlink_protocols::HostError {
    hostlink_protocols::HostError::new(err.code().0, err.message())
}
