//! COM apartment membership.

use std::cell::Cell;

use tracing::trace;
use windows::Win32::System::Com::{COINIT_MULTITHREADED, CoInitializeEx, CoUninitialize};

use hostlink_protocols::HostError;

use crate::host_error;

thread_local! {
    static JOINED: Cell<bool> = const { Cell::new(false) };
}

/// Join the multithreaded apartment on the current thread, once.
///
/// Threads of the blocking pool are joined lazily and stay joined.
pub fn ensure_apartment() -> Result<(), HostError> {
    if JOINED.with(Cell::get) {
        return Ok(());
    }
    unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
        .ok()
        .map_err(host_error)?;
    JOINED.with(|joined| joined.set(true));
    trace!("Joined COM multithreaded apartment");
    Ok(())
}

/// Apartment membership for the lifetime of the guard.
pub struct ComApartment {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ComApartment {
    pub fn enter() -> Result<Self, HostError> {
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .ok()
            .map_err(host_error)?;
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}
