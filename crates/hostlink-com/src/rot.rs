//! Running-object-table enumeration.

use std::ffi::c_void;
use std::sync::Arc;

use tracing::debug;
use windows::Win32::Foundation::S_OK;
use windows::Win32::System::Com::{
    CoTaskMemFree, CreateBindCtx, GetRunningObjectTable, IBindCtx, IDispatch, IMoniker,
    IRunningObjectTable,
};
use windows::core::Interface;

use hostlink_protocols::error::codes;
use hostlink_protocols::{HandleRef, HostError, RegistryEntry, RunningObjectRegistry};

use crate::apartment::ensure_apartment;
use crate::dispatch::DispatchHandle;
use crate::host_error;

/// The COM running-object table.
///
/// Holds no COM state; the table is acquired fresh on every call so it can
/// be used from any thread of the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct RotRegistry;

impl RotRegistry {
    pub fn new() -> Self {
        Self
    }

    fn open() -> Result<(IRunningObjectTable, IBindCtx), HostError> {
        ensure_apartment()?;
        let table = unsafe { GetRunningObjectTable(0) }.map_err(host_error)?;
        let context = unsafe { CreateBindCtx(0) }.map_err(host_error)?;
        Ok((table, context))
    }

    fn monikers(table: &IRunningObjectTable) -> Result<Vec<IMoniker>, HostError> {
        let enumerator = unsafe { table.EnumRunning() }.map_err(host_error)?;
        let mut monikers = Vec::new();
        loop {
            let mut slot = [None];
            let mut fetched = 0u32;
            let hr = unsafe { enumerator.Next(&mut slot, Some(&mut fetched as *mut u32)) };
            if hr != S_OK || fetched == 0 {
                break;
            }
            if let Some(moniker) = slot[0].take() {
                monikers.push(moniker);
            }
        }
        Ok(monikers)
    }

    fn display_name(moniker: &IMoniker, context: &IBindCtx) -> Result<String, HostError> {
        let name = unsafe { moniker.GetDisplayName(context, None::<&IMoniker>) }.map_err(host_error)?;
        let text = unsafe { name.to_string() }.map_err(|e| HostError::failed(e.to_string()));
        unsafe { CoTaskMemFree(Some(name.0 as *const c_void)) };
        text
    }
}

impl RunningObjectRegistry for RotRegistry {
    fn entries(&self) -> Result<Vec<Result<RegistryEntry, HostError>>, HostError> {
        let (table, context) = Self::open()?;
        let entries = Self::monikers(&table)?
            .iter()
            .map(|moniker| Self::display_name(moniker, &context).map(RegistryEntry::new))
            .collect();
        Ok(entries)
    }

    fn bind(&self, entry: &RegistryEntry) -> Result<HandleRef, HostError> {
        let (table, context) = Self::open()?;
        for moniker in Self::monikers(&table)? {
            match Self::display_name(&moniker, &context) {
                Ok(name) if name == entry.display_name => {
                    let object = unsafe { table.GetObject(&moniker) }.map_err(host_error)?;
                    let dispatch: IDispatch = object.cast().map_err(host_error)?;
                    debug!("Bound running object {}", entry.display_name);
                    return Ok(Arc::new(DispatchHandle::new(dispatch)));
                }
                _ => continue,
            }
        }
        Err(HostError::new(
            codes::MK_E_UNAVAILABLE,
            format!("{} is no longer in the running object table", entry.display_name),
        ))
    }
}
