//! `IDispatch` automation handles.

use parking_lot::Mutex;
use windows::Win32::System::Com::{
    DISPATCH_FLAGS, DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPPARAMS, IDispatch,
};
use windows::core::{BSTR, GUID, HSTRING, PCWSTR, VARIANT};

use hostlink_protocols::{HostError, HostHandle};

use crate::apartment::ensure_apartment;
use crate::host_error;

const LOCALE_USER_DEFAULT: u32 = 0x0400;

/// An automation object inside the host process.
///
/// Each reference is a live interface pointer: `add_ref` clones the
/// interface, `release` drops one clone.
pub struct DispatchHandle {
    refs: Mutex<Vec<IDispatch>>,
}

// Interface pointers obtained in the multithreaded apartment may be used
// from any thread that has joined it; every call joins first.
unsafe impl Send for DispatchHandle {}
unsafe impl Sync for DispatchHandle {}

impl DispatchHandle {
    /// Wrap a freshly bound object. The handle owns its one reference.
    pub fn new(dispatch: IDispatch) -> Self {
        Self {
            refs: Mutex::new(vec![dispatch]),
        }
    }

    fn current(&self) -> Result<IDispatch, HostError> {
        self.refs
            .lock()
            .last()
            .cloned()
            .ok_or_else(|| HostError::disconnected("automation object has been released"))
    }
}

fn dispid(object: &IDispatch, name: &str) -> Result<i32, HostError> {
    let wide = HSTRING::from(name);
    let names = [PCWSTR(wide.as_ptr())];
    let mut id = 0i32;
    unsafe {
        object.GetIDsOfNames(
            &GUID::zeroed(),
            names.as_ptr(),
            1,
            LOCALE_USER_DEFAULT,
            &mut id,
        )
    }
    .map_err(host_error)?;
    Ok(id)
}

fn invoke(
    object: &IDispatch,
    name: &str,
    flags: DISPATCH_FLAGS,
    args: &mut [VARIANT],
) -> Result<VARIANT, HostError> {
    let id = dispid(object, name)?;
    let params = DISPPARAMS {
        rgvarg: if args.is_empty() {
            std::ptr::null_mut()
        } else {
            args.as_mut_ptr()
        },
        rgdispidNamedArgs: std::ptr::null_mut(),
        cArgs: args.len() as u32,
        cNamedArgs: 0,
    };
    let mut result = VARIANT::default();
    unsafe {
        object.Invoke(
            id,
            &GUID::zeroed(),
            LOCALE_USER_DEFAULT,
            flags,
            &params,
            Some(&mut result as *mut VARIANT),
            None,
            None,
        )
    }
    .map_err(host_error)?;
    Ok(result)
}

impl HostHandle for DispatchHandle {
    fn add_ref(&self) -> Result<u32, HostError> {
        let mut refs = self.refs.lock();
        let next = refs
            .last()
            .cloned()
            .ok_or_else(|| HostError::disconnected("automation object has been released"))?;
        refs.push(next);
        Ok(refs.len() as u32)
    }

    fn release(&self) -> u32 {
        let mut refs = self.refs.lock();
        refs.pop();
        refs.len() as u32
    }

    fn get_property(&self, path: &str) -> Result<String, HostError> {
        ensure_apartment()?;
        let mut object = self.current()?;
        let mut segments = path.split('.').peekable();

        while let Some(segment) = segments.next() {
            let value = invoke(&object, segment, DISPATCH_PROPERTYGET, &mut [])?;
            if segments.peek().is_none() {
                if value.is_empty() {
                    return Ok(String::new());
                }
                let text = BSTR::try_from(&value).map_err(host_error)?;
                return Ok(text.to_string());
            }
            object = IDispatch::try_from(&value).map_err(host_error)?;
        }
        Err(HostError::failed(format!("empty property path '{}'", path)))
    }

    fn execute_command(&self, command: &str, args: &str) -> Result<(), HostError> {
        ensure_apartment()?;
        let object = self.current()?;
        // Arguments are passed right to left.
        let mut params = [
            VARIANT::from(BSTR::from(args)),
            VARIANT::from(BSTR::from(command)),
        ];
        invoke(&object, "ExecuteCommand", DISPATCH_METHOD, &mut params)?;
        Ok(())
    }
}
