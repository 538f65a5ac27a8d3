//! Raw failures reported by the external host protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known raw codes returned by the object-activation protocol.
///
/// Values are HRESULTs reinterpreted as `i32`.
pub mod codes {
    /// Unspecified failure.
    pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;
    /// General access denied error.
    pub const E_ACCESSDENIED: i32 = 0x8007_0005_u32 as i32;
    /// Ran out of memory.
    pub const E_OUTOFMEMORY: i32 = 0x8007_000E_u32 as i32;
    /// No such interface supported.
    pub const E_NOINTERFACE: i32 = 0x8000_4002_u32 as i32;
    /// Call was rejected by callee (host is busy).
    pub const RPC_E_CALL_REJECTED: i32 = 0x8001_0001_u32 as i32;
    /// The callee is busy, retry later.
    pub const RPC_E_SERVERCALL_RETRYLATER: i32 = 0x8001_010A_u32 as i32;
    /// The object invoked has disconnected from its clients.
    pub const RPC_E_DISCONNECTED: i32 = 0x8001_0108_u32 as i32;
    /// The server process died.
    pub const RPC_E_SERVER_DIED: i32 = 0x8001_0007_u32 as i32;
    /// The server process died before the call was dispatched.
    pub const RPC_E_SERVER_DIED_DNE: i32 = 0x8001_0012_u32 as i32;
    /// The RPC server is unavailable.
    pub const RPC_S_SERVER_UNAVAILABLE: i32 = 0x8007_06BA_u32 as i32;
    /// The remote call timed out.
    pub const RPC_E_TIMEOUT: i32 = 0x8001_011F_u32 as i32;
    /// Server execution failed.
    pub const CO_E_SERVER_EXEC_FAILURE: i32 = 0x8008_0005_u32 as i32;
    /// The moniker's object is not in the running-object table.
    pub const MK_E_UNAVAILABLE: i32 = 0x8004_01E3_u32 as i32;
    /// Unknown member name.
    pub const DISP_E_UNKNOWNNAME: i32 = 0x8002_0006_u32 as i32;
    /// The member raised an exception.
    pub const DISP_E_EXCEPTION: i32 = 0x8002_0009_u32 as i32;
    /// Type mismatch in an argument or return value.
    pub const DISP_E_TYPEMISMATCH: i32 = 0x8002_0005_u32 as i32;
}

/// A failure reported by a call into the host or the registry.
///
/// `code` is the opaque protocol code; classification happens in one place,
/// the core's classification table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    pub code: i32,
    pub message: String,
}

impl HostError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The object behind a handle has been released or disconnected.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(codes::RPC_E_DISCONNECTED, message)
    }

    /// Unspecified failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(codes::E_FAIL, message)
    }

    /// The code formatted as an unsigned hexadecimal HRESULT.
    pub fn code_hex(&self) -> String {
        format!("0x{:08X}", self.code as u32)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host call failed ({}): {}", self.code_hex(), self.message)
    }
}

impl std::error::Error for HostError {}
