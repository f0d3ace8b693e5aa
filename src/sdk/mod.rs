//! Native TokenX Connect SDK surface.
//!
//! [`PosSdk`] is the seam between the bridge and the vendor library: one
//! method per SDK entry point, native types only (C text in, C text out,
//! `extern "C"` callback pointers). [`linked::LinkedSdk`] binds the real
//! library; [`simulated::SimulatedSdk`] emulates a device in-process.

#[cfg(feature = "linked-sdk")]
pub mod linked;
pub mod simulated;

use std::ffi::{c_char, c_int, c_void, CStr};
use std::fmt;

// ---------------------------------------------------------------------------
// Native types
// ---------------------------------------------------------------------------

/// Serial-input callback as installed with the SDK: `(tag, payload)`.
pub type SerialInCallback = extern "C" fn(tag: c_int, payload: *const c_char);

/// Device-state callback as installed with the SDK: `(connected, device_id)`.
pub type DeviceStateCallback = extern "C" fn(connected: bool, device_id: *const c_char);

/// Opaque native connection, exclusively owned by the SDK.
///
/// The bridge only routes calls with it; it never dereferences it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawConnection(usize);

impl RawConnection {
    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawConnection({:#x})", self.0)
    }
}

/// Device reported by `getActiveDeviceIndex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveDevice {
    /// Index 0.
    X30tr,
    /// Index 1.
    Tr300,
    /// Any negative index.
    None,
}

impl ActiveDevice {
    /// Name the raw discriminator. Unknown non-negative values are kept
    /// opaque by callers that need them; here they read as `None`.
    pub fn from_index(index: i32) -> Self {
        match index {
            0 => ActiveDevice::X30tr,
            1 => ActiveDevice::Tr300,
            _ => ActiveDevice::None,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            ActiveDevice::X30tr => 0,
            ActiveDevice::Tr300 => 1,
            ActiveDevice::None => -1,
        }
    }
}

// ---------------------------------------------------------------------------
// SDK trait
// ---------------------------------------------------------------------------

/// Native SDK entry points.
///
/// Implementations must be callable from any thread. Callbacks handed to
/// `set_*_callback` may be invoked on SDK-owned threads, concurrently, until
/// the connection is deleted or the callback is replaced.
pub trait PosSdk: Send + Sync {
    /// SDK name (for logging).
    fn name(&self) -> &str;

    fn create_communication(&self, company_name: &CStr) -> RawConnection;

    /// Release every native resource tied to `conn`. Called exactly once.
    fn delete_communication(&self, conn: RawConnection);

    /// Ask the SDK to re-establish the device link. Outcome is reported only
    /// through the device-state callback.
    fn reconnect(&self, conn: RawConnection);

    /// `0`, `1`, or negative when no device is active.
    fn active_device_index(&self, conn: RawConnection) -> c_int;

    fn send_basket(&self, conn: RawConnection, json: &CStr) -> c_int;

    fn send_payment(&self, conn: RawConnection, json: &CStr) -> c_int;

    /// Fiscal information as opaque text.
    fn fiscal_info(&self, conn: RawConnection) -> String;

    fn set_serial_in_callback(&self, conn: RawConnection, callback: SerialInCallback);

    fn set_device_state_callback(&self, conn: RawConnection, callback: DeviceStateCallback);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
