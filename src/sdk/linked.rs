//! Bindings to the vendor TokenX Connect library.
//!
//! The vendor entry points pass `std::string` by value, so they are reached
//! through `native/tokenx_shim.cpp` (compiled by `build.rs`), which exposes
//! the same operations over C text and owns fiscal text until
//! `tx_release_string`.

use std::ffi::{c_char, c_int, c_void, CStr};

use crate::marshal::NativeString;

use super::{DeviceStateCallback, PosSdk, RawConnection, SerialInCallback};

extern "C" {
    fn tx_create_communication(company_name: *const c_char) -> *mut c_void;
    fn tx_delete_communication(conn: *mut c_void);
    fn tx_reconnect(conn: *mut c_void);
    fn tx_get_active_device_index(conn: *mut c_void) -> c_int;
    fn tx_send_basket(conn: *mut c_void, json: *const c_char) -> c_int;
    fn tx_send_payment(conn: *mut c_void, json: *const c_char) -> c_int;
    fn tx_get_fiscal_info(conn: *mut c_void) -> *mut c_char;
    fn tx_release_string(text: *mut c_char);
    fn tx_set_serial_in_callback(conn: *mut c_void, callback: SerialInCallback);
    fn tx_set_device_state_callback(conn: *mut c_void, callback: DeviceStateCallback);
}

unsafe fn release_sdk_string(text: *mut c_char) {
    tx_release_string(text)
}

/// The linked vendor library. Stateless; all state lives behind the
/// connection pointers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedSdk;

// SAFETY (all blocks below): the bridge only passes connection pointers that
// `tx_create_communication` returned and that the handle table still holds, and
// C text that outlives the call.
impl PosSdk for LinkedSdk {
    fn name(&self) -> &str {
        "tokenx-connect"
    }

    fn create_communication(&self, company_name: &CStr) -> RawConnection {
        RawConnection::from_ptr(unsafe { tx_create_communication(company_name.as_ptr()) })
    }

    fn delete_communication(&self, conn: RawConnection) {
        unsafe { tx_delete_communication(conn.as_ptr()) }
    }

    fn reconnect(&self, conn: RawConnection) {
        unsafe { tx_reconnect(conn.as_ptr()) }
    }

    fn active_device_index(&self, conn: RawConnection) -> c_int {
        unsafe { tx_get_active_device_index(conn.as_ptr()) }
    }

    fn send_basket(&self, conn: RawConnection, json: &CStr) -> c_int {
        unsafe { tx_send_basket(conn.as_ptr(), json.as_ptr()) }
    }

    fn send_payment(&self, conn: RawConnection, json: &CStr) -> c_int {
        unsafe { tx_send_payment(conn.as_ptr(), json.as_ptr()) }
    }

    fn fiscal_info(&self, conn: RawConnection) -> String {
        let text = unsafe { NativeString::new(tx_get_fiscal_info(conn.as_ptr()), release_sdk_string) };
        text.to_owned_string("fiscal info")
    }

    fn set_serial_in_callback(&self, conn: RawConnection, callback: SerialInCallback) {
        unsafe { tx_set_serial_in_callback(conn.as_ptr(), callback) }
    }

    fn set_device_state_callback(&self, conn: RawConnection, callback: DeviceStateCallback) {
        unsafe { tx_set_device_state_callback(conn.as_ptr(), callback) }
    }
}
