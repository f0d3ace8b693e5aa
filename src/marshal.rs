//! Text marshaling between Rust strings and native C text.
//!
//! Outbound text becomes a `CString` that lives for the duration of one SDK
//! call and is freed when it goes out of scope, on every exit path. Inbound
//! text from SDK threads is copied out of the SDK's buffer before any managed
//! code runs.

use std::borrow::Cow;
use std::ffi::{c_char, CStr, CString};

use tracing::warn;

use crate::error::{BridgeError, Result};

/// Copy `text` into a NUL-terminated buffer for the native layer.
///
/// Bytes are passed through unchanged. Interior NUL bytes cannot be
/// represented and are rejected.
pub fn to_native(what: &'static str, text: &str) -> Result<CString> {
    CString::new(text).map_err(|e| BridgeError::InvalidText {
        what,
        reason: format!("interior NUL at byte {}", e.nul_position()),
    })
}

/// Read native text handed to a trampoline.
///
/// A null pointer reads as the empty string. Invalid UTF-8 is replaced
/// (U+FFFD) rather than dropping the event.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated buffer that stays valid
/// for the returned lifetime.
pub unsafe fn from_native<'a>(what: &'static str, ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        return Cow::Borrowed("");
    }
    let bytes = CStr::from_ptr(ptr).to_bytes();
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(e) => {
            warn!(what, valid_up_to = e.valid_up_to(), "Native text is not valid UTF-8");
            String::from_utf8_lossy(bytes)
        }
    }
}

/// Native string owned by the SDK, returned to it through `release` on drop.
pub struct NativeString {
    ptr: *mut c_char,
    release: unsafe fn(*mut c_char),
}

impl NativeString {
    /// # Safety
    /// `ptr` must be null or a NUL-terminated buffer that `release` frees.
    pub unsafe fn new(ptr: *mut c_char, release: unsafe fn(*mut c_char)) -> Self {
        Self { ptr, release }
    }

    /// Copy the buffer out as an owned Rust string.
    pub fn to_owned_string(&self, what: &'static str) -> String {
        // SAFETY: constructor contract.
        unsafe { from_native(what, self.ptr) }.into_owned()
    }
}

impl Drop for NativeString {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: constructor contract; released exactly once.
            unsafe { (self.release)(self.ptr) }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
