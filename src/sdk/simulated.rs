//! In-process emulation of the TokenX Connect SDK.
//!
//! Behaves like the vendor library from the bridge's point of view: opaque
//! connection pointers, opaque status codes, and callbacks fired from threads
//! the bridge does not own. Used by the test suite and for running the bridge
//! without a device attached.

use std::collections::HashMap;
use std::ffi::{c_int, CStr, CString};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, info, warn};

use super::{DeviceStateCallback, PosSdk, RawConnection, SerialInCallback};

const DEFAULT_DEVICE_ID: &str = "X30TR-001";
const DEFAULT_FISCAL_INFO: &str = r#"{"fiscalNo":"SIM0000001","zNo":0,"receiptNo":0}"#;

struct SimConnection {
    company_name: String,
    device_id: String,
    active_device: c_int,
    status_code: c_int,
    fiscal_info: String,
    serial_in: Option<SerialInCallback>,
    device_state: Option<DeviceStateCallback>,
    baskets: Vec<Vec<u8>>,
    payments: Vec<Vec<u8>>,
}

impl SimConnection {
    fn new(company_name: String) -> Self {
        Self {
            company_name,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            active_device: -1,
            status_code: 0,
            fiscal_info: DEFAULT_FISCAL_INFO.to_string(),
            serial_in: None,
            device_state: None,
            baskets: Vec::new(),
            payments: Vec::new(),
        }
    }
}

#[derive(Default)]
struct SimState {
    connections: HashMap<usize, SimConnection>,
    deleted: Vec<usize>,
}

/// Simulated SDK. Connection "pointers" are small integers starting at
/// `0x1000`; they are never dereferenced.
pub struct SimulatedSdk {
    next_addr: AtomicUsize,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSdk {
    pub fn new() -> Self {
        Self {
            next_addr: AtomicUsize::new(0x1000),
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_conn<R>(&self, conn: RawConnection, f: impl FnOnce(&mut SimConnection) -> R) -> Option<R> {
        self.state().connections.get_mut(&conn.addr()).map(f)
    }

    // -- device-side controls ------------------------------------------------

    /// Select the active device (`0`, `1`, or negative for none).
    pub fn set_active_device(&self, conn: RawConnection, index: c_int) {
        self.with_conn(conn, |c| c.active_device = index);
    }

    /// Status code returned by subsequent basket/payment sends.
    pub fn set_status_code(&self, conn: RawConnection, code: c_int) {
        self.with_conn(conn, |c| c.status_code = code);
    }

    pub fn set_fiscal_info(&self, conn: RawConnection, json: &str) {
        self.with_conn(conn, |c| c.fiscal_info = json.to_string());
    }

    /// Device ID reported by the device-state callback after a reconnect.
    pub fn set_device_id(&self, conn: RawConnection, device_id: &str) {
        self.with_conn(conn, |c| c.device_id = device_id.to_string());
    }

    /// Fire the serial-input callback on the calling thread. Returns `false`
    /// when the connection is gone or has no callback installed.
    pub fn fire_serial_in(&self, conn: RawConnection, tag: c_int, payload: &str) -> bool {
        let Some(Some(callback)) = self.with_conn(conn, |c| c.serial_in) else {
            return false;
        };
        let Ok(payload) = CString::new(payload) else {
            warn!("Simulated SDK: payload with interior NUL not fired");
            return false;
        };
        callback(tag, payload.as_ptr());
        true
    }

    /// Fire the device-state callback on the calling thread.
    pub fn fire_device_state(&self, conn: RawConnection, connected: bool, device_id: &str) -> bool {
        let Some(Some(callback)) = self.with_conn(conn, |c| c.device_state) else {
            return false;
        };
        let Ok(device_id) = CString::new(device_id) else {
            return false;
        };
        callback(connected, device_id.as_ptr());
        true
    }

    // -- inspection ----------------------------------------------------------

    pub fn is_live(&self, conn: RawConnection) -> bool {
        self.state().connections.contains_key(&conn.addr())
    }

    pub fn company_name(&self, conn: RawConnection) -> Option<String> {
        self.with_conn(conn, |c| c.company_name.clone())
    }

    /// Basket payloads received, byte for byte.
    pub fn baskets(&self, conn: RawConnection) -> Vec<Vec<u8>> {
        self.with_conn(conn, |c| c.baskets.clone()).unwrap_or_default()
    }

    /// Payment payloads received, byte for byte.
    pub fn payments(&self, conn: RawConnection) -> Vec<Vec<u8>> {
        self.with_conn(conn, |c| c.payments.clone()).unwrap_or_default()
    }

    pub fn has_serial_in_callback(&self, conn: RawConnection) -> bool {
        self.with_conn(conn, |c| c.serial_in.is_some()).unwrap_or(false)
    }

    pub fn has_device_state_callback(&self, conn: RawConnection) -> bool {
        self.with_conn(conn, |c| c.device_state.is_some()).unwrap_or(false)
    }

    /// Number of times `conn` was deleted (must never exceed one).
    pub fn delete_count(&self, conn: RawConnection) -> usize {
        self.state().deleted.iter().filter(|a| **a == conn.addr()).count()
    }

    pub fn live_connections(&self) -> usize {
        self.state().connections.len()
    }
}

impl Default for SimulatedSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl PosSdk for SimulatedSdk {
    fn name(&self) -> &str {
        "simulated"
    }

    fn create_communication(&self, company_name: &CStr) -> RawConnection {
        let addr = self.next_addr.fetch_add(0x10, Ordering::Relaxed);
        let company = company_name.to_string_lossy().into_owned();
        info!(company = %company, addr = format_args!("{addr:#x}"), "Simulated SDK: communication created");
        self.state()
            .connections
            .insert(addr, SimConnection::new(company));
        RawConnection(addr)
    }

    fn delete_communication(&self, conn: RawConnection) {
        let mut state = self.state();
        if state.connections.remove(&conn.addr()).is_none() {
            warn!(conn = ?conn, "Simulated SDK: delete of unknown connection");
        }
        state.deleted.push(conn.addr());
    }

    fn reconnect(&self, conn: RawConnection) {
        let state = self.state.clone();
        // The link comes up on an SDK thread; the caller only learns about it
        // through the device-state callback.
        let spawned = thread::Builder::new()
            .name("tokenx-sim-link".into())
            .spawn(move || {
                let event = {
                    let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
                    guard.connections.get_mut(&conn.addr()).map(|c| {
                        if c.active_device < 0 {
                            c.active_device = 0;
                        }
                        (c.device_state, c.device_id.clone())
                    })
                };
                match event {
                    Some((Some(callback), device_id)) => {
                        debug!(device_id = %device_id, "Simulated SDK: link up");
                        if let Ok(device_id) = CString::new(device_id) {
                            callback(true, device_id.as_ptr());
                        }
                    }
                    Some((None, _)) => debug!("Simulated SDK: link up, no device-state callback"),
                    None => debug!("Simulated SDK: reconnect on deleted connection ignored"),
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Simulated SDK: failed to spawn link thread");
        }
    }

    fn active_device_index(&self, conn: RawConnection) -> c_int {
        self.with_conn(conn, |c| c.active_device).unwrap_or(-1)
    }

    fn send_basket(&self, conn: RawConnection, json: &CStr) -> c_int {
        self.with_conn(conn, |c| {
            c.baskets.push(json.to_bytes().to_vec());
            c.status_code
        })
        .unwrap_or(-1)
    }

    fn send_payment(&self, conn: RawConnection, json: &CStr) -> c_int {
        self.with_conn(conn, |c| {
            c.payments.push(json.to_bytes().to_vec());
            c.status_code
        })
        .unwrap_or(-1)
    }

    fn fiscal_info(&self, conn: RawConnection) -> String {
        self.with_conn(conn, |c| c.fiscal_info.clone())
            .unwrap_or_default()
    }

    fn set_serial_in_callback(&self, conn: RawConnection, callback: SerialInCallback) {
        self.with_conn(conn, |c| c.serial_in = Some(callback));
    }

    fn set_device_state_callback(&self, conn: RawConnection, callback: DeviceStateCallback) {
        self.with_conn(conn, |c| c.device_state = Some(callback));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
