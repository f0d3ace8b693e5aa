//! Integration hub: the handle bridge over the TokenX Connect SDK.
//!
//! Owns the table of live connections and routes every managed call to the
//! SDK with no logic of its own: payloads and status codes pass through
//! unchanged. Callback registration resolves the managed target, swaps it
//! into the process-wide [`CallbackRegistry`], then installs the channel's
//! trampoline with the SDK.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::callbacks::{self, CallbackContext, CallbackRegistry, Channel};
use crate::error::Result;
use crate::handle::{ConnectionHandle, HandleTable};
use crate::marshal;
use crate::runtime::{CallbackTarget, RuntimeGateway};
use crate::sdk::{ActiveDevice, PosSdk, RawConnection};

// ---------------------------------------------------------------------------
// Connection entry
// ---------------------------------------------------------------------------

/// A live native connection. Deleted in the SDK when the last reference
/// goes away, which is after any operation still running on another thread.
struct Connection {
    raw: RawConnection,
    company_name: String,
    sdk: Arc<dyn PosSdk>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.sdk.delete_communication(self.raw);
        info!(company = %self.company_name, conn = ?self.raw, "Native connection released");
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

pub struct IntegrationHub {
    sdk: Arc<dyn PosSdk>,
    connections: HandleTable<Connection>,
    registry: &'static CallbackRegistry,
}

impl IntegrationHub {
    /// Hub over `sdk`, registering callbacks in the global registry (the one
    /// the trampolines read).
    pub fn new(sdk: Arc<dyn PosSdk>) -> Self {
        Self {
            sdk,
            connections: HandleTable::new(),
            registry: CallbackRegistry::global(),
        }
    }

    fn connection(&self, handle: ConnectionHandle) -> Result<Arc<Connection>> {
        self.connections.get(handle)
    }

    /// Create a native connection for `company_name`.
    pub fn create_connection(&self, company_name: &str) -> Result<ConnectionHandle> {
        let raw = {
            let name = marshal::to_native("company name", company_name)?;
            self.sdk.create_communication(&name)
        };
        let handle = self.connections.insert(Connection {
            raw,
            company_name: company_name.to_string(),
            sdk: self.sdk.clone(),
        });
        info!(
            %handle,
            company = %company_name,
            sdk = self.sdk.name(),
            "Connection created"
        );
        Ok(handle)
    }

    /// Destroy a connection. Its callback registrations are cleared first, so
    /// events the SDK still fires during teardown are dropped.
    pub fn destroy_connection(&self, handle: ConnectionHandle) -> Result<()> {
        let conn = self.connections.remove(handle)?;
        let cleared = self.registry.clear_owned_by(handle);
        if Arc::strong_count(&conn) > 1 {
            debug!(%handle, "Connection busy on another thread, native release deferred");
        }
        info!(%handle, company = %conn.company_name, cleared, "Connection destroyed");
        drop(conn);
        Ok(())
    }

    /// Ask the SDK to re-establish the device link. The outcome arrives on
    /// the device-state channel only.
    pub fn reconnect(&self, handle: ConnectionHandle) -> Result<()> {
        let conn = self.connection(handle)?;
        debug!(%handle, "Reconnect requested");
        self.sdk.reconnect(conn.raw);
        Ok(())
    }

    /// `0` (X30TR), `1` (300TR), or negative when no device is active.
    pub fn active_device_index(&self, handle: ConnectionHandle) -> Result<i32> {
        let conn = self.connection(handle)?;
        let index = self.sdk.active_device_index(conn.raw);
        debug!(%handle, index, device = ?ActiveDevice::from_index(index), "Active device queried");
        Ok(index)
    }

    /// [`Self::active_device_index`], named.
    pub fn active_device(&self, handle: ConnectionHandle) -> Result<ActiveDevice> {
        self.active_device_index(handle).map(ActiveDevice::from_index)
    }

    pub fn send_basket(&self, handle: ConnectionHandle, json: &str) -> Result<i32> {
        let conn = self.connection(handle)?;
        let payload = marshal::to_native("basket", json)?;
        let status = self.sdk.send_basket(conn.raw, &payload);
        debug!(%handle, bytes = json.len(), status, "Basket sent");
        Ok(status)
    }

    pub fn send_payment(&self, handle: ConnectionHandle, json: &str) -> Result<i32> {
        let conn = self.connection(handle)?;
        let payload = marshal::to_native("payment", json)?;
        let status = self.sdk.send_payment(conn.raw, &payload);
        debug!(%handle, bytes = json.len(), status, "Payment sent");
        Ok(status)
    }

    pub fn fiscal_info(&self, handle: ConnectionHandle) -> Result<String> {
        let conn = self.connection(handle)?;
        Ok(self.sdk.fiscal_info(conn.raw))
    }

    /// Register `target` as the managed handler for `channel`, replacing any
    /// previous registration.
    ///
    /// Resolution failure leaves the previous registration and the SDK's
    /// installed callback untouched.
    pub fn register_callback(
        &self,
        handle: ConnectionHandle,
        channel: Channel,
        gateway: Arc<dyn RuntimeGateway>,
        target: &CallbackTarget,
    ) -> Result<()> {
        let conn = self.connection(handle)?;
        let context = CallbackContext::resolve(channel, handle, target.clone(), gateway)?;

        let replaced = self.registry.install(context);
        callbacks::log_installed(channel, handle, target, replaced.as_deref());

        match channel {
            Channel::SerialIn => self
                .sdk
                .set_serial_in_callback(conn.raw, callbacks::serial_in_trampoline),
            Channel::DeviceState => self
                .sdk
                .set_device_state_callback(conn.raw, callbacks::device_state_trampoline),
        }
        Ok(())
    }

    pub fn register_serial_in(
        &self,
        handle: ConnectionHandle,
        gateway: Arc<dyn RuntimeGateway>,
        target: &CallbackTarget,
    ) -> Result<()> {
        self.register_callback(handle, Channel::SerialIn, gateway, target)
    }

    pub fn register_device_state(
        &self,
        handle: ConnectionHandle,
        gateway: Arc<dyn RuntimeGateway>,
        target: &CallbackTarget,
    ) -> Result<()> {
        self.register_callback(handle, Channel::DeviceState, gateway, target)
    }

    /// Native connection behind `handle` (diagnostics).
    pub fn native_connection(&self, handle: ConnectionHandle) -> Result<RawConnection> {
        Ok(self.connection(handle)?.raw)
    }

    pub fn is_live(&self, handle: ConnectionHandle) -> bool {
        self.connections.contains(handle)
    }

    pub fn live_handles(&self) -> Vec<ConnectionHandle> {
        self.connections.handles()
    }

    /// Destroy every live connection, including ones the managed side lost
    /// track of (process teardown).
    pub fn shutdown(&self) {
        let handles = self.live_handles();
        for handle in &handles {
            if let Err(e) = self.destroy_connection(*handle) {
                warn!("Error destroying {handle} during shutdown: {e}");
            }
        }
        info!("IntegrationHub shutdown, {} connections destroyed", handles.len());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::sdk::simulated::SimulatedSdk;
    use crate::test_support::{FakeRuntime, Recorded};
    use serial_test::serial;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::Duration;

    const CLASS: &str = "com/sdksotestjava/IntegrationHubTest";

    fn setup() -> (Arc<SimulatedSdk>, IntegrationHub) {
        let sdk = Arc::new(SimulatedSdk::new());
        let hub = IntegrationHub::new(sdk.clone());
        (sdk, hub)
    }

    fn runtime() -> Arc<FakeRuntime> {
        let rt = Arc::new(FakeRuntime::new());
        rt.define(&serial_target(), Channel::SerialIn.params());
        rt.define(&device_target(), Channel::DeviceState.params());
        rt
    }

    fn serial_target() -> CallbackTarget {
        CallbackTarget::new(CLASS, "serialInCallback")
    }

    fn device_target() -> CallbackTarget {
        CallbackTarget::new(CLASS, "deviceStateCallback")
    }

    #[test]
    fn test_create_and_destroy_releases_native_once() {
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();
        assert!(hub.is_live(h));
        assert_eq!(sdk.company_name(raw).as_deref(), Some("Acme"));

        hub.destroy_connection(h).unwrap();
        assert!(!hub.is_live(h));
        assert!(!sdk.is_live(raw));
        assert_eq!(sdk.delete_count(raw), 1);

        // Second destroy is detected instead of double-freeing.
        assert!(matches!(hub.destroy_connection(h), Err(BridgeError::StaleHandle(_))));
        assert_eq!(sdk.delete_count(raw), 1);
    }

    #[test]
    fn test_operations_on_destroyed_handle_are_stale() {
        let (_sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        hub.destroy_connection(h).unwrap();

        assert!(matches!(hub.reconnect(h), Err(BridgeError::StaleHandle(_))));
        assert!(matches!(hub.active_device_index(h), Err(BridgeError::StaleHandle(_))));
        assert!(matches!(hub.send_basket(h, "{}"), Err(BridgeError::StaleHandle(_))));
        assert!(matches!(hub.send_payment(h, "{}"), Err(BridgeError::StaleHandle(_))));
        assert!(matches!(hub.fiscal_info(h), Err(BridgeError::StaleHandle(_))));
        assert!(matches!(
            hub.register_serial_in(h, runtime(), &serial_target()),
            Err(BridgeError::StaleHandle(_))
        ));
    }

    #[test]
    fn test_active_device_index() {
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();

        assert!(hub.active_device_index(h).unwrap() < 0);
        sdk.set_active_device(raw, 0);
        assert_eq!(hub.active_device_index(h).unwrap(), 0);
        sdk.set_active_device(raw, 1);
        assert_eq!(hub.active_device_index(h).unwrap(), 1);
    }

    #[test]
    fn test_active_device_names_the_index() {
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();

        assert_eq!(hub.active_device(h).unwrap(), ActiveDevice::None);
        sdk.set_active_device(raw, 0);
        assert_eq!(hub.active_device(h).unwrap(), ActiveDevice::X30tr);
        sdk.set_active_device(raw, 1);
        assert_eq!(hub.active_device(h).unwrap(), ActiveDevice::Tr300);

        hub.destroy_connection(h).unwrap();
        assert!(matches!(hub.active_device(h), Err(BridgeError::StaleHandle(_))));
    }

    #[test]
    fn test_sends_pass_bytes_and_status_through() {
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();

        let basket = r#"{"items":[{"name":"Çay","qty":2,"price":15.0}],"note":"  spaces  "}"#;
        let payment = r#"{"amount":30.0,"type":"card","currency":"₺"}"#;

        for code in [0, 1, -3, 4096] {
            sdk.set_status_code(raw, code);
            assert_eq!(hub.send_basket(h, basket).unwrap(), code);
            assert_eq!(hub.send_payment(h, payment).unwrap(), code);
        }
        assert!(sdk.baskets(raw).iter().all(|b| b == basket.as_bytes()));
        assert!(sdk.payments(raw).iter().all(|p| p == payment.as_bytes()));
        assert_eq!(sdk.baskets(raw).len(), 4);
    }

    #[test]
    fn test_interior_nul_never_reaches_sdk() {
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();

        let err = hub.send_basket(h, "{\"a\":\0}").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidText { what: "basket", .. }));
        assert!(sdk.baskets(raw).is_empty());
        assert!(matches!(
            hub.create_connection("Ac\0me"),
            Err(BridgeError::InvalidText { .. })
        ));
    }

    #[test]
    fn test_fiscal_info_passthrough() {
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();
        let info = r#"{"fiscalNo":"TR-77","zNo":12,"title":"Şirket"}"#;
        sdk.set_fiscal_info(raw, info);
        assert_eq!(hub.fiscal_info(h).unwrap(), info);
    }

    #[test]
    fn test_shutdown_destroys_leaked_connections() {
        let (sdk, hub) = setup();
        // Second create on the same managed object leaks the first handle.
        let _lost = hub.create_connection("Acme").unwrap();
        let _kept = hub.create_connection("Acme").unwrap();
        assert_eq!(hub.live_handles().len(), 2);

        hub.shutdown();
        assert!(hub.live_handles().is_empty());
        assert_eq!(sdk.live_connections(), 0);
    }

    #[test]
    #[serial]
    fn test_unresolvable_target_installs_nothing() {
        CallbackRegistry::global().reset();
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();
        let rt = runtime();

        let err = hub
            .register_serial_in(h, rt.clone(), &CallbackTarget::new(CLASS, "missing"))
            .unwrap_err();
        assert!(matches!(err, BridgeError::TargetResolution { .. }));
        // Wrong signature: a device-state handler offered for serial-in.
        assert!(hub.register_serial_in(h, rt, &device_target()).is_err());

        assert!(!CallbackRegistry::global().is_registered(Channel::SerialIn));
        assert!(!sdk.has_serial_in_callback(raw));
    }

    #[test]
    #[serial]
    fn test_acme_device_state_delivered_once_on_native_thread() {
        CallbackRegistry::global().reset();
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();
        let rt = runtime();
        hub.register_device_state(h, rt.clone(), &device_target()).unwrap();
        assert!(sdk.has_device_state_callback(raw));

        let native = thread::spawn({
            let (sdk, rt) = (sdk.clone(), rt.clone());
            move || {
                assert!(sdk.fire_device_state(raw, true, "X30TR-001"));
                // Delivered synchronously, before the SDK call returned.
                assert_eq!(rt.calls("deviceStateCallback").len(), 1);
                thread::current().id()
            }
        });
        let native_id = native.join().unwrap();

        let calls = rt.calls("deviceStateCallback");
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].args,
            vec![Recorded::Bool(true), Recorded::Text("X30TR-001".into())]
        );
        assert!(calls[0].attached);
        assert_eq!(calls[0].thread, native_id);
        assert_eq!(rt.balance_by_thread().get(&native_id), Some(&0));

        hub.destroy_connection(h).unwrap();
    }

    #[test]
    #[serial]
    fn test_reconnect_outcome_arrives_on_device_state_channel() {
        CallbackRegistry::global().reset();
        let (_sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let rt = runtime();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        rt.on_call("deviceStateCallback", move |call| {
            let _ = tx.lock().unwrap().send(call.args.clone());
        });
        hub.register_device_state(h, rt.clone(), &device_target()).unwrap();

        hub.reconnect(h).unwrap();
        let args = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(args, vec![Recorded::Bool(true), Recorded::Text("X30TR-001".into())]);
        assert_eq!(hub.active_device_index(h).unwrap(), 0);

        hub.destroy_connection(h).unwrap();
    }

    #[test]
    #[serial]
    fn test_new_registration_replaces_old_target() {
        CallbackRegistry::global().reset();
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();
        let rt = runtime();
        let replacement = CallbackTarget::new(CLASS, "serialInCallbackV2");
        rt.define(&replacement, Channel::SerialIn.params());

        hub.register_serial_in(h, rt.clone(), &serial_target()).unwrap();
        assert!(sdk.fire_serial_in(raw, 1, "first"));
        hub.register_serial_in(h, rt.clone(), &replacement).unwrap();
        assert!(sdk.fire_serial_in(raw, 2, "second"));

        let old = rt.calls("serialInCallback");
        let new = rt.calls("serialInCallbackV2");
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].args[0], Recorded::Int(1));
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].args, vec![Recorded::Int(2), Recorded::Text("second".into())]);

        hub.destroy_connection(h).unwrap();
    }

    #[test]
    #[serial]
    fn test_sequential_serial_events_in_order_and_lossless() {
        CallbackRegistry::global().reset();
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();
        let rt = runtime();
        hub.register_serial_in(h, rt.clone(), &serial_target()).unwrap();

        let payloads = ["ACK", "Fiş yazdırıldı", "收据", "{\"ok\":true}", ""];
        thread::spawn({
            let sdk = sdk.clone();
            move || {
                for (tag, p) in payloads.iter().enumerate() {
                    assert!(sdk.fire_serial_in(raw, tag as i32, p));
                }
            }
        })
        .join()
        .unwrap();

        let got: Vec<Vec<Recorded>> = rt.calls("serialInCallback").into_iter().map(|c| c.args).collect();
        let want: Vec<Vec<Recorded>> = payloads
            .iter()
            .enumerate()
            .map(|(tag, p)| vec![Recorded::Int(tag as i32), Recorded::Text(p.to_string())])
            .collect();
        assert_eq!(got, want);

        hub.destroy_connection(h).unwrap();
    }

    #[test]
    #[serial]
    fn test_concurrent_serial_events_from_four_native_threads() {
        CallbackRegistry::global().reset();
        let (sdk, hub) = setup();
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();
        let rt = runtime();
        hub.register_serial_in(h, rt.clone(), &serial_target()).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|w| {
                let sdk = sdk.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        let tag = w * 250 + i;
                        assert!(sdk.fire_serial_in(raw, tag, &format!("evt-{tag}-ü")));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut seen: Vec<(i32, String)> = rt
            .calls("serialInCallback")
            .into_iter()
            .map(|c| {
                assert!(c.attached);
                match c.args.as_slice() {
                    [Recorded::Int(tag), Recorded::Text(p)] => (*tag, p.clone()),
                    other => panic!("unexpected args {other:?}"),
                }
            })
            .collect();
        seen.sort();
        let want: Vec<(i32, String)> = (0..1000).map(|t| (t, format!("evt-{t}-ü"))).collect();
        assert_eq!(seen, want);

        assert_eq!(rt.attach_count(), 1000);
        assert_eq!(rt.detach_count(), 1000);
        let balance = rt.balance_by_thread();
        assert_eq!(balance.len(), 4);
        assert!(balance.values().all(|net| *net == 0));

        hub.destroy_connection(h).unwrap();
    }

    #[test]
    #[serial]
    fn test_destroy_unregisters_and_drops_late_events() {
        CallbackRegistry::global().reset();
        let (_sdk, hub) = setup();
        let a = hub.create_connection("Acme").unwrap();
        let b = hub.create_connection("Globex").unwrap();
        let rt = runtime();
        hub.register_serial_in(a, rt.clone(), &serial_target()).unwrap();
        hub.register_device_state(b, rt.clone(), &device_target()).unwrap();

        hub.destroy_connection(a).unwrap();
        assert!(!CallbackRegistry::global().is_registered(Channel::SerialIn));
        assert!(CallbackRegistry::global().is_registered(Channel::DeviceState));

        // The SDK fires one more event from its thread after teardown.
        let late = CString::new("late").unwrap();
        thread::spawn(move || callbacks::serial_in_trampoline(5, late.as_ptr()))
            .join()
            .unwrap();
        assert!(rt.calls("serialInCallback").is_empty());
        assert_eq!(rt.attach_count(), 0);

        hub.destroy_connection(b).unwrap();
        assert!(!CallbackRegistry::global().is_registered(Channel::DeviceState));
    }

    #[test]
    #[serial]
    fn test_handler_may_destroy_its_own_connection() {
        CallbackRegistry::global().reset();
        let (sdk, hub) = setup();
        let hub = Arc::new(hub);
        let h = hub.create_connection("Acme").unwrap();
        let raw = hub.native_connection(h).unwrap();
        let rt = runtime();

        // The handler tears its own connection down mid-dispatch.
        let destroyed = Arc::new(AtomicBool::new(false));
        rt.on_call("serialInCallback", {
            let (hub, destroyed) = (hub.clone(), destroyed.clone());
            move |_| {
                if !destroyed.swap(true, Ordering::SeqCst) {
                    hub.destroy_connection(h).unwrap();
                }
            }
        });
        hub.register_serial_in(h, rt.clone(), &serial_target()).unwrap();

        assert!(sdk.fire_serial_in(raw, 1, "bye"));
        assert!(destroyed.load(Ordering::SeqCst));
        assert!(!hub.is_live(h));
        assert_eq!(sdk.delete_count(raw), 1);
        assert!(hub.fiscal_info(h).is_err());
        assert!(!CallbackRegistry::global().is_registered(Channel::SerialIn));
        assert_eq!(rt.attach_count(), rt.detach_count());
    }
}
