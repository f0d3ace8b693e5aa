//! `libIntegrationHubJNI`: natives of `com.sdksotestjava.IntegrationHub`.
//!
//! The Java object keeps its connection in `long nativePointer`, which holds
//! a [`ConnectionHandle`] (never a native address). Callback methods are
//! resolved on the registering Java thread, pinned with a global class
//! reference, and invoked later from SDK threads through [`JniGateway`].

// Library name is fixed by `System.loadLibrary("IntegrationHubJNI")`.
#![allow(non_snake_case)]

use std::ffi::c_void;
use std::ptr;
use std::sync::{Arc, OnceLock};

use jni::objects::{GlobalRef, JClass, JObject, JStaticMethodID, JString, JValue};
use jni::signature::{Primitive, ReturnType};
use jni::sys::{self, jboolean, jint, jobject, jstring, jvalue, JNI_OK, JNI_VERSION_1_8};
use jni::{JNIEnv, JavaVM};
use tracing::{error, info, warn};

use tokenx_bridge::callbacks::Channel;
use tokenx_bridge::config::BridgeConfig;
use tokenx_bridge::diagnostics;
use tokenx_bridge::error::{BridgeError, Result};
use tokenx_bridge::handle::ConnectionHandle;
use tokenx_bridge::hub::IntegrationHub;
use tokenx_bridge::runtime::{CallbackTarget, ManagedArg, ManagedCallable, RuntimeGateway};
use tokenx_bridge::sdk::linked::LinkedSdk;

const NATIVE_FIELD: &str = "nativePointer";

static CONFIG: OnceLock<BridgeConfig> = OnceLock::new();
static HUB: OnceLock<IntegrationHub> = OnceLock::new();

fn config() -> &'static BridgeConfig {
    CONFIG.get_or_init(BridgeConfig::default)
}

fn hub() -> &'static IntegrationHub {
    HUB.get_or_init(|| IntegrationHub::new(Arc::new(LinkedSdk)))
}

fn interop(e: jni::errors::Error) -> BridgeError {
    BridgeError::Runtime(e.to_string())
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// The hosting JVM. Attach/detach go straight through the invocation
/// interface so that an invocation detaches exactly what it attached.
pub struct JniGateway {
    vm: Arc<JavaVM>,
}

impl JniGateway {
    pub fn from_env(env: &JNIEnv) -> Result<Self> {
        Ok(Self {
            vm: Arc::new(env.get_java_vm().map_err(interop)?),
        })
    }

    fn raw_vm(&self) -> *mut sys::JavaVM {
        self.vm.get_java_vm_pointer()
    }
}

impl RuntimeGateway for JniGateway {
    fn is_current_thread_attached(&self) -> bool {
        self.vm.get_env().is_ok()
    }

    fn attach_current_thread(&self) -> Result<()> {
        let raw = self.raw_vm();
        // SAFETY: a live JavaVM pointer always points at its function table.
        let attach = unsafe { (**raw).AttachCurrentThread }
            .ok_or_else(|| BridgeError::Attach("AttachCurrentThread missing".into()))?;
        let mut env: *mut c_void = ptr::null_mut();
        // SAFETY: standard invocation-interface call with a null args block.
        let rc = unsafe { attach(raw, &mut env, ptr::null_mut()) };
        if rc != JNI_OK {
            return Err(BridgeError::Attach(format!("AttachCurrentThread returned {rc}")));
        }
        Ok(())
    }

    fn detach_current_thread(&self) {
        let raw = self.raw_vm();
        // SAFETY: as above.
        if let Some(detach) = unsafe { (**raw).DetachCurrentThread } {
            // SAFETY: only called by the scope that attached this thread; no
            // local references survive the scope.
            let rc = unsafe { detach(raw) };
            if rc != JNI_OK {
                warn!(rc, "DetachCurrentThread failed");
            }
        }
    }

    fn resolve(&self, target: &CallbackTarget, channel: Channel) -> Result<Box<dyn ManagedCallable>> {
        let unresolved = |reason: String| BridgeError::TargetResolution {
            channel,
            target: target.to_string(),
            reason,
        };
        let mut env = self.vm.get_env().map_err(|e| unresolved(e.to_string()))?;

        let class = match env.find_class(&target.class) {
            Ok(class) => class,
            Err(e) => {
                let _ = env.exception_clear();
                return Err(unresolved(format!("class not found: {e}")));
            }
        };
        let method = match env.get_static_method_id(&class, &target.method, channel.descriptor()) {
            Ok(method) => method,
            Err(e) => {
                let _ = env.exception_clear();
                return Err(unresolved(format!(
                    "no static method with descriptor {}: {e}",
                    channel.descriptor()
                )));
            }
        };
        // Class lookups from SDK threads would use the system loader, so the
        // class is pinned here.
        let class = env
            .new_global_ref(&class)
            .map_err(|e| unresolved(e.to_string()))?;

        Ok(Box::new(JniStaticMethod {
            vm: self.vm.clone(),
            class,
            method,
        }))
    }
}

struct JniStaticMethod {
    vm: Arc<JavaVM>,
    class: GlobalRef,
    method: JStaticMethodID,
}

impl ManagedCallable for JniStaticMethod {
    fn call(&self, args: &[ManagedArg<'_>]) -> Result<()> {
        let mut env = self
            .vm
            .get_env()
            .map_err(|e| BridgeError::Invoke(format!("thread not attached: {e}")))?;

        // Local refs (the Java strings) are freed when the frame pops.
        env.with_local_frame(4, |env| -> jni::errors::Result<()> {
            let mut values: Vec<jvalue> = Vec::with_capacity(args.len());
            for arg in args {
                let value = match *arg {
                    ManagedArg::Int(v) => JValue::Int(v).as_jni(),
                    ManagedArg::Bool(v) => JValue::Bool(v as jboolean).as_jni(),
                    ManagedArg::Text(text) => {
                        let s = env.new_string(text)?;
                        JValue::Object(&*s).as_jni()
                    }
                };
                values.push(value);
            }
            let class: &JClass = self.class.as_obj().into();
            // SAFETY: method ID was resolved against this class with the
            // channel's descriptor, which `values` matches.
            unsafe {
                env.call_static_method_unchecked(
                    class,
                    self.method,
                    ReturnType::Primitive(Primitive::Void),
                    &values,
                )
            }
            .map(|_| ())
        })
        .map_err(|e| BridgeError::Invoke(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn handle_of(env: &mut JNIEnv, this: &JObject) -> Result<ConnectionHandle> {
    let raw = env
        .get_field(this, NATIVE_FIELD, "J")
        .and_then(|v| v.j())
        .map_err(interop)?;
    Ok(ConnectionHandle::from_raw(raw))
}

fn set_handle(env: &mut JNIEnv, this: &JObject, handle: ConnectionHandle) -> Result<()> {
    env.set_field(this, NATIVE_FIELD, "J", JValue::Long(handle.into_raw()))
        .map_err(interop)
}

/// Copy a Java string. The UTF chars are released before this returns.
fn read_string(env: &mut JNIEnv, s: &JString) -> Result<String> {
    let chars = env.get_string(s).map_err(interop)?;
    Ok(chars.into())
}

/// Raise `err` as a Java exception unless one is already pending.
fn throw(env: &mut JNIEnv, err: &BridgeError) {
    if env.exception_check().unwrap_or(false) {
        return;
    }
    let class = match err {
        BridgeError::InvalidText { .. } => "java/lang/IllegalArgumentException",
        _ => "java/lang/IllegalStateException",
    };
    if env.throw_new(class, err.to_string()).is_err() {
        error!(error = %err, "Failed to raise Java exception");
    }
}

fn or_throw<T>(env: &mut JNIEnv, result: Result<T>, fallback: T) -> T {
    result.unwrap_or_else(|e| {
        throw(env, &e);
        fallback
    })
}

// ---------------------------------------------------------------------------
// Library lifecycle
// ---------------------------------------------------------------------------

#[no_mangle]
pub extern "system" fn JNI_OnLoad(_vm: *mut sys::JavaVM, _reserved: *mut c_void) -> jint {
    let (loaded, load_error) = match BridgeConfig::from_env() {
        Ok(cfg) => (cfg, None),
        Err(e) => (BridgeConfig::default(), Some(e)),
    };
    let cfg = CONFIG.get_or_init(|| loaded);
    diagnostics::init_logging(&cfg.log);
    if let Some(e) = load_error {
        warn!(error = %e, "Falling back to default bridge configuration");
    }
    info!(build = %diagnostics::about(), "tokenx-bridge loaded");
    JNI_VERSION_1_8
}

#[no_mangle]
pub extern "system" fn JNI_OnUnload(_vm: *mut sys::JavaVM, _reserved: *mut c_void) {
    if let Some(hub) = HUB.get() {
        hub.shutdown();
    }
}

// ---------------------------------------------------------------------------
// com.sdksotestjava.IntegrationHub natives
// ---------------------------------------------------------------------------

fn create_communication(env: &mut JNIEnv, this: &JObject, company_name: &JString) -> Result<()> {
    let company_name = read_string(env, company_name)?;
    let previous = handle_of(env, this)?;
    if hub().is_live(previous) {
        warn!(%previous, "createCommunication called again; previous connection stays open until shutdown");
    }
    let handle = hub().create_connection(&company_name)?;
    set_handle(env, this, handle)
}

#[no_mangle]
pub extern "system" fn Java_com_sdksotestjava_IntegrationHub_createCommunication<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
    company_name: JString<'local>,
) -> jobject {
    let result = create_communication(&mut env, &this, &company_name);
    or_throw(&mut env, result, ());
    this.into_raw()
}

fn delete_communication(env: &mut JNIEnv, this: &JObject) -> Result<()> {
    let handle = handle_of(env, this)?;
    hub().destroy_connection(handle)?;
    set_handle(env, this, ConnectionHandle::NULL)
}

#[no_mangle]
pub extern "system" fn Java_com_sdksotestjava_IntegrationHub_deleteCommunication<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) {
    let result = delete_communication(&mut env, &this);
    or_throw(&mut env, result, ());
}

#[no_mangle]
pub extern "system" fn Java_com_sdksotestjava_IntegrationHub_reconnect<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) {
    let result = handle_of(&mut env, &this).and_then(|h| hub().reconnect(h));
    or_throw(&mut env, result, ());
}

#[no_mangle]
pub extern "system" fn Java_com_sdksotestjava_IntegrationHub_getActiveDeviceIndex<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jint {
    let result = handle_of(&mut env, &this).and_then(|h| hub().active_device_index(h));
    or_throw(&mut env, result, -1)
}

#[no_mangle]
pub extern "system" fn Java_com_sdksotestjava_IntegrationHub_sendBasket<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
    json: JString<'local>,
) -> jint {
    let result = handle_of(&mut env, &this).and_then(|h| {
        let json = read_string(&mut env, &json)?;
        hub().send_basket(h, &json)
    });
    or_throw(&mut env, result, -1)
}

#[no_mangle]
pub extern "system" fn Java_com_sdksotestjava_IntegrationHub_sendPayment<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
    json: JString<'local>,
) -> jint {
    let result = handle_of(&mut env, &this).and_then(|h| {
        let json = read_string(&mut env, &json)?;
        hub().send_payment(h, &json)
    });
    or_throw(&mut env, result, -1)
}

fn fiscal_info(env: &mut JNIEnv, this: &JObject) -> Result<jstring> {
    let handle = handle_of(env, this)?;
    let info = hub().fiscal_info(handle)?;
    Ok(env.new_string(info).map_err(interop)?.into_raw())
}

#[no_mangle]
pub extern "system" fn Java_com_sdksotestjava_IntegrationHub_getFiscalInfo<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) -> jstring {
    let result = fiscal_info(&mut env, &this);
    or_throw(&mut env, result, ptr::null_mut())
}

/// Registration failures other than a stale handle terminate the VM: there
/// is no other way to report them, and silently dropping events is worse.
fn register(env: &mut JNIEnv, this: &JObject, channel: Channel) {
    let result = handle_of(env, this).and_then(|handle| {
        let gateway = Arc::new(JniGateway::from_env(env)?);
        hub().register_callback(handle, channel, gateway, config().target(channel))
    });
    match result {
        Ok(()) => {}
        Err(e @ BridgeError::StaleHandle(_)) => throw(env, &e),
        Err(e) => {
            error!(%channel, error = %e, "Callback registration failed");
            env.fatal_error(format!("tokenx-bridge: {e}"));
        }
    }
}

#[no_mangle]
pub extern "system" fn Java_com_sdksotestjava_IntegrationHub_setSerialInCallback<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) {
    register(&mut env, &this, Channel::SerialIn);
}

#[no_mangle]
pub extern "system" fn Java_com_sdksotestjava_IntegrationHub_setDeviceStateCallback<'local>(
    mut env: JNIEnv<'local>,
    this: JObject<'local>,
) {
    register(&mut env, &this, Channel::DeviceState);
}
