//! tokenx-bridge: JVM bindings for the TokenX Connect POS SDK.
//!
//! Two halves:
//!
//! - **Handle bridge** ([`IntegrationHub`]): the Java `IntegrationHub` object
//!   holds an opaque [`ConnectionHandle`]; every call looks the native
//!   connection up in a handle table and forwards to the SDK ([`PosSdk`]).
//! - **Callback bridge** ([`callbacks`]): the SDK fires plain C callbacks on
//!   its own threads; the trampolines route them to the registered managed
//!   method, attaching the thread to the runtime for the duration of the call.
//!
//! The `Java_com_sdksotestjava_*` natives live in the `integration-hub-jni`
//! workspace member, built as `libIntegrationHubJNI`. The `linked-sdk`
//! feature binds the vendor library through a C ABI shim.

pub mod callbacks;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handle;
pub mod hub;
pub mod marshal;
pub mod runtime;
pub mod sdk;

#[cfg(test)]
mod test_support;

pub use callbacks::{CallbackContext, CallbackRegistry, Channel};
pub use config::{BridgeConfig, LogConfig};
pub use error::{BridgeError, Result};
pub use handle::{ConnectionHandle, HandleTable};
pub use hub::IntegrationHub;
pub use runtime::{AttachScope, CallbackTarget, ManagedArg, ManagedCallable, RuntimeGateway};
pub use sdk::simulated::SimulatedSdk;
pub use sdk::{ActiveDevice, PosSdk, RawConnection};
