//! Callback bridge: delivers SDK events from native threads to managed
//! handlers.
//!
//! The SDK accepts a bare function pointer per channel, with no user data, so
//! the installed trampolines are fixed `extern "C"` functions that look up the
//! channel's [`CallbackContext`] in the process-wide [`CallbackRegistry`] and
//! hand it to [`dispatch`] explicitly.
//!
//! Replacement is atomic with respect to invocation start: an invocation
//! snapshots the current context (`Arc` clone under a read lock) and runs to
//! completion against that snapshot, which keeps the old target alive until
//! it returns. Every invocation that starts after a swap sees the new target.

use std::ffi::{c_char, c_int};
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::{info, trace, warn};

use crate::error::{BridgeError, Result};
use crate::handle::ConnectionHandle;
use crate::marshal;
use crate::runtime::{ArgKind, AttachScope, CallbackTarget, ManagedArg, ManagedCallable, RuntimeGateway};

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Class of asynchronous SDK event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `(tag: int, payload: text)`
    SerialIn,
    /// `(connected: bool, device_id: text)`
    DeviceState,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::SerialIn, Channel::DeviceState];

    pub fn name(self) -> &'static str {
        match self {
            Channel::SerialIn => "serial-in",
            Channel::DeviceState => "device-state",
        }
    }

    /// Parameter list every target for this channel must accept.
    pub fn params(self) -> &'static [ArgKind] {
        match self {
            Channel::SerialIn => &[ArgKind::Int, ArgKind::Text],
            Channel::DeviceState => &[ArgKind::Bool, ArgKind::Text],
        }
    }

    /// JNI method descriptor of the target (static, returns void).
    pub fn descriptor(self) -> &'static str {
        match self {
            Channel::SerialIn => "(ILjava/lang/String;)V",
            Channel::DeviceState => "(ZLjava/lang/String;)V",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything an invocation needs, built once at registration.
pub struct CallbackContext {
    channel: Channel,
    owner: ConnectionHandle,
    target: CallbackTarget,
    gateway: Arc<dyn RuntimeGateway>,
    callable: Box<dyn ManagedCallable>,
}

impl CallbackContext {
    /// Resolve `target` through `gateway`. Fails with
    /// [`BridgeError::TargetResolution`] if the target does not exist or
    /// does not accept the channel's parameters.
    pub fn resolve(
        channel: Channel,
        owner: ConnectionHandle,
        target: CallbackTarget,
        gateway: Arc<dyn RuntimeGateway>,
    ) -> Result<Self> {
        let callable = gateway.resolve(&target, channel)?;
        Ok(Self {
            channel,
            owner,
            target,
            gateway,
            callable,
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Connection the registration was made against.
    pub fn owner(&self) -> ConnectionHandle {
        self.owner
    }

    pub fn target(&self) -> &CallbackTarget {
        &self.target
    }
}

impl fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackContext")
            .field("channel", &self.channel)
            .field("owner", &self.owner)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type Slot = RwLock<Option<Arc<CallbackContext>>>;

/// One slot per channel. Single writer (registration) / many readers
/// (trampolines).
pub struct CallbackRegistry {
    serial_in: Slot,
    device_state: Slot,
}

static GLOBAL_REGISTRY: CallbackRegistry = CallbackRegistry::new();

impl CallbackRegistry {
    pub const fn new() -> Self {
        Self {
            serial_in: RwLock::new(None),
            device_state: RwLock::new(None),
        }
    }

    /// The registry the trampolines read.
    pub fn global() -> &'static CallbackRegistry {
        &GLOBAL_REGISTRY
    }

    fn slot(&self, channel: Channel) -> &Slot {
        match channel {
            Channel::SerialIn => &self.serial_in,
            Channel::DeviceState => &self.device_state,
        }
    }

    /// Swap `context` in for its channel, returning the replaced context.
    pub fn install(&self, context: CallbackContext) -> Option<Arc<CallbackContext>> {
        let channel = context.channel;
        let mut slot = self
            .slot(channel)
            .write()
            .unwrap_or_else(|e| e.into_inner());
        slot.replace(Arc::new(context))
    }

    /// Snapshot of the channel's current context.
    pub fn current(&self, channel: Channel) -> Option<Arc<CallbackContext>> {
        self.slot(channel)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_registered(&self, channel: Channel) -> bool {
        self.current(channel).is_some()
    }

    /// Drop every registration made against `owner`. Returns how many were
    /// cleared. Invocations already holding a snapshot finish normally.
    pub fn clear_owned_by(&self, owner: ConnectionHandle) -> usize {
        let mut cleared = 0;
        for channel in Channel::ALL {
            let mut slot = self
                .slot(channel)
                .write()
                .unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().is_some_and(|ctx| ctx.owner == owner) {
                *slot = None;
                cleared += 1;
            }
        }
        cleared
    }

    /// Clear every slot.
    pub fn reset(&self) {
        for channel in Channel::ALL {
            *self
                .slot(channel)
                .write()
                .unwrap_or_else(|e| e.into_inner()) = None;
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Deliver one event to `context`'s handler on the current thread.
///
/// Attaches the thread for the duration of the call if it is not attached
/// already, and detaches before returning (also when the handler unwinds).
/// The handler's own failure is returned untouched. Arguments that do not
/// match the channel's parameter list are rejected before attaching.
pub fn dispatch(context: &CallbackContext, args: &[ManagedArg<'_>]) -> Result<()> {
    if !args.iter().map(ManagedArg::kind).eq(context.channel.params().iter().copied()) {
        return Err(BridgeError::Invoke(format!(
            "{} handler expects {:?}",
            context.channel,
            context.channel.params()
        )));
    }
    let _scope = AttachScope::enter(context.gateway.as_ref())?;
    context.callable.call(args)
}

fn deliver(channel: Channel, args: &[ManagedArg<'_>]) {
    let Some(context) = CallbackRegistry::global().current(channel) else {
        trace!(%channel, "Event dropped, no registration");
        return;
    };
    match dispatch(&context, args) {
        Err(BridgeError::Attach(reason)) => {
            warn!(%channel, reason = %reason, "Event dropped, cannot attach SDK thread");
        }
        // Handler failures belong to the runtime.
        Err(_) | Ok(()) => {}
    }
}

/// Installed with the SDK for [`Channel::SerialIn`].
pub extern "C" fn serial_in_trampoline(tag: c_int, payload: *const c_char) {
    // SAFETY: the SDK passes a NUL-terminated buffer valid for this call.
    let payload = unsafe { marshal::from_native("serial-in payload", payload) };
    deliver(
        Channel::SerialIn,
        &[ManagedArg::Int(tag), ManagedArg::Text(&payload)],
    );
}

/// Installed with the SDK for [`Channel::DeviceState`].
pub extern "C" fn device_state_trampoline(connected: bool, device_id: *const c_char) {
    // SAFETY: as above.
    let device_id = unsafe { marshal::from_native("device id", device_id) };
    deliver(
        Channel::DeviceState,
        &[ManagedArg::Bool(connected), ManagedArg::Text(&device_id)],
    );
}

/// Log a registration swap.
pub(crate) fn log_installed(channel: Channel, owner: ConnectionHandle, target: &CallbackTarget, replaced: Option<&CallbackContext>) {
    match replaced {
        Some(old) => info!(
            %channel,
            %owner,
            target = %target,
            previous_owner = %old.owner,
            previous_target = %old.target,
            "Callback registration replaced"
        ),
        None => info!(%channel, %owner, target = %target, "Callback registered"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
