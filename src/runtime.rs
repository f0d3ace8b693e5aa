//! Runtime gateway: the managed runtime as seen from native threads.
//!
//! A native thread must be attached to the runtime before it can call managed
//! code. [`RuntimeGateway`] exposes attach/detach plus one-time resolution of
//! callback targets; [`AttachScope`] pairs the two per invocation.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::callbacks::Channel;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Primitive kind of one managed callback parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    Bool,
    Text,
}

/// One marshaled callback argument. Text is already copied out of the SDK's
/// buffer; the gateway converts it to the runtime's string type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedArg<'a> {
    Int(i32),
    Bool(bool),
    Text(&'a str),
}

impl ManagedArg<'_> {
    pub fn kind(&self) -> ArgKind {
        match self {
            ManagedArg::Int(_) => ArgKind::Int,
            ManagedArg::Bool(_) => ArgKind::Bool,
            ManagedArg::Text(_) => ArgKind::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Statically addressable managed method that receives a channel's events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackTarget {
    /// Binary class name, e.g. `com/sdksotestjava/IntegrationHubTest`.
    pub class: String,
    pub method: String,
}

impl CallbackTarget {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for CallbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.method)
    }
}

// ---------------------------------------------------------------------------
// Gateway traits
// ---------------------------------------------------------------------------

/// A resolved managed callable. Only called on a thread that is attached.
pub trait ManagedCallable: Send + Sync {
    /// Invoke synchronously. Failures (pending exception, ...) are returned
    /// as-is; nothing is cleared or retried.
    fn call(&self, args: &[ManagedArg<'_>]) -> Result<()>;
}

/// Capability object for the hosting runtime. Not thread specific: one
/// gateway serves every thread.
pub trait RuntimeGateway: Send + Sync {
    /// Whether the calling thread already has a runtime context.
    fn is_current_thread_attached(&self) -> bool;

    fn attach_current_thread(&self) -> Result<()>;

    /// Only called by the invocation that attached this thread.
    fn detach_current_thread(&self);

    /// Resolve `target` for `channel`'s parameter list. Called once, at
    /// registration, on a thread that is attached.
    fn resolve(&self, target: &CallbackTarget, channel: Channel) -> Result<Box<dyn ManagedCallable>>;
}

// ---------------------------------------------------------------------------
// Attach scope
// ---------------------------------------------------------------------------

/// Ensures the current thread is attached for the lifetime of the scope.
///
/// Detaches on drop if and only if `enter` performed the attach, so a thread
/// attached by unrelated code is left attached. Drop also runs while
/// unwinding out of a failing handler.
#[must_use = "the thread detaches when the scope is dropped"]
pub struct AttachScope<'a> {
    gateway: &'a dyn RuntimeGateway,
    attached_here: bool,
}

impl<'a> AttachScope<'a> {
    pub fn enter(gateway: &'a dyn RuntimeGateway) -> Result<Self> {
        let attached_here = if gateway.is_current_thread_attached() {
            false
        } else {
            gateway.attach_current_thread()?;
            trace!("Attached native thread to runtime");
            true
        };
        Ok(Self {
            gateway,
            attached_here,
        })
    }

    pub fn attached_here(&self) -> bool {
        self.attached_here
    }
}

impl Drop for AttachScope<'_> {
    fn drop(&mut self) {
        if self.attached_here {
            self.gateway.detach_current_thread();
            trace!("Detached native thread from runtime");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
