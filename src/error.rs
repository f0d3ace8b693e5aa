//! Error taxonomy for the bridge.
//!
//! Handle misuse is reported as [`BridgeError::StaleHandle`] instead of being
//! undefined behavior. Failures inside a managed handler are returned to the
//! caller of [`crate::callbacks::dispatch`] untouched; the trampolines drop
//! them.

use std::path::PathBuf;

use crate::callbacks::Channel;
use crate::handle::ConnectionHandle;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The handle was destroyed, or never issued by this bridge.
    #[error("stale connection handle {0}")]
    StaleHandle(ConnectionHandle),

    /// Text could not be handed to the native layer (interior NUL byte).
    #[error("invalid text for {what}: {reason}")]
    InvalidText { what: &'static str, reason: String },

    /// The managed callback target could not be resolved at registration.
    #[error("cannot resolve {channel} target {target}: {reason}")]
    TargetResolution {
        channel: Channel,
        target: String,
        reason: String,
    },

    /// The current native thread could not be attached to the runtime.
    #[error("runtime attach failed: {0}")]
    Attach(String),

    /// The managed handler failed (exception pending, not attached, ...).
    #[error("managed handler failed: {0}")]
    Invoke(String),

    /// Other runtime-interop failures (field access, string conversion).
    #[error("runtime interop failed: {0}")]
    Runtime(String),

    #[error("invalid bridge configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("cannot read bridge configuration {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
