//! Bridge configuration.
//!
//! Defaults match the shipped Java side (`com.sdksotestjava`). Hosts that
//! rename the callback class or methods pass a JSON override; any field left
//! out keeps its default.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::callbacks::Channel;
use crate::error::{BridgeError, Result};
use crate::runtime::CallbackTarget;

pub const DEFAULT_CALLBACK_CLASS: &str = "com/sdksotestjava/IntegrationHubTest";
pub const DEFAULT_LOG_FILTER: &str = "info,tokenx_bridge=debug";
/// Environment variable naming a JSON config file, read once at load time.
pub const CONFIG_PATH_ENV: &str = "TOKENX_BRIDGE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub serial_in_target: CallbackTarget,
    pub device_state_target: CallbackTarget,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for the daily rolling log file. Console only when unset.
    pub directory: Option<PathBuf>,
    /// Rolled files kept in `directory`.
    pub max_files: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial_in_target: CallbackTarget::new(DEFAULT_CALLBACK_CLASS, "serialInCallback"),
            device_state_target: CallbackTarget::new(DEFAULT_CALLBACK_CLASS, "deviceStateCallback"),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
            max_files: 7,
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|source| BridgeError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Config from the file named by [`CONFIG_PATH_ENV`], defaults if unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Managed method that receives `channel`'s events.
    pub fn target(&self, channel: Channel) -> &CallbackTarget {
        match channel {
            Channel::SerialIn => &self.serial_in_target,
            Channel::DeviceState => &self.device_state_target,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
