//! Logging bootstrap and build info.
//!
//! The bridge is loaded into a host process (the JVM) that may already have
//! installed a `tracing` subscriber, so initialization is best effort and
//! runs at most once.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;

use serde_json::{json, Value};
use tracing::{debug, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

/// Name the Java side loads (`System.loadLibrary`); the cdylib is built
/// under it by the `integration-hub-jni` member.
pub const JNI_LIBRARY_NAME: &str = "IntegrationHubJNI";

/// Prefix of the rolling log files (`tokenx-bridge.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "tokenx-bridge";

static INIT: Once = Once::new();

/// Version and build identity, logged at load time.
pub fn about() -> Value {
    json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "gitSha": env!("BRIDGE_GIT_SHA"),
        "jniLibrary": JNI_LIBRARY_NAME,
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
}

/// Install the console layer and, if configured, a daily rolling file layer.
///
/// `RUST_LOG` wins over `config.filter`. Calling this again, or in a process
/// that already has a global subscriber, is a no-op.
pub fn init_logging(config: &LogConfig) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let file_layer = config.directory.as_deref().and_then(|dir| {
            if let Err(e) = fs::create_dir_all(dir) {
                eprintln!("tokenx-bridge: cannot create log dir {}: {e}", dir.display());
                return None;
            }
            prune_old_logs(dir, config.max_files);
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // Flushes on drop; the library stays loaded until process exit.
            std::mem::forget(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            )
        });

        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);

        let installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init();
        if installed.is_err() {
            debug!("Host already has a tracing subscriber, keeping it");
        }
    });
}

/// Bridge log files in `dir`, newest first.
fn bridge_log_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<(PathBuf, std::time::SystemTime)> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
                })
                .filter(|e| e.path().is_file())
                .map(|e| {
                    let modified = e
                        .metadata()
                        .and_then(|m| m.modified())
                        .unwrap_or(std::time::UNIX_EPOCH);
                    (e.path(), modified)
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    files.into_iter().map(|(p, _)| p).collect()
}

/// Keep the `keep` newest bridge log files in `dir`, delete the rest.
/// Files that do not belong to the bridge are never touched.
pub fn prune_old_logs(dir: &Path, keep: usize) {
    for path in bridge_log_files(dir).iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
