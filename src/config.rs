//! # Global engine configuration.
//!
//! [`Config`] defines the coordinator's behavior: where the snapshot and
//! subsystem blobs live, countdown defaults and caps, the grace intervals
//! around exec, the build toolchain invocation, and which environment
//! variables are carried across the process replacement.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use copyvisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.default_countdown = 30;
//! cfg.drain_grace = Duration::from_millis(250);
//!
//! assert_eq!(cfg.max_countdown, 300);
//! assert!(cfg.snapshot_path().ends_with("copyover.dat"));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable set to `1` in the successor process when it is
/// launched from a copyover. Its presence is one of the two recovery
/// triggers; its absence alongside a live snapshot file marks the file as a
/// stale artifact to be removed at startup.
pub const RECOVERY_ENV_VAR: &str = "COPYVISOR_RECOVERY";

/// File name of the primary snapshot, created under [`Config::data_dir`].
pub const SNAPSHOT_FILE: &str = "copyover.dat";

/// Global configuration for the copyover engine.
///
/// Controls on-disk paths, countdown behavior, exec grace intervals, the
/// build invocation, and environment preservation.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the primary snapshot and all subsystem blobs.
    pub data_dir: PathBuf,
    /// Default countdown in seconds when the operator passes zero.
    pub default_countdown: u32,
    /// Maximum countdown the operator surface accepts, seconds.
    pub max_countdown: u32,
    /// Capacity of the lifecycle event bus channel.
    pub bus_capacity: usize,
    /// Pause after the shutdown notice, before exec, letting in-flight
    /// writes drain into kernel buffers.
    pub drain_grace: Duration,
    /// Pause after spawning the successor, before the predecessor exits.
    pub child_start_grace: Duration,
    /// Soft budget for how long the world quiescence lock may be held
    /// before a warning is logged. Never aborts.
    pub lock_soft_budget: Duration,
    /// Toolchain command for the optional build step.
    pub build_command: String,
    /// Arguments for the build command.
    pub build_args: Vec<String>,
    /// Path of the freshly built executable to exec. `None` uses the
    /// current executable path.
    pub successor_path: Option<PathBuf>,
    /// Environment variable names copied into the snapshot and restored in
    /// the successor.
    pub preserved_env: Vec<String>,
    /// Maximum number of retained history records.
    pub history_cap: usize,
    /// Room users are re-seated into when their recorded room no longer
    /// resolves after recovery.
    pub fallback_room: i64,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `data_dir = "."`
    /// - `default_countdown = 10`, `max_countdown = 300`
    /// - `bus_capacity = 1024`
    /// - `drain_grace = 200ms`, `child_start_grace = 150ms`
    /// - `lock_soft_budget = 2s`
    /// - `build_command = "cargo build --release"`
    /// - `history_cap = 100`
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            default_countdown: 10,
            max_countdown: 300,
            bus_capacity: 1024,
            drain_grace: Duration::from_millis(200),
            child_start_grace: Duration::from_millis(150),
            lock_soft_budget: Duration::from_secs(2),
            build_command: "cargo".to_string(),
            build_args: vec!["build".to_string(), "--release".to_string()],
            successor_path: None,
            preserved_env: vec![
                "CONFIG_PATH".to_string(),
                "LOG_LEVEL".to_string(),
                "LOG_PATH".to_string(),
                "LOG_NOCOLOR".to_string(),
            ],
            history_cap: 100,
            fallback_room: 1,
        }
    }
}

impl Config {
    /// Full path of the primary snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    /// Full path of a subsystem's blob file.
    pub fn blob_path(&self, subsystem: &str) -> PathBuf {
        self.data_dir.join(format!("{subsystem}_copyover.dat"))
    }

    /// Returns a config rooted at the given data directory.
    pub fn with_data_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Normalizes an operator-requested countdown: zero becomes the
    /// default. Values above [`Config::max_countdown`] are the caller's
    /// responsibility to reject.
    pub fn effective_countdown(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.default_countdown
        } else {
            requested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_paths_are_per_subsystem() {
        let cfg = Config::with_data_dir("/tmp/mud");
        assert_eq!(
            cfg.blob_path("combat"),
            PathBuf::from("/tmp/mud/combat_copyover.dat")
        );
        assert_eq!(cfg.snapshot_path(), PathBuf::from("/tmp/mud/copyover.dat"));
    }

    #[test]
    fn zero_countdown_falls_to_default() {
        let cfg = Config::default();
        assert_eq!(cfg.effective_countdown(0), 10);
        assert_eq!(cfg.effective_countdown(45), 45);
    }
}
