use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::overlay::manager::ManagerConfig;
use crate::overlay::process::NativeLauncher;
use crate::overlay::sync::SyncConfig;
use crate::overlay::tracker::TrackerConfig;

pub const SETTINGS_ENV: &str = "OVERLAY_SETTINGS";
pub const SETTINGS_FILE: &str = "overlay_settings.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrackerSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Skip windows that existed before launch when matching by title or class.
    #[serde(default = "default_true")]
    pub ignore_preexisting: bool,
    /// Also accept windows opened by child processes of the launched one.
    #[serde(default = "default_true")]
    pub include_child_processes: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            ignore_preexisting: true,
            include_child_processes: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OverlaySettings {
    /// When enabled the logger runs at debug level and honours `RUST_LOG`.
    #[serde(default)]
    pub debug_logging: bool,
    /// Write logs to this file instead of stdout.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default = "default_stop_join_timeout_ms")]
    pub stop_join_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    150
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_stop_join_timeout_ms() -> u64 {
    2_000
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            log_file: None,
            tracker: TrackerSettings::default(),
            sync: SyncConfig::default(),
            stop_join_timeout_ms: default_stop_join_timeout_ms(),
        }
    }
}

impl OverlaySettings {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// `$OVERLAY_SETTINGS`, then `overlay_settings.json` in the working
    /// directory, then the per-user config directory.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(SETTINGS_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(path);
        }
        let local = PathBuf::from(SETTINGS_FILE);
        if local.exists() {
            return local;
        }
        dirs_next::config_dir()
            .map(|dir| dir.join("window_overlay").join(SETTINGS_FILE))
            .unwrap_or(local)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        let poll_interval = Duration::from_millis(self.tracker.poll_interval_ms.max(10));
        ManagerConfig {
            tracker: TrackerConfig {
                poll_interval,
                timeout: Duration::from_millis(self.tracker.timeout_ms).max(poll_interval),
                ignore_preexisting: self.tracker.ignore_preexisting,
            },
            stop_join_timeout: Duration::from_millis(self.stop_join_timeout_ms.max(100)),
        }
    }

    pub fn launcher(&self) -> NativeLauncher {
        NativeLauncher {
            include_child_processes: self.tracker.include_child_processes,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        self.sync.sanitized()
    }
}
