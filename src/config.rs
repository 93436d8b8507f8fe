//! Global configuration parsing and validation.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Well-known control port the rendering client dials.
pub const DEFAULT_PORT: u16 = 22207;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_ipc_name() -> String {
    "scene-sync".into()
}

fn default_pattern() -> String {
    "*.kzb".into()
}

/// Client executable and the directory it runs in.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Path to the rendering client executable.
    #[serde(default)]
    pub executable: PathBuf,
    /// Working directory for the client; asset packages are staged here.
    /// Defaults to the executable's parent directory.
    #[serde(default)]
    pub working_dir: PathBuf,
    /// Extra arguments passed before the asset file name.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Asset package watch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WatchConfig {
    /// Whether the folder watcher starts with the harness.
    #[serde(default)]
    pub enabled: bool,
    /// Folder watched recursively for asset packages.
    #[serde(default)]
    pub folder: PathBuf,
    /// File-name glob an asset package must match.
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder: PathBuf::new(),
            pattern: default_pattern(),
        }
    }
}

/// Locations of harness data files.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DataConfig {
    /// Directory the baseline loader reads. Defaults to the client working dir.
    #[serde(default)]
    pub interface_dir: Option<PathBuf>,
    /// Directory holding precondition scripts.
    #[serde(default)]
    pub precondition_dir: Option<PathBuf>,
    /// Directory screenshots are requested into.
    #[serde(default)]
    pub screenshot_dir: Option<PathBuf>,
}

/// Delays and thresholds, all in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
#[allow(clippy::struct_field_names)]
pub struct TimingConfig {
    /// Liveness timer raced against each socket read.
    pub liveness_interval_ms: u64,
    /// Spacing between replayed overlay commands.
    pub replay_spacing_ms: u64,
    /// Spacing between precondition commands.
    pub precondition_spacing_ms: u64,
    /// Window in which a repeated watch signal for the same path is dropped.
    pub debounce_window_ms: u64,
    /// Wait after accepting a watch signal before acting on it.
    pub settle_delay_ms: u64,
    /// How long to wait for a killed client to exit.
    pub kill_grace_ms: u64,
    /// Wait after spawning before replaying the overlay.
    pub resync_delay_ms: u64,
    /// Run time at or under which an exit counts as an immediate crash.
    pub crash_threshold_ms: u64,
    /// Back-off after a failed accept.
    pub accept_retry_ms: u64,
    /// Longest a single write to the client may take before the client is
    /// dropped.
    pub send_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            liveness_interval_ms: 1000,
            replay_spacing_ms: 200,
            precondition_spacing_ms: 500,
            debounce_window_ms: 5000,
            settle_delay_ms: 500,
            kill_grace_ms: 3000,
            resync_delay_ms: 2000,
            crash_threshold_ms: 3000,
            accept_retry_ms: 1000,
            send_timeout_ms: 2000,
        }
    }
}

impl TimingConfig {
    /// Liveness probe interval.
    #[must_use]
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    /// Replay inter-command spacing.
    #[must_use]
    pub fn replay_spacing(&self) -> Duration {
        Duration::from_millis(self.replay_spacing_ms)
    }

    /// Precondition inter-command spacing.
    #[must_use]
    pub fn precondition_spacing(&self) -> Duration {
        Duration::from_millis(self.precondition_spacing_ms)
    }

    /// Watch debounce window.
    #[must_use]
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    /// Settle delay before a respawn cycle acts.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Grace period for a killed client.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Delay between spawn and replay.
    #[must_use]
    pub fn resync_delay(&self) -> Duration {
        Duration::from_millis(self.resync_delay_ms)
    }

    /// Immediate-crash threshold.
    #[must_use]
    pub fn crash_threshold(&self) -> Duration {
        Duration::from_millis(self.crash_threshold_ms)
    }

    /// Accept retry back-off.
    #[must_use]
    pub fn accept_retry(&self) -> Duration {
        Duration::from_millis(self.accept_retry_ms)
    }

    /// Per-write send deadline.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Global configuration parsed from `scene-sync.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// TCP control port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address the control listener binds.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Named pipe / Unix socket identifier for `scene-sync-ctl`.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Client executable settings.
    #[serde(default)]
    pub client: ClientConfig,
    /// Asset watch settings.
    #[serde(default)]
    pub watch: WatchConfig,
    /// Data directories.
    #[serde(default)]
    pub data: DataConfig,
    /// Delays and thresholds.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: default_bind_address(),
            ipc_name: default_ipc_name(),
            client: ClientConfig::default(),
            watch: WatchConfig::default(),
            data: DataConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and fill derived paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address the control server binds.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Directory handed to the baseline loader.
    #[must_use]
    pub fn interface_dir(&self) -> &Path {
        self.data
            .interface_dir
            .as_deref()
            .unwrap_or(&self.client.working_dir)
    }

    /// Directory holding precondition scripts.
    #[must_use]
    pub fn precondition_dir(&self) -> PathBuf {
        self.data
            .precondition_dir
            .clone()
            .unwrap_or_else(|| self.client.working_dir.join("PreCondition"))
    }

    /// Directory screenshots are written to by the client.
    #[must_use]
    pub fn screenshot_dir(&self) -> PathBuf {
        self.data
            .screenshot_dir
            .clone()
            .unwrap_or_else(|| self.client.working_dir.join("Screenshots"))
    }

    fn validate(&mut self) -> Result<()> {
        if self.client.working_dir.as_os_str().is_empty() {
            if let Some(parent) = self.client.executable.parent() {
                self.client.working_dir = parent.to_path_buf();
            }
        }

        if self.watch.enabled && self.watch.folder.as_os_str().is_empty() {
            return Err(AppError::Config(
                "watch.folder must be set when watch.enabled is true".into(),
            ));
        }

        glob::Pattern::new(&self.watch.pattern).map_err(|err| {
            AppError::Config(format!("watch.pattern '{}' invalid: {err}", self.watch.pattern))
        })?;

        if self.timing.liveness_interval_ms == 0 {
            return Err(AppError::Config(
                "timing.liveness_interval_ms must be greater than zero".into(),
            ));
        }

        if self.timing.send_timeout_ms == 0 {
            return Err(AppError::Config(
                "timing.send_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        Ok(())
    }
}
