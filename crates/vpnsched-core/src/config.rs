use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTROL_ADDRESS: &str = "127.0.0.1:7505";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_INTERVAL_SECS: u64 = 20 * 60; // periodic check cadence
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 30; // first check after start
pub const DEFAULT_LOG_MAX_BYTES: usize = 64 * 1024;

/// Top-level config (vpnsched.toml + VPNSCHED_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VpnschedConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Where the active schedule document lives and where it can be fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_path")]
    pub path: PathBuf,
    /// Remote document used by `vpnsched fetch` when no URL is given.
    pub url: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            path: default_schedule_path(),
            url: None,
        }
    }
}

/// Connection to the VPN control service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// `host:port` of the control service RPC endpoint.
    #[serde(default = "default_control_address")]
    pub address: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            address: default_control_address(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ControlConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Periodic trigger cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            initial_delay_secs: DEFAULT_INITIAL_DELAY_SECS,
        }
    }
}

impl TriggerConfig {
    pub fn interval(&self) -> Duration {
        // A zero interval would make tokio::time::interval panic.
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

/// Diagnostic log buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_path")]
    pub buffer_path: PathBuf,
    #[serde(default = "default_log_max_bytes")]
    pub max_bytes: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            buffer_path: default_log_path(),
            max_bytes: DEFAULT_LOG_MAX_BYTES,
        }
    }
}

fn default_control_address() -> String {
    DEFAULT_CONTROL_ADDRESS.to_string()
}
fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}
fn default_initial_delay_secs() -> u64 {
    DEFAULT_INITIAL_DELAY_SECS
}
fn default_log_max_bytes() -> usize {
    DEFAULT_LOG_MAX_BYTES
}
fn default_schedule_path() -> PathBuf {
    data_dir().join("schedule.csv")
}
fn default_log_path() -> PathBuf {
    data_dir().join("app_logs.txt")
}

/// `~/.vpnsched`, falling back to `./.vpnsched` when HOME is unset.
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".vpnsched")
}

impl VpnschedConfig {
    /// Load config from a TOML file with VPNSCHED_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `VPNSCHED_CONTROL__ADDRESS=10.0.0.2:7505`. A missing file is not an
    /// error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);

        let config: VpnschedConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("VPNSCHED_").split("__"))
            .extract()
            .map_err(|e| crate::error::VpnschedError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> PathBuf {
    data_dir().join("vpnsched.toml")
}
