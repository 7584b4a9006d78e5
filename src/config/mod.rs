// ABOUTME: Configuration types and parsing for drydock.yml.
// ABOUTME: Handles YAML parsing, env var interpolation, defaults and validation.

mod backend;
mod deserialize;
mod env_value;
mod init;

pub use backend::{BackendConfig, ComposeConfig, HelmConfig};
pub use env_value::EnvValue;
pub use init::init_config;

use crate::error::{Error, Result};
use deserialize::deserialize_command_option;
use nonempty::NonEmpty;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "drydock.yml";
pub const CONFIG_FILENAME_ALT: &str = "drydock.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".drydock/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: EnvValue,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    #[serde(default)]
    pub lease: LeaseConfig,

    #[serde(default)]
    pub staging: StagingConfig,

    pub backend: BackendConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_lease_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Sweep expired leases whenever a poll finds no work.
    #[serde(default = "default_true")]
    pub sweep_on_idle: bool,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            timeout: default_lease_timeout(),
            sweep_on_idle: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_true")]
    pub secure_wipe: bool,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
            secure_wipe: true,
        }
    }
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("drydock")
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_flag_path")]
    pub flag_path: PathBuf,
    /// Run after each toggle, e.g. `[nginx, -s, reload]`.
    #[serde(default, deserialize_with = "deserialize_command_option")]
    pub reload_command: Option<NonEmpty<String>>,
    #[serde(default = "default_hook_timeout", with = "humantime_serde")]
    pub reload_timeout: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flag_path: default_flag_path(),
            reload_command: None,
            reload_timeout: default_hook_timeout(),
        }
    }
}

fn default_flag_path() -> PathBuf {
    PathBuf::from("/tmp/maintenance-mode")
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Script run once per finished task.
    #[serde(default)]
    pub hook: Option<PathBuf>,
    #[serde(default = "default_hook_timeout", with = "humantime_serde")]
    pub hook_timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            hook: None,
            hook_timeout: default_hook_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_lease_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_hook_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        Self::load(&Self::find(dir)?)
    }

    /// First config file present in `dir`.
    pub fn find(dir: &Path) -> Result<PathBuf> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        candidates
            .into_iter()
            .find(|path| path.exists())
            .ok_or_else(|| Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Reject settings that would let healthy leases expire or spin the loop.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("poll_interval", self.poll_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("lease.timeout", self.lease.timeout),
            ("backend timeout", self.backend.timeout()),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::InvalidConfig(format!("{name} must be greater than zero")));
        }

        if self.heartbeat_interval >= self.lease.timeout {
            return Err(Error::InvalidConfig(format!(
                "heartbeat_interval ({:?}) must be shorter than lease.timeout ({:?})",
                self.heartbeat_interval, self.lease.timeout
            )));
        }

        if self.store.max_connections == 0 {
            return Err(Error::InvalidConfig(
                "store.max_connections must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
