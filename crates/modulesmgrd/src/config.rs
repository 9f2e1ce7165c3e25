//! Configuration file support for modulesmgrd
//!
//! Loads and validates modulesmgrd configuration from TOML files.
//! Default location: /etc/sonic/modulesmgrd.conf

use crate::error::{ModulesMgmtError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/modulesmgrd.conf";

/// Platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Root of the per-ASIC module attribute tree
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// SAI profile holding the independent module mode switch
    #[serde(default = "default_sai_profile_path")]
    pub sai_profile_path: PathBuf,

    /// Number of physical ports; discovered from sysfs when unset
    #[serde(default)]
    pub port_count: Option<usize>,

    /// Lanes per port, used by the `{eth}` template placeholder
    #[serde(default = "default_port_breakout")]
    pub port_breakout: usize,
}

/// Attribute path templates, relative to `platform.sysfs_root`.
///
/// `{port}` expands to the module index, `{eth}` to the module index
/// multiplied by `platform.port_breakout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeTemplates {
    #[serde(default = "default_legacy_presence")]
    pub legacy_presence: String,

    #[serde(default = "default_presence")]
    pub presence: String,

    #[serde(default = "default_power_good")]
    pub power_good: String,

    #[serde(default = "default_power_on")]
    pub power_on: String,

    #[serde(default = "default_hw_reset")]
    pub hw_reset: String,

    #[serde(default = "default_power_limit")]
    pub power_limit: String,

    #[serde(default = "default_control")]
    pub control: String,

    #[serde(default = "default_frequency")]
    pub frequency: String,

    /// Directory holding the module EEPROM pages
    #[serde(default = "default_eeprom_pages")]
    pub eeprom_pages: String,
}

/// Engine timing, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Minimum wait after power-on/reset before EEPROM reads are trusted
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Settle timer wake-up period
    #[serde(default = "default_timer_interval")]
    pub timer_interval_ms: u64,

    /// Bounded wait on the edge-event multiplexer
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,

    /// Static sweep back-off when every remaining port is parked
    #[serde(default = "default_idle_sleep")]
    pub idle_sleep_ms: u64,

    /// Result channel enqueue timeout
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
}

/// Module classification policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// SFF-8024 identifiers driven in software-controlled mode
    #[serde(default = "default_supported_module_ids")]
    pub supported_module_ids: Vec<u8>,

    /// Reset pulses allowed for a module whose identifier reads back empty
    #[serde(default = "default_max_eeprom_retries")]
    pub max_eeprom_retries: u32,
}

/// STATE_DB instance of one front-end namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Namespace name; empty for the default namespace
    #[serde(default)]
    pub name: String,

    /// Redis host
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Redis database number for STATE_DB
    #[serde(default = "default_state_db_number")]
    pub state_db: u32,
}

/// Result channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Maximum queued change-sets
    #[serde(default = "default_channel_capacity")]
    pub capacity: usize,
}

/// Complete modulesmgrd configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesMgrConfig {
    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub attributes: AttributeTemplates,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    /// Front-end namespaces the STATE_DB rows are replicated to
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<NamespaceConfig>,

    #[serde(default)]
    pub channel: ChannelConfig,
}

// Default functions
fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/module/sx_core/asic0")
}

fn default_sai_profile_path() -> PathBuf {
    PathBuf::from("/usr/share/sonic/hwsku/sai.profile")
}

fn default_port_breakout() -> usize {
    1
}

fn default_legacy_presence() -> String {
    "module{port}/present".to_string()
}

fn default_presence() -> String {
    "module{port}/hw_present".to_string()
}

fn default_power_good() -> String {
    "module{port}/power_good".to_string()
}

fn default_power_on() -> String {
    "module{port}/power_on".to_string()
}

fn default_hw_reset() -> String {
    "module{port}/hw_reset".to_string()
}

fn default_power_limit() -> String {
    "module{port}/power_limit".to_string()
}

fn default_control() -> String {
    "module{port}/control".to_string()
}

fn default_frequency() -> String {
    "module{port}/frequency".to_string()
}

fn default_eeprom_pages() -> String {
    "module{port}/eeprom/pages".to_string()
}

fn default_settle_delay() -> u64 {
    3000
}

fn default_timer_interval() -> u64 {
    1000
}

fn default_poll_timeout() -> u64 {
    1000
}

fn default_idle_sleep() -> u64 {
    1000
}

fn default_publish_timeout() -> u64 {
    1000
}

fn default_supported_module_ids() -> Vec<u8> {
    // QSFP-DD and OSFP
    vec![24, 25]
}

fn default_max_eeprom_retries() -> u32 {
    4
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_state_db_number() -> u32 {
    6
}

fn default_namespaces() -> Vec<NamespaceConfig> {
    vec![NamespaceConfig::default()]
}

fn default_channel_capacity() -> usize {
    16
}

// Default implementations
impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            sysfs_root: default_sysfs_root(),
            sai_profile_path: default_sai_profile_path(),
            port_count: None,
            port_breakout: default_port_breakout(),
        }
    }
}

impl Default for AttributeTemplates {
    fn default() -> Self {
        Self {
            legacy_presence: default_legacy_presence(),
            presence: default_presence(),
            power_good: default_power_good(),
            power_on: default_power_on(),
            hw_reset: default_hw_reset(),
            power_limit: default_power_limit(),
            control: default_control(),
            frequency: default_frequency(),
            eeprom_pages: default_eeprom_pages(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            timer_interval_ms: default_timer_interval(),
            poll_timeout_ms: default_poll_timeout(),
            idle_sleep_ms: default_idle_sleep(),
            publish_timeout_ms: default_publish_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn timer_interval(&self) -> Duration {
        Duration::from_millis(self.timer_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            supported_module_ids: default_supported_module_ids(),
            max_eeprom_retries: default_max_eeprom_retries(),
        }
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            state_db: default_state_db_number(),
        }
    }
}

impl NamespaceConfig {
    /// Returns the Redis connection URI for this namespace's STATE_DB.
    pub fn uri(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.state_db
        )
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: default_channel_capacity(),
        }
    }
}

impl Default for ModulesMgrConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig::default(),
            attributes: AttributeTemplates::default(),
            timing: TimingConfig::default(),
            policy: PolicyConfig::default(),
            namespaces: default_namespaces(),
            channel: ChannelConfig::default(),
        }
    }
}

impl ModulesMgrConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                ModulesMgmtError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ModulesMgmtError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Namespace names, in configuration order.
    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.iter().map(|ns| ns.name.clone()).collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let timing = &self.timing;
        if timing.timer_interval_ms == 0 || timing.poll_timeout_ms == 0 {
            return Err(ModulesMgmtError::Config(
                "timer_interval_ms and poll_timeout_ms must be > 0".to_string(),
            ));
        }

        if timing.settle_delay_ms < timing.timer_interval_ms {
            return Err(ModulesMgmtError::Config(
                "settle_delay_ms must not be shorter than timer_interval_ms".to_string(),
            ));
        }

        if self.policy.supported_module_ids.is_empty() {
            return Err(ModulesMgmtError::Config(
                "supported_module_ids must not be empty".to_string(),
            ));
        }

        if self.namespaces.is_empty() {
            return Err(ModulesMgmtError::Config(
                "at least one namespace is required".to_string(),
            ));
        }

        if self.platform.port_breakout == 0 {
            return Err(ModulesMgmtError::Config(
                "port_breakout must be > 0".to_string(),
            ));
        }

        if self.channel.capacity == 0 {
            return Err(ModulesMgmtError::Config(
                "channel capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
