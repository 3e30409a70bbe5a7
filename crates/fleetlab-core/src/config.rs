//! Configuration for the FleetLab device fleet simulator.
//!
//! Supports loading from YAML files with `FLEETLAB_*` environment variable
//! overrides, plus validation of the fleet definition before any runner is
//! launched.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main simulator configuration.
///
/// One instance drives the whole fleet: every configured device identity gets
/// its own connection, poller, and simulation loop built from these settings.
///
/// # Examples
///
/// ```no_run
/// use fleetlab_core::config::SimulatorConfig;
///
/// let config = SimulatorConfig::from_file("config/fleetlab.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Hub device endpoint (host:port)
    pub hub_addr: String,

    /// Optional edge gateway endpoint; when set, devices connect through it
    #[serde(default)]
    pub gateway_addr: Option<String>,

    /// Device identities to simulate
    #[serde(default)]
    pub devices: Vec<String>,

    /// Shared access key presented by every device on open
    #[serde(default)]
    pub shared_access_key: String,

    /// Update reported state each cycle
    #[serde(default = "default_true")]
    pub update_reported: bool,

    /// Send a telemetry event each cycle
    #[serde(default)]
    pub send_telemetry: bool,

    /// Poll for control messages each cycle
    #[serde(default = "default_true")]
    pub poll_control: bool,

    /// After receiving a control message, immediately poll again for a
    /// pending one and abandon it
    #[serde(default = "default_true")]
    pub check_pending_control: bool,

    /// Complete (acknowledge) received control messages
    #[serde(default = "default_true")]
    pub complete_control: bool,

    /// Route control polls through the coalescing poller
    #[serde(default = "default_true")]
    pub coalesced_poll: bool,

    /// Delay between simulation cycles, in milliseconds
    #[serde(default = "default_loop_delay_ms")]
    pub loop_delay_ms: u64,

    /// Stagger between device startups, in milliseconds
    #[serde(default = "default_kickoff_delay_ms")]
    pub kickoff_delay_ms: u64,

    /// Back-off after a transient hub communication error, in milliseconds
    #[serde(default = "default_comm_error_backoff_ms")]
    pub comm_error_backoff_ms: u64,

    /// Per-cycle control poll timeout, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Timeout for the follow-up pending-message poll, in milliseconds
    #[serde(default = "default_pending_poll_timeout_ms")]
    pub pending_poll_timeout_ms: u64,

    /// Operations slower than this are counted as delays, in milliseconds
    #[serde(default = "default_slow_op_threshold_ms")]
    pub slow_op_threshold_ms: u64,

    /// Connection establishment timeout, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Socket write timeout, in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Connect retry behavior
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Connect retry settings (exponential backoff with a cap).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Enable retry on connect failure
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Initial backoff, in milliseconds
    #[serde(default = "default_retry_initial_ms")]
    pub initial_backoff_ms: u64,
    /// Maximum backoff, in milliseconds
    #[serde(default = "default_retry_max_ms")]
    pub max_backoff_ms: u64,
    /// Backoff multiplier between attempts
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
    /// Maximum number of attempts (None = infinite)
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: Option<u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: default_retry_initial_ms(),
            max_backoff_ms: default_retry_max_ms(),
            multiplier: default_retry_multiplier(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_loop_delay_ms() -> u64 {
    5_000
}

fn default_kickoff_delay_ms() -> u64 {
    5_000
}

fn default_comm_error_backoff_ms() -> u64 {
    5_000
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_pending_poll_timeout_ms() -> u64 {
    200
}

fn default_slow_op_threshold_ms() -> u64 {
    4_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_write_timeout_ms() -> u64 {
    30_000
}

fn default_retry_initial_ms() -> u64 {
    100
}

fn default_retry_max_ms() -> u64 {
    10_000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_max_attempts() -> Option<u32> {
    Some(10)
}

impl SimulatorConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::load_failed(path.display().to_string(), e.to_string()))?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate: YAML file first, then
    /// `FLEETLAB_*` environment variables on top (`__` as the separator,
    /// e.g. `FLEETLAB_RETRY__ENABLED=false`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("FLEETLAB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::load_failed(path.display().to_string(), e.to_string()))?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    ///
    /// Checks that at least one device is configured, that device ids are
    /// unique and non-empty, and that the timing values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices.into());
        }

        let mut seen = std::collections::HashSet::new();
        for device_id in &self.devices {
            if device_id.trim().is_empty() {
                return Err(
                    ConfigError::invalid_value("devices", "device id must not be blank").into(),
                );
            }
            if !seen.insert(device_id.as_str()) {
                return Err(ConfigError::DuplicateDevice {
                    device_id: device_id.clone(),
                }
                .into());
            }
        }

        if self.hub_addr.trim().is_empty() {
            return Err(ConfigError::missing_field("hub_addr").into());
        }

        if self.shared_access_key.is_empty() {
            return Err(ConfigError::missing_field("shared_access_key").into());
        }

        if self.poll_timeout_ms == 0 {
            return Err(
                ConfigError::invalid_value("poll_timeout_ms", "must be greater than zero").into(),
            );
        }

        if self.retry.multiplier < 1.0 {
            return Err(
                ConfigError::invalid_value("retry.multiplier", "must be at least 1.0").into(),
            );
        }

        Ok(())
    }

    /// Parses a `;`/`,`-separated device list, trimming blanks.
    ///
    /// Used by the launcher's `--devices` override and by environments that
    /// can only carry a single string.
    pub fn parse_device_list(list: &str) -> Vec<String> {
        list.split([';', ','])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Endpoint a device should dial: the gateway when one is configured,
    /// the hub otherwise.
    pub fn device_endpoint(&self) -> &str {
        self.gateway_addr.as_deref().unwrap_or(&self.hub_addr)
    }

    /// Delay between simulation cycles.
    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }

    /// Stagger between device startups.
    pub fn kickoff_delay(&self) -> Duration {
        Duration::from_millis(self.kickoff_delay_ms)
    }

    /// Back-off after a transient hub communication error.
    pub fn comm_error_backoff(&self) -> Duration {
        Duration::from_millis(self.comm_error_backoff_ms)
    }

    /// Per-cycle control poll timeout.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Timeout for the follow-up pending-message poll.
    pub fn pending_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_poll_timeout_ms)
    }

    /// Threshold above which an operation counts as a delay.
    pub fn slow_op_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_op_threshold_ms)
    }
}
