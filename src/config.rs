use crate::prelude::*;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::collections::HashSet;
use std::time::Duration;

/// The device refuses to be polled faster than this.
pub const MIN_POLL_INTERVAL_FLOOR: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub devices: Vec<Device>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Seconds between status summaries in the log, 0 disables them
    #[serde(default = "Config::default_status_interval")]
    pub status_interval: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Host,
    Follower,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Follower => write!(f, "follower"),
        }
    }
}

// Device {{{
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Device {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub name: String,
    pub host: String,
    #[serde(default = "Config::default_port")]
    pub port: u16,
    #[serde(default = "Config::default_unit_id")]
    pub unit_id: u8,
    #[serde(default)]
    pub role: Role,

    pub max_charge_power_kw: Option<f64>,
    pub max_discharge_power_kw: Option<f64>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub min_poll_interval: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub max_poll_interval: Option<Duration>,

    pub failure_threshold: Option<u32>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub staleness_threshold: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub unavailable_after: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub recovery_cooldown: Option<Duration>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub read_timeout: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "command_interval_ms")]
    pub command_interval: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "write_settle_ms")]
    pub write_settle: Option<Duration>,
    pub read_retries: Option<u32>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "reconnect_backoff_initial_ms")]
    pub reconnect_backoff_initial: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub reconnect_backoff_max: Option<Duration>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub dynamic_export_interval: Option<Duration>,
    pub dynamic_export_gain: Option<f64>,
}

impl Device {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn max_charge_power_kw(&self) -> Option<f64> {
        self.max_charge_power_kw
    }

    pub fn max_discharge_power_kw(&self) -> Option<f64> {
        self.max_discharge_power_kw
    }

    pub fn min_poll_interval(&self) -> Duration {
        self.min_poll_interval.unwrap_or(MIN_POLL_INTERVAL_FLOOR)
    }

    pub fn max_poll_interval(&self) -> Duration {
        self.max_poll_interval.unwrap_or(Duration::from_secs(300))
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold.unwrap_or(5)
    }

    // values older than this are served but flagged stale
    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold.unwrap_or(Duration::from_secs(600))
    }

    // values older than this are not served at all
    pub fn unavailable_after(&self) -> Duration {
        self.unavailable_after.unwrap_or(Duration::from_secs(12 * 3600))
    }

    pub fn recovery_cooldown(&self) -> Duration {
        self.recovery_cooldown.unwrap_or(Duration::from_secs(300))
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout.unwrap_or(Duration::from_secs(10))
    }

    pub fn command_interval(&self) -> Duration {
        self.command_interval.unwrap_or(Duration::from_millis(350))
    }

    pub fn write_settle(&self) -> Duration {
        self.write_settle.unwrap_or(Duration::from_millis(100))
    }

    pub fn read_retries(&self) -> u32 {
        self.read_retries.unwrap_or(2)
    }

    pub fn reconnect_backoff_initial(&self) -> Duration {
        self.reconnect_backoff_initial.unwrap_or(Duration::from_millis(500))
    }

    pub fn reconnect_backoff_max(&self) -> Duration {
        self.reconnect_backoff_max.unwrap_or(Duration::from_secs(60))
    }

    pub fn dynamic_export_interval(&self) -> Duration {
        self.dynamic_export_interval.unwrap_or(Duration::from_secs(10))
    }

    pub fn dynamic_export_gain(&self) -> f64 {
        self.dynamic_export_gain.unwrap_or(1.0)
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|err| anyhow!("config.rs:error parsing {}: {}", file, err))?;

        config.validate()?;
        Ok(config)
    }

    /// Logs the loaded settings, once logging is set up.
    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!(
            "  Devices: {} configured, {} enabled",
            self.devices.len(),
            self.enabled_devices().count()
        );
        for (i, device) in self.devices.iter().enumerate() {
            info!("    Device[{}] {}:", i, device.name);
            info!("      Enabled: {}", device.enabled);
            info!("      Address: {}:{} unit {}", device.host, device.port, device.unit_id);
            info!("      Role: {}", device.role);
            if device.role == Role::Host {
                info!(
                    "      Max Charge/Discharge: {:?}/{:?} kW",
                    device.max_charge_power_kw, device.max_discharge_power_kw
                );
            }
            info!(
                "      Poll Interval: {}s..{}s",
                device.min_poll_interval().as_secs(),
                device.max_poll_interval().as_secs()
            );
            info!("      Failure Threshold: {}", device.failure_threshold());
            info!("      Staleness Threshold: {}s", device.staleness_threshold().as_secs());
            info!("      Read Timeout: {}s", device.read_timeout().as_secs());
        }
        info!("  Log Level: {}", self.loglevel);
    }

    pub fn enabled_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| d.enabled())
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    pub fn status_interval(&self) -> Option<Duration> {
        match self.status_interval {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled_devices().count() == 0 {
            bail!("config.rs:no enabled devices configured");
        }

        let mut names = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            if device.name.is_empty() {
                bail!("devices[{}].name cannot be empty", i);
            }
            if !names.insert(device.name.as_str()) {
                bail!("devices[{}].name {} is not unique", i, device.name);
            }
            if !device.enabled {
                continue;
            }

            if device.host.is_empty() {
                return Err(anyhow!("config.rs:device {} host cannot be empty", device.name));
            }
            if device.port == 0 {
                bail!("devices[{}].port must be between 1 and 65535", i);
            }
            if device.min_poll_interval() < MIN_POLL_INTERVAL_FLOOR {
                bail!(
                    "device {}: min_poll_interval must be at least {}s",
                    device.name,
                    MIN_POLL_INTERVAL_FLOOR.as_secs()
                );
            }
            if device.max_poll_interval() < device.min_poll_interval() {
                bail!("device {}: max_poll_interval is below min_poll_interval", device.name);
            }
            if device.failure_threshold() == 0 {
                bail!("device {}: failure_threshold must be at least 1", device.name);
            }
            if device.staleness_threshold() > device.unavailable_after() {
                bail!("device {}: staleness_threshold exceeds unavailable_after", device.name);
            }
            if device.read_timeout().is_zero() {
                return Err(anyhow!("config.rs:device {} has invalid read timeout: 0", device.name));
            }

            if device.role == Role::Host {
                for (key, limit) in [
                    ("max_charge_power_kw", device.max_charge_power_kw),
                    ("max_discharge_power_kw", device.max_discharge_power_kw),
                ] {
                    match limit {
                        None => bail!("device {}: {} is required for host devices", device.name, key),
                        Some(kw) if !(kw.is_finite() && kw >= 0.5) => {
                            bail!("device {}: {} must be at least 0.5", device.name, key)
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        Ok(())
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_port() -> u16 {
        502
    }

    fn default_unit_id() -> u8 {
        85
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_status_interval() -> u64 {
        60
    }
}
