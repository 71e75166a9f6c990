use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the exporter.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Event socket target.
    #[serde(default)]
    pub freeswitch: FreeswitchConfig,

    /// Prometheus metrics server.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Which collectors run.
    #[serde(default)]
    pub collectors: CollectorsConfig,

    /// Loop cadences and the heartbeat staleness window.
    #[serde(default)]
    pub intervals: IntervalsConfig,
}

/// Event socket connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FreeswitchConfig {
    /// Switch host. Default: "127.0.0.1".
    #[serde(default = "default_host")]
    pub host: String,

    /// Event socket port. Default: 8021.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Event socket password. Default: "ClueCon".
    #[serde(default = "default_password")]
    pub password: String,

    /// Connect + authenticate timeout. Default: 10s.
    #[serde(default = "default_dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,
}

/// Metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Listen address. Default: ":9143".
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

/// Feature toggles for the optional collectors.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorsConfig {
    /// Poll `API status` for freeswitch_channels_total. Default: true.
    #[serde(default = "default_true")]
    pub channels_total: bool,

    /// Poll `API show channels count` for freeswitch_channels_current. Default: true.
    #[serde(default = "default_true")]
    pub channels_current: bool,

    /// Subscribe to all events and count them by name. Default: false.
    #[serde(default)]
    pub events_total: bool,
}

/// Loop cadences.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct IntervalsConfig {
    /// Poller cadence. Default: 5s.
    #[serde(default = "default_five_seconds", with = "humantime_serde")]
    pub poll: Duration,

    /// Liveness evaluation cadence. Default: 5s.
    #[serde(default = "default_five_seconds", with = "humantime_serde")]
    pub liveness: Duration,

    /// Delay between failed connection attempts. Default: 5s.
    #[serde(default = "default_five_seconds", with = "humantime_serde")]
    pub reconnect: Duration,

    /// Maximum heartbeat age still considered alive. Default: 30s.
    #[serde(default = "default_heartbeat_staleness", with = "humantime_serde")]
    pub heartbeat_staleness: Duration,
}

/// Command-line and environment overrides applied on top of the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub metrics_port: Option<u16>,
    pub log_level: Option<String>,
    pub disable_channels_total: bool,
    pub disable_channels_current: bool,
    pub enable_events_total: bool,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8021
}

fn default_password() -> String {
    "ClueCon".to_string()
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_metrics_addr() -> String {
    ":9143".to_string()
}

fn default_true() -> bool {
    true
}

fn default_five_seconds() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_staleness() -> Duration {
    Duration::from_secs(30)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            freeswitch: FreeswitchConfig::default(),
            metrics: MetricsConfig::default(),
            collectors: CollectorsConfig::default(),
            intervals: IntervalsConfig::default(),
        }
    }
}

impl Default for FreeswitchConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: default_password(),
            dial_timeout: default_dial_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            addr: default_metrics_addr(),
        }
    }
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            channels_total: true,
            channels_current: true,
            events_total: false,
        }
    }
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            poll: default_five_seconds(),
            liveness: default_five_seconds(),
            reconnect: default_five_seconds(),
            heartbeat_staleness: default_heartbeat_staleness(),
        }
    }
}

// --- Loading and validation ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml_str(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data).context("decoding YAML")?;
        Ok(cfg)
    }

    /// Apply command-line/environment overrides.
    pub fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(host) = &o.host {
            self.freeswitch.host = host.clone();
        }
        if let Some(port) = o.port {
            self.freeswitch.port = port;
        }
        if let Some(password) = &o.password {
            self.freeswitch.password = password.clone();
        }
        if let Some(port) = o.metrics_port {
            self.metrics.addr = format!(":{port}");
        }
        if let Some(level) = &o.log_level {
            self.log_level = level.to_lowercase();
        }
        if o.disable_channels_total {
            self.collectors.channels_total = false;
        }
        if o.disable_channels_current {
            self.collectors.channels_current = false;
        }
        if o.enable_events_total {
            self.collectors.events_total = true;
        }
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.freeswitch.host.trim().is_empty() {
            bail!("freeswitch.host is required");
        }

        if self.freeswitch.port == 0 {
            bail!("freeswitch.port must be > 0");
        }

        if self.freeswitch.dial_timeout.is_zero() {
            bail!("freeswitch.dial_timeout must be > 0");
        }

        if self.metrics.addr.trim().is_empty() {
            bail!("metrics.addr is required");
        }

        let intervals = [
            ("intervals.poll", self.intervals.poll),
            ("intervals.liveness", self.intervals.liveness),
            ("intervals.reconnect", self.intervals.reconnect),
            (
                "intervals.heartbeat_staleness",
                self.intervals.heartbeat_staleness,
            ),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                bail!("{name} must be > 0");
            }
        }

        Ok(())
    }
}

impl FreeswitchConfig {
    /// The `host:port` dial address; IPv6 literals are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
