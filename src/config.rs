//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `exporter.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SensorConfig: which backend to sample and where the device lives.
//!     - PollingConfig: How often the sampler reads the sensor.
//!     - ServerConfig: Where the metrics endpoint listens.
//!     - LoggingConfig: Log level and per-cycle verbosity.
//!     - LifecycleConfig: Optional pid file.
//!
//! ==============================================================================

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExporterConfig {
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SensorBackend {
    #[default]
    Device,
    Mock,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorConfig {
    pub backend: SensorBackend,
    pub device_path: PathBuf,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            backend: SensorBackend::Device,
            device_path: PathBuf::from("/dev/bme280"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 10 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub metrics_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            metrics_path: "/metrics".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| anyhow!("Invalid bind address {}:{}: {}", self.bind_address, self.port, e))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LifecycleConfig {
    pub pid_file: Option<PathBuf>,
}

impl ExporterConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: ExporterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// Search errors are reported to the caller as warnings; tracing is not
    /// initialized yet when this runs because the log level lives in here.
    pub fn load_or_default() -> (Self, Vec<String>) {
        let paths = [
            PathBuf::from("config").join("exporter.toml"),
            PathBuf::from("..").join("config").join("exporter.toml"),
        ];

        let mut notes = Vec::new();
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        notes.push(format!("Loaded config from {}", path.display()));
                        return (config, notes);
                    }
                    Err(e) => {
                        notes.push(format!("Failed to load {}: {:#}", path.display(), e));
                    }
                }
            }
        }

        notes.push("No config file found - using defaults".to_string());
        (Self::default(), notes)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.polling.interval_seconds == 0 {
            bail!("polling.interval_seconds must be at least 1");
        }
        if !self.server.metrics_path.starts_with('/') {
            bail!("server.metrics_path must start with '/' (got {:?})", self.server.metrics_path);
        }
        self.server.socket_addr()?;
        Ok(())
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!(
            backend = ?self.sensor.backend,
            device = %self.sensor.device_path.display(),
            interval_seconds = self.polling.interval_seconds,
            listen = %format!("{}:{}", self.server.bind_address, self.server.port),
            metrics_path = %self.server.metrics_path,
            log_level = %self.logging.level,
            pid_file = ?self.lifecycle.pid_file,
            "Effective configuration"
        );
    }
}
