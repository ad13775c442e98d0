//! Controller configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. A TOML file (optional; a missing file is not an error)
//! 3. Environment variables prefixed with `MECHATEST_`, using `__` for nesting
//!
//! Example: `MECHATEST_DEVICE_PORT=/dev/ttyACM0`, `MECHATEST_TIMEOUTS__TEST_RESPONSE_MS=2000`.
//!
//! # Example
//! ```no_run
//! use mechatest::config::EquipmentConfig;
//!
//! let config = EquipmentConfig::load_from("config/mechatest.toml")?;
//! println!("Connecting to {} at {} baud", config.device_port, config.baud_rate);
//! # Ok::<(), mechatest::error::ControllerError>(())
//! ```

use crate::error::{AppResult, ControllerError};
use crate::health::MetricsMode;
use crate::logging::LogFormat;
use crate::transport::{SimulationProfile, TransportKind};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MECHATEST_";

/// Equipment configuration. Fixed once handed to `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentConfig {
    /// Link type
    #[serde(default)]
    pub transport: TransportKind,
    /// Serial device path, or `host:port` for network rigs
    #[serde(default = "default_device_port")]
    pub device_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Acceptable deviation for measurements, in measurement units
    #[serde(default = "default_tolerance")]
    pub measurement_tolerance: f64,
    /// How many times a failed send is retried before the test is reported failed
    #[serde(default = "default_retries")]
    pub max_retry_attempts: u32,
    /// Also write logs to `log_file_path`
    #[serde(default = "default_true")]
    pub enable_logging: bool,
    #[serde(default = "default_log_file")]
    pub log_file_path: PathBuf,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Where health metrics come from
    #[serde(default)]
    pub metrics: MetricsMode,
    /// Synthetic device used with `transport = "simulated"`
    #[serde(default)]
    pub simulation: SimulationProfile,
}

/// Timeouts and delays, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub test_response_ms: u64,
    pub calibration_response_ms: u64,
    /// Mechanical settling time before `CALIBRATE` is sent
    pub calibration_settle_ms: u64,
    pub connect_ms: u64,
    pub status_query_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            test_response_ms: 5000,
            calibration_response_ms: 10000,
            calibration_settle_ms: 2000,
            connect_ms: 3000,
            status_query_ms: 1000,
        }
    }
}

impl TimeoutConfig {
    pub fn test_response(&self) -> Duration {
        Duration::from_millis(self.test_response_ms)
    }

    pub fn calibration_response(&self) -> Duration {
        Duration::from_millis(self.calibration_response_ms)
    }

    pub fn calibration_settle(&self) -> Duration {
        Duration::from_millis(self.calibration_settle_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn status_query(&self) -> Duration {
        Duration::from_millis(self.status_query_ms)
    }
}

fn default_device_port() -> String {
    if cfg!(windows) {
        "COM1".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_tolerance() -> f64 {
    0.1
}

fn default_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_log_file() -> PathBuf {
    PathBuf::from("mechatronic_test.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EquipmentConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            device_port: default_device_port(),
            baud_rate: default_baud_rate(),
            measurement_tolerance: default_tolerance(),
            max_retry_attempts: default_retries(),
            enable_logging: default_true(),
            log_file_path: default_log_file(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            timeouts: TimeoutConfig::default(),
            metrics: MetricsMode::default(),
            simulation: SimulationProfile::default(),
        }
    }
}

impl EquipmentConfig {
    /// Configuration for a simulated rig, with file logging off.
    pub fn simulated() -> Self {
        Self {
            transport: TransportKind::Simulated,
            device_port: "sim0".to_string(),
            enable_logging: false,
            ..Self::default()
        }
    }

    /// Defaults overridden by `MECHATEST_*` environment variables.
    pub fn from_env() -> AppResult<Self> {
        Self::extract(Self::base())
    }

    /// Defaults, then `path`, then environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::extract(Self::base().merge(Toml::file(path.as_ref())))
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn extract(figment: Figment) -> AppResult<Self> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate().map_err(ControllerError::Configuration)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.device_port.trim().is_empty() {
            return Err("device_port must not be empty".to_string());
        }

        if self.transport == TransportKind::Serial && self.baud_rate == 0 {
            return Err("baud_rate must be greater than 0".to_string());
        }

        if !(self.measurement_tolerance.is_finite() && self.measurement_tolerance >= 0.0) {
            return Err(format!(
                "Invalid measurement_tolerance {}. Must be a non-negative number",
                self.measurement_tolerance
            ));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("test_response_ms", t.test_response_ms),
            ("calibration_response_ms", t.calibration_response_ms),
            ("connect_ms", t.connect_ms),
            ("status_query_ms", t.status_query_ms),
        ] {
            if value == 0 {
                return Err(format!("timeouts.{} must be greater than 0", name));
            }
        }

        self.simulation.validate()
    }
}
