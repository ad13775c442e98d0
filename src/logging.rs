//! Tracing setup
//!
//! Installs a `tracing-subscriber` registry with:
//! - An `EnvFilter` (`RUST_LOG` takes precedence over the configured level)
//! - A console layer in pretty, compact or JSON format
//! - Optionally a plain-text file layer appending to the configured log file
//!
//! # Example
//! ```no_run
//! use mechatest::{config::EquipmentConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EquipmentConfig::load_from("config/mechatest.toml")?;
//! logging::init_from_config(&config)?;
//! tracing::info!("Controller starting");
//! # Ok(())
//! # }
//! ```

use crate::config::EquipmentConfig;
use crate::error::{AppResult, ControllerError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line with colors (for development)
    #[default]
    Pretty,
    /// Single-line without colors
    Compact,
    /// JSON, for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                other
            )),
        }
    }
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Also append plain-text logs here
    pub log_file: Option<PathBuf>,
    /// Include span NEW/CLOSE events
    pub with_span_events: bool,
    /// ANSI colors on the console (pretty format only)
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            log_file: None,
            with_span_events: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn from_config(config: &EquipmentConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.log_level)?,
            format: config.log_format,
            log_file: config
                .enable_logging
                .then(|| config.log_file_path.clone()),
            ..Default::default()
        })
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize logging from the equipment configuration.
pub fn init_from_config(config: &EquipmentConfig) -> AppResult<()> {
    let logging = LoggingConfig::from_config(config).map_err(ControllerError::Logging)?;
    init(logging)
}

/// Install the global subscriber.
///
/// Idempotent: if a global subscriber is already set (tests, embedding applications),
/// this returns `Ok(())` and leaves it in place.
pub fn init(config: LoggingConfig) -> AppResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let console = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_ansi(config.with_ansi)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .boxed(),
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![console];

    if let Some(path) = &config.log_file {
        let file = open_log_file(path)?;
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .or_else(|e| {
            // Already initialized is expected in tests and when embedded
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(ControllerError::Logging(e.to_string()))
            }
        })
}

fn open_log_file(path: &Path) -> AppResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ControllerError::Logging(format!("cannot open log file {:?}: {}", path, e)))
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));

        // Case insensitive
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));

        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_from_equipment_config() {
        let mut config = EquipmentConfig::default();
        config.log_level = "debug".to_string();
        config.log_format = LogFormat::Compact;

        let logging = LoggingConfig::from_config(&config).unwrap();
        assert_eq!(logging.level, Level::DEBUG);
        assert_eq!(logging.format, LogFormat::Compact);
        assert_eq!(
            logging.log_file,
            Some(PathBuf::from("mechatronic_test.log"))
        );

        config.enable_logging = false;
        let logging = LoggingConfig::from_config(&config).unwrap();
        assert!(logging.log_file.is_none());
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.log");
        let config = LoggingConfig::new(Level::WARN)
            .with_format(LogFormat::Compact)
            .with_log_file(&path)
            .with_ansi(false);

        assert!(init(config.clone()).is_ok());
        assert!(init(config).is_ok());
    }

    #[test]
    fn test_repeat_init_leaves_file_system_alone() {
        let first = LoggingConfig::new(Level::WARN).with_ansi(false);
        assert!(init(first).is_ok());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unused.log");
        let second = LoggingConfig::new(Level::WARN).with_log_file(&path);
        assert!(init(second).is_ok());
        assert!(!path.exists());
    }

    #[test]
    fn test_unwritable_log_file_is_reported() {
        let result = open_log_file(Path::new("/nonexistent-dir/rig.log"));
        assert!(matches!(result, Err(ControllerError::Logging(_))));
    }

    #[test]
    fn test_log_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.log");
        assert!(open_log_file(&path).is_ok());
        assert!(path.exists());
    }
}
