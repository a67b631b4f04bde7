//! Logging configuration and initialization for the exchange client.
//!
//! Supports JSON, pretty and compact formats, optionally written to a file.
//! `EXCHANGE_LOG` and `EXCHANGE_LOG_FORMAT` override the defaults.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logging (default for production).
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
    /// Single-line human-readable output, handy for the simulator.
    Compact,
}

impl FromStr for LogFormat {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(LogError::UnknownFormat(other.to_string())),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter directive (e.g. "info", "exchange_client=debug").
    pub level: String,
    /// Optional file path for log output. If None, logs to stderr.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
            output_path: None,
        }
    }
}

impl LogConfig {
    /// Defaults overridden by `EXCHANGE_LOG` / `EXCHANGE_LOG_FORMAT`.
    /// An unparsable format keeps the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("EXCHANGE_LOG") {
            if !level.trim().is_empty() {
                config.level = level;
            }
        }
        if let Ok(format) = std::env::var("EXCHANGE_LOG_FORMAT") {
            config.format = format.parse().unwrap_or(config.format);
        }
        config
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("Unknown log format: {0}")]
    UnknownFormat(String),
    #[error("Failed to open log file: {0}")]
    FileOpen(String),
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| LogError::InvalidFilter(e.to_string()))?;
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(path) = &config.output_path {
        let file = std::fs::File::create(path).map_err(|e| LogError::FileOpen(e.to_string()))?;
        let writer = std::sync::Mutex::new(file);
        return match config.format {
            LogFormat::Json => registry.with(fmt::layer().json().with_writer(writer)).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty().with_writer(writer)).try_init(),
            LogFormat::Compact => registry
                .with(fmt::layer().compact().with_ansi(false).with_writer(writer))
                .try_init(),
        }
        .map_err(|_| LogError::AlreadyInitialized);
    }

    match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    }
    .map_err(|_| LogError::AlreadyInitialized)
}
