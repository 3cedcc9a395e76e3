//! Structured logging initialisation
//!
//! Every binary calls [`init_logging`] exactly once at startup.

use crate::config::ConfigLoader;
use crate::error::MooviesError;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging setup errors
#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),

    #[error("Failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line (default, for log shippers)
    Json,
    /// Human readable, for local runs
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Logging configuration
///
/// # Environment Variables
///
/// - `MOOVIES_LOG_LEVEL` (optional, falls back to `RUST_LOG`, default: "info")
/// - `MOOVIES_LOG_FORMAT` (optional, `json` or `pretty`, default: `json`)
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `moovies_recommender=debug,sqlx=warn`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl ConfigLoader for LogConfig {
    fn from_env() -> Result<Self, MooviesError> {
        let level = std::env::var("MOOVIES_LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| LogConfig::default().level);

        let format = match std::env::var("MOOVIES_LOG_FORMAT") {
            Ok(raw) => raw
                .parse::<LogFormat>()
                .map_err(|message| MooviesError::config("MOOVIES_LOG_FORMAT", message))?,
            Err(_) => LogFormat::Json,
        };

        Ok(Self { level, format })
    }

    fn validate(&self) -> Result<(), MooviesError> {
        EnvFilter::try_new(&self.level).map_err(|e| {
            MooviesError::config(
                "MOOVIES_LOG_LEVEL",
                format!("Invalid log level '{}': {}", self.level, e),
            )
        })?;
        Ok(())
    }
}

/// Install the global tracing subscriber
///
/// # Errors
///
/// Fails if the filter directive does not parse or a global subscriber is
/// already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), ObservabilityError> {
    let env_filter = EnvFilter::try_new(&config.level)
        .map_err(|_| ObservabilityError::InvalidFilter(config.level.clone()))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .try_init(),
    }
    .map_err(|e| ObservabilityError::SubscriberInit(e.to_string()))?;

    tracing::debug!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}
