//! Shared error type for Moovies services

use thiserror::Error;

/// Errors raised by the shared infrastructure layer
#[derive(Debug, Error)]
pub enum MooviesError {
    #[error("Configuration error: {message}")]
    ConfigurationError {
        message: String,
        key: Option<String>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl MooviesError {
    /// Configuration error blamed on a single environment key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        MooviesError::ConfigurationError {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Name of the offending configuration key, if any
    pub fn config_key(&self) -> Option<&str> {
        match self {
            MooviesError::ConfigurationError { key, .. } => key.as_deref(),
            MooviesError::Database(_) => None,
        }
    }
}
