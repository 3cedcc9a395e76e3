//! Environment-driven configuration
//!
//! Every setting is read from a `MOOVIES_`-prefixed variable, with a few
//! conventional fallbacks (`DATABASE_URL`, `HOST`, `PORT`). A `.env` file in
//! the working directory is loaded first and never overrides the real
//! environment.
//!
//! ```no_run
//! use moovies_core::config::{ConfigLoader, DatabaseConfig};
//!
//! # fn example() -> Result<(), moovies_core::MooviesError> {
//! moovies_core::config::load_dotenv();
//! let db = DatabaseConfig::from_env()?;
//! db.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::MooviesError;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Settings that can be read from the environment and checked before use
pub trait ConfigLoader: Sized {
    /// Read every key, substituting defaults for unset optional ones
    ///
    /// # Errors
    ///
    /// `ConfigurationError` naming the key when a required value is missing
    /// or a present value does not parse.
    fn from_env() -> Result<Self, MooviesError>;

    /// # Errors
    ///
    /// `ConfigurationError` naming the first key whose value is out of range.
    fn validate(&self) -> Result<(), MooviesError>;
}

/// Fail with a configuration error on `key` unless `condition` holds
pub fn ensure(condition: bool, key: &str, message: impl FnOnce() -> String) -> Result<(), MooviesError> {
    if condition {
        Ok(())
    } else {
        Err(MooviesError::config(key, message()))
    }
}

/// Connection pool settings
///
/// | Variable | Default |
/// |---|---|
/// | `MOOVIES_DATABASE_URL` or `DATABASE_URL` | required |
/// | `MOOVIES_DATABASE_MAX_CONNECTIONS` | 20 |
/// | `MOOVIES_DATABASE_MIN_CONNECTIONS` | 2 |
/// | `MOOVIES_DATABASE_ACQUIRE_TIMEOUT` (s) | 30 |
/// | `MOOVIES_DATABASE_IDLE_TIMEOUT` (s) | 600 |
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/moovies".to_string(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl ConfigLoader for DatabaseConfig {
    fn from_env() -> Result<Self, MooviesError> {
        let url = first_env(&["MOOVIES_DATABASE_URL", "DATABASE_URL"]).ok_or_else(|| {
            MooviesError::config(
                "MOOVIES_DATABASE_URL",
                "DATABASE_URL or MOOVIES_DATABASE_URL must be set",
            )
        })?;
        let defaults = Self::default();

        Ok(Self {
            url,
            max_connections: parse_env_var(
                "MOOVIES_DATABASE_MAX_CONNECTIONS",
                defaults.max_connections,
            )?,
            min_connections: parse_env_var(
                "MOOVIES_DATABASE_MIN_CONNECTIONS",
                defaults.min_connections,
            )?,
            acquire_timeout: parse_secs("MOOVIES_DATABASE_ACQUIRE_TIMEOUT", defaults.acquire_timeout)?,
            idle_timeout: parse_secs("MOOVIES_DATABASE_IDLE_TIMEOUT", defaults.idle_timeout)?,
        })
    }

    fn validate(&self) -> Result<(), MooviesError> {
        let url = Url::parse(&self.url).map_err(|e| {
            MooviesError::config("MOOVIES_DATABASE_URL", format!("Invalid database URL: {}", e))
        })?;
        ensure(
            matches!(url.scheme(), "postgres" | "postgresql"),
            "MOOVIES_DATABASE_URL",
            || format!("expected a postgres:// URL, got scheme '{}'", url.scheme()),
        )?;
        ensure(self.max_connections > 0, "MOOVIES_DATABASE_MAX_CONNECTIONS", || {
            "max_connections must be greater than 0".to_string()
        })?;
        ensure(
            self.min_connections <= self.max_connections,
            "MOOVIES_DATABASE_MIN_CONNECTIONS",
            || {
                format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    self.min_connections, self.max_connections
                )
            },
        )?;
        ensure(!self.acquire_timeout.is_zero(), "MOOVIES_DATABASE_ACQUIRE_TIMEOUT", || {
            "acquire_timeout must be at least one second".to_string()
        })?;
        ensure(!self.idle_timeout.is_zero(), "MOOVIES_DATABASE_IDLE_TIMEOUT", || {
            "idle_timeout must be at least one second".to_string()
        })
    }
}

/// HTTP listener settings for the recommendation service
///
/// | Variable | Default |
/// |---|---|
/// | `MOOVIES_SERVICE_HOST` or `HOST` | 0.0.0.0 |
/// | `MOOVIES_SERVICE_PORT` or `PORT` | 8083 |
/// | `MOOVIES_SERVICE_WORKERS` | CPU count |
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8083,
            workers: num_cpus::get(),
        }
    }
}

impl ConfigLoader for ServiceConfig {
    fn from_env() -> Result<Self, MooviesError> {
        let defaults = Self::default();
        let port_key = if std::env::var_os("MOOVIES_SERVICE_PORT").is_some() {
            "MOOVIES_SERVICE_PORT"
        } else {
            "PORT"
        };

        Ok(Self {
            host: first_env(&["MOOVIES_SERVICE_HOST", "HOST"]).unwrap_or(defaults.host),
            port: parse_env_var(port_key, defaults.port)?,
            workers: parse_env_var("MOOVIES_SERVICE_WORKERS", defaults.workers)?,
        })
    }

    fn validate(&self) -> Result<(), MooviesError> {
        ensure(self.port > 0, "MOOVIES_SERVICE_PORT", || {
            "port must be greater than 0".to_string()
        })?;
        ensure(self.workers > 0, "MOOVIES_SERVICE_WORKERS", || {
            "workers must be greater than 0".to_string()
        })
    }
}

/// Value of `key` parsed as `T`, or `default` when unset
///
/// # Errors
///
/// `ConfigurationError` naming `key` when the value is present but does not
/// parse.
pub fn parse_env_var<T>(key: &str, default: T) -> Result<T, MooviesError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| MooviesError::config(key, format!("Failed to parse {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn parse_secs(key: &str, default: Duration) -> Result<Duration, MooviesError> {
    parse_env_var(key, default.as_secs()).map(Duration::from_secs)
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| std::env::var(key).ok())
}

/// Load `.env` from the working directory if there is one
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "Failed to load .env file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_database_defaults_are_valid() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_database_url_must_be_postgres() {
        let config = DatabaseConfig {
            url: "mysql://localhost/moovies".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.config_key(), Some("MOOVIES_DATABASE_URL"));

        let config = DatabaseConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_bounds_are_checked() {
        let config = DatabaseConfig {
            min_connections: 30,
            max_connections: 20,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.config_key(), Some("MOOVIES_DATABASE_MIN_CONNECTIONS"));

        let config = DatabaseConfig {
            max_connections: 0,
            min_connections: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.config_key(), Some("MOOVIES_DATABASE_MAX_CONNECTIONS"));
    }

    #[test]
    fn test_database_config_reads_moovies_keys() {
        env::set_var("MOOVIES_DATABASE_URL", "postgresql://localhost/moovies_test");
        env::set_var("MOOVIES_DATABASE_MAX_CONNECTIONS", "50");
        env::set_var("MOOVIES_DATABASE_IDLE_TIMEOUT", "5");

        let config = DatabaseConfig::from_env().unwrap();
        assert_eq!(config.url, "postgresql://localhost/moovies_test");
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.idle_timeout, Duration::from_secs(5));

        env::remove_var("MOOVIES_DATABASE_URL");
        env::remove_var("MOOVIES_DATABASE_MAX_CONNECTIONS");
        env::remove_var("MOOVIES_DATABASE_IDLE_TIMEOUT");
    }

    #[test]
    fn test_service_config_validation() {
        assert!(ServiceConfig::default().workers > 0);

        let config = ServiceConfig {
            port: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err().config_key(),
            Some("MOOVIES_SERVICE_PORT")
        );
    }

    #[test]
    fn test_parse_env_var() {
        let unset: u32 = parse_env_var("MOOVIES_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(unset, 42);

        env::set_var("MOOVIES_TEST_PADDED_KEY", " 7 ");
        let padded: u32 = parse_env_var("MOOVIES_TEST_PADDED_KEY", 0).unwrap();
        assert_eq!(padded, 7);
        env::remove_var("MOOVIES_TEST_PADDED_KEY");

        env::set_var("MOOVIES_TEST_GARBAGE_KEY", "many");
        let err = parse_env_var::<u32>("MOOVIES_TEST_GARBAGE_KEY", 0).unwrap_err();
        assert_eq!(err.config_key(), Some("MOOVIES_TEST_GARBAGE_KEY"));
        env::remove_var("MOOVIES_TEST_GARBAGE_KEY");
    }
}
