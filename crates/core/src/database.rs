//! Shared PostgreSQL connection pool
//!
//! Binaries build one pool at startup and hand clones of it to every
//! component that needs a session.

use crate::config::DatabaseConfig;
use crate::error::MooviesError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connect, retrying while the server is unreachable
    pub async fn new(config: &DatabaseConfig) -> Result<Self, MooviesError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .idle_timeout(Some(config.idle_timeout))
            .acquire_timeout(config.acquire_timeout);

        let policy = RetryPolicy::new(5, Duration::from_millis(500), Duration::from_secs(8));
        let pool = retry_with_backoff(
            || options.clone().connect(&config.url),
            &policy,
            is_connect_error,
        )
        .await?;

        info!("Database connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_connect_error(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}
