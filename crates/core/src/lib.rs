//! # Moovies Core
//!
//! Shared infrastructure for the Moovies services.
//!
//! ## Modules
//!
//! - `config`: Configuration loading and validation
//! - `database`: Shared PostgreSQL connection pool
//! - `error`: Error types and handling
//! - `math`: Vector utilities used by the embedding pipeline
//! - `observability`: Structured logging initialisation
//! - `retry`: Exponential backoff retry utilities

pub mod config;
pub mod database;
pub mod error;
pub mod math;
pub mod observability;
pub mod retry;

// Re-export commonly used types
pub use config::{ensure, load_dotenv, parse_env_var, ConfigLoader, DatabaseConfig, ServiceConfig};
pub use database::DatabasePool;
pub use error::MooviesError;
pub use math::{cosine_distance, cosine_similarity, dot_product, l2_norm, mean_vector, normalize_vector};
pub use observability::{init_logging, LogConfig, LogFormat, ObservabilityError};
pub use retry::{retry_with_backoff, Backoff, RetryPolicy};

/// Result type alias for Moovies operations
pub type Result<T> = std::result::Result<T, MooviesError>;
