//! Recommender error type

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecommenderError>;

#[derive(Debug, Error)]
pub enum RecommenderError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid {entity} row: {message}")]
    InvalidRow {
        entity: &'static str,
        message: String,
    },

    #[error("Embedding dimension mismatch for {table}: expected {expected}, got {actual}")]
    DimensionMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Embedding table {table} has {rows} rows, needs at least {required}")]
    TableTooSmall {
        table: String,
        rows: usize,
        required: usize,
    },

    #[error("No trainable data: the interaction set is empty")]
    NoTrainableData,

    #[error("Invalid weight snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Model trainer failed: {0}")]
    Trainer(String),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] moovies_core::MooviesError),
}

impl RecommenderError {
    pub(crate) fn invalid_row(entity: &'static str, message: impl Into<String>) -> Self {
        RecommenderError::InvalidRow {
            entity,
            message: message.into(),
        }
    }

    /// Whether retrying the same unit of work may succeed
    ///
    /// Connectivity problems are transient; constraint violations, decoding
    /// failures and bad input are not.
    pub fn is_transient(&self) -> bool {
        match self {
            RecommenderError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Protocol(_)
            ),
            RecommenderError::Io(_) => true,
            _ => false,
        }
    }
}
