//! # Moovies Recommender
//!
//! Embedding-based collaborative filtering for the Moovies catalog.
//!
//! ## Modules
//!
//! - `mapping`: sparse external ids to dense embedding-table indices
//! - `training`: labeled training tensors with seeded negative sampling
//! - `trainer`: model trainer contract and weight snapshots
//! - `embedding_store`: fused, normalised embeddings in pgvector tables
//! - `repository`: database seam for scoring and serving
//! - `engine`: per-user neighbor scoring and persistence
//! - `hybrid`: blended genre/embedding/collaborative scoring for refreshes
//! - `batch`: bounded-concurrency recomputation over all users
//! - `pipeline`: the offline end-to-end run
//! - `api`: HTTP routes

pub mod api;
pub mod batch;
pub mod embedding_store;
pub mod engine;
pub mod error;
pub mod hybrid;
pub mod mapping;
pub mod pipeline;
pub mod repository;
pub mod trainer;
pub mod training;
pub mod types;

pub use batch::{BatchOrchestrator, BatchReport};
pub use embedding_store::{fuse_embedding, EmbeddingStore, UserFoldIn};
pub use engine::{
    CandidateAccumulator, CandidateScore, EngineConfig, RecomputeOutcome, RecommendationEngine,
};
pub use error::{RecommenderError, Result};
pub use hybrid::{GenreProfile, HybridConfig, HybridScorer};
pub use mapping::{IdMapper, IdMappings};
pub use pipeline::{PipelineReport, PreparedTraining, TrainingPipeline};
pub use repository::{CandidateSource, PostgresRecommendationRepository, RecommendationRepository};
pub use trainer::{
    CommandTrainer, ModelTrainer, SnapshotTrainer, TrainedEmbeddings, TrainerInput, WeightSnapshot,
};
pub use training::{SamplingConfig, TrainingSet, TrainingSetBuilder, TrainingStats};
pub use types::*;

use moovies_core::config::{ensure, parse_env_var, ConfigLoader};
use moovies_core::retry::RetryPolicy;
use moovies_core::MooviesError;

/// Recommender tuning knobs
///
/// # Environment Variables
///
/// - `MOOVIES_EMBEDDING_DIM` (default: 128, the only width the `vector` columns accept)
/// - `MOOVIES_MAX_GENRES` (default: 5)
/// - `MOOVIES_NEGATIVE_RATIO` (default: 4)
/// - `MOOVIES_NEGATIVE_RETRY_CAP` (default: 64)
/// - `MOOVIES_SAMPLING_SEED` (default: 42)
/// - `MOOVIES_VALIDATION_FRACTION` (default: 0.1)
/// - `MOOVIES_NEIGHBOR_COUNT` (default: 20)
/// - `MOOVIES_TOP_N` (default: 10)
/// - `MOOVIES_BATCH_CONCURRENCY` (default: 4)
/// - `MOOVIES_PROGRESS_INTERVAL` (default: 10)
/// - `MOOVIES_RETRY_MAX_ATTEMPTS` (default: 3)
#[derive(Debug, Clone, PartialEq)]
pub struct RecommenderConfig {
    pub embedding_dim: usize,
    pub max_genres: usize,
    pub negative_ratio: usize,
    pub negative_retry_cap: usize,
    pub sampling_seed: u64,
    pub validation_fraction: f64,
    pub neighbor_count: usize,
    pub top_n: usize,
    pub batch_concurrency: usize,
    pub progress_interval: usize,
    pub retry_max_attempts: u32,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            embedding_dim: STORED_EMBEDDING_DIM,
            max_genres: 5,
            negative_ratio: 4,
            negative_retry_cap: 64,
            sampling_seed: 42,
            validation_fraction: 0.1,
            neighbor_count: 20,
            top_n: 10,
            batch_concurrency: 4,
            progress_interval: 10,
            retry_max_attempts: 3,
        }
    }
}

impl RecommenderConfig {
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            max_genres: self.max_genres,
            negative_ratio: self.negative_ratio,
            retry_cap: self.negative_retry_cap,
            seed: self.sampling_seed,
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            neighbor_count: self.neighbor_count,
            top_n: self.top_n,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            ..RetryPolicy::default()
        }
    }
}

fn must_be_positive(value: usize, key: &str) -> std::result::Result<(), MooviesError> {
    ensure(value > 0, key, || format!("{} must be greater than 0", key))
}

impl ConfigLoader for RecommenderConfig {
    fn from_env() -> std::result::Result<Self, MooviesError> {
        let defaults = Self::default();

        let config = Self {
            embedding_dim: parse_env_var("MOOVIES_EMBEDDING_DIM", defaults.embedding_dim)?,
            max_genres: parse_env_var("MOOVIES_MAX_GENRES", defaults.max_genres)?,
            negative_ratio: parse_env_var("MOOVIES_NEGATIVE_RATIO", defaults.negative_ratio)?,
            negative_retry_cap: parse_env_var(
                "MOOVIES_NEGATIVE_RETRY_CAP",
                defaults.negative_retry_cap,
            )?,
            sampling_seed: parse_env_var("MOOVIES_SAMPLING_SEED", defaults.sampling_seed)?,
            validation_fraction: parse_env_var(
                "MOOVIES_VALIDATION_FRACTION",
                defaults.validation_fraction,
            )?,
            neighbor_count: parse_env_var("MOOVIES_NEIGHBOR_COUNT", defaults.neighbor_count)?,
            top_n: parse_env_var("MOOVIES_TOP_N", defaults.top_n)?,
            batch_concurrency: parse_env_var(
                "MOOVIES_BATCH_CONCURRENCY",
                defaults.batch_concurrency,
            )?,
            progress_interval: parse_env_var(
                "MOOVIES_PROGRESS_INTERVAL",
                defaults.progress_interval,
            )?,
            retry_max_attempts: parse_env_var(
                "MOOVIES_RETRY_MAX_ATTEMPTS",
                defaults.retry_max_attempts,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), MooviesError> {
        ensure(
            self.embedding_dim == STORED_EMBEDDING_DIM,
            "MOOVIES_EMBEDDING_DIM",
            || {
                format!(
                    "embedding_dim must be {} to match the vector columns, got {}",
                    STORED_EMBEDDING_DIM, self.embedding_dim
                )
            },
        )?;
        must_be_positive(self.max_genres, "MOOVIES_MAX_GENRES")?;
        must_be_positive(self.negative_retry_cap, "MOOVIES_NEGATIVE_RETRY_CAP")?;
        must_be_positive(self.neighbor_count, "MOOVIES_NEIGHBOR_COUNT")?;
        must_be_positive(self.top_n, "MOOVIES_TOP_N")?;
        must_be_positive(self.batch_concurrency, "MOOVIES_BATCH_CONCURRENCY")?;

        ensure(
            (0.0..1.0).contains(&self.validation_fraction),
            "MOOVIES_VALIDATION_FRACTION",
            || {
                format!(
                    "validation_fraction must be in [0, 1), got {}",
                    self.validation_fraction
                )
            },
        )?;
        ensure(self.retry_max_attempts > 0, "MOOVIES_RETRY_MAX_ATTEMPTS", || {
            "retry_max_attempts must be at least 1".to_string()
        })
    }
}

#[cfg(test)]
mod tests;
