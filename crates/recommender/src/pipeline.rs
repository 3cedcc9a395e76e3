//! End-to-end offline run
//!
//! load interactions and genres -> map ids -> build and split the training
//! set -> train -> store movie and user embeddings -> recompute every user's
//! recommendations.

use crate::batch::{BatchOrchestrator, BatchReport};
use crate::embedding_store::EmbeddingStore;
use crate::engine::RecommendationEngine;
use crate::error::{RecommenderError, Result};
use crate::mapping::IdMappings;
use crate::repository::PostgresRecommendationRepository;
use crate::trainer::{ModelTrainer, TrainerInput};
use crate::training::{TrainingSetBuilder, TrainingStats};
use crate::RecommenderConfig;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Trainer input plus the mappings needed to key its output
#[derive(Debug, Clone)]
pub struct PreparedTraining {
    pub input: TrainerInput,
    pub mappings: IdMappings,
    pub stats: TrainingStats,
}

#[derive(Debug, Clone)]
pub enum PipelineReport {
    /// The interaction table is empty; nothing was trained or written
    NoData,
    Completed {
        training: TrainingStats,
        movies_stored: usize,
        users_stored: usize,
        batch: BatchReport,
        duration_ms: u64,
    },
}

pub struct TrainingPipeline {
    repository: PostgresRecommendationRepository,
    store: EmbeddingStore,
    config: RecommenderConfig,
}

impl TrainingPipeline {
    pub fn new(pool: PgPool, config: RecommenderConfig) -> Self {
        Self {
            repository: PostgresRecommendationRepository::new(pool.clone()),
            store: EmbeddingStore::new(pool, config.embedding_dim),
            config,
        }
    }

    pub fn engine(&self) -> RecommendationEngine {
        RecommendationEngine::new(Arc::new(self.repository.clone()), self.config.engine())
            .with_fold_in(Arc::new(self.store.clone()))
    }

    pub fn orchestrator(&self) -> BatchOrchestrator {
        BatchOrchestrator::new(Arc::new(self.engine()))
            .with_concurrency(self.config.batch_concurrency)
            .with_progress_interval(self.config.progress_interval)
            .with_retry_policy(self.config.retry_policy())
    }

    /// Load the current snapshot and build the trainer input
    ///
    /// `None` when there are no interactions.
    #[instrument(skip(self))]
    pub async fn prepare(&self) -> Result<Option<PreparedTraining>> {
        let interactions = self.repository.load_interactions().await?;
        let mappings = match IdMappings::from_interactions(&interactions) {
            Ok(mappings) => mappings,
            Err(RecommenderError::NoTrainableData) => {
                info!("No interactions found, nothing to train");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let genres = self.repository.load_movie_genres().await?;

        info!(
            users = mappings.num_users(),
            movies = mappings.num_movies(),
            interactions = interactions.len(),
            "Mapped training snapshot"
        );

        let builder = TrainingSetBuilder::new(self.config.sampling());
        let (set, stats) = builder.build(&interactions, &genres, &mappings)?;
        let (train, validation) = set.split(self.config.validation_fraction, self.config.sampling_seed);

        let input = TrainerInput {
            num_users: mappings.num_users(),
            num_movies: mappings.num_movies(),
            num_genres: set.num_genres,
            embedding_dim: self.config.embedding_dim,
            train,
            validation,
        };

        Ok(Some(PreparedTraining {
            input,
            mappings,
            stats,
        }))
    }

    /// Write the trainer input snapshot without training
    pub async fn export_training_set(&self, path: &Path) -> Result<Option<TrainingStats>> {
        let Some(prepared) = self.prepare().await? else {
            return Ok(None);
        };
        prepared.input.write_to(path).await?;
        info!(
            path = %path.display(),
            train = prepared.input.train.len(),
            train_positives = prepared.input.train.positive_count(),
            validation = prepared.input.validation.len(),
            validation_positives = prepared.input.validation.positive_count(),
            "Exported training set"
        );
        Ok(Some(prepared.stats))
    }

    pub async fn run(&self, trainer: &dyn ModelTrainer) -> Result<PipelineReport> {
        let start = Instant::now();
        let Some(prepared) = self.prepare().await? else {
            return Ok(PipelineReport::NoData);
        };

        let embeddings = trainer.train(&prepared.input).await?;
        embeddings.validate(prepared.mappings.num_users(), prepared.mappings.num_movies())?;

        let movies_stored = self
            .store
            .store_movie_embeddings(&embeddings, &prepared.mappings.movies)
            .await?;
        let users_stored = self
            .store
            .store_user_embeddings(&embeddings, &prepared.mappings.users)
            .await?;

        let batch = self.orchestrator().run().await?;

        let report = PipelineReport::Completed {
            training: prepared.stats,
            movies_stored,
            users_stored,
            batch,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(?report, "Pipeline finished");
        Ok(report)
    }
}
