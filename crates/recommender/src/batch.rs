//! Batch recomputation over every embedded user
//!
//! Users are processed independently with bounded concurrency. Transient
//! database errors are retried with backoff; any remaining failure is recorded
//! in the report and the batch moves on.

use crate::engine::{RecomputeOutcome, RecommendationEngine};
use crate::error::{RecommenderError, Result};
use crate::types::UserId;
use futures::stream::{self, StreamExt};
use moovies_core::retry::{retry_with_backoff, RetryPolicy};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

/// Aggregate outcome of one batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    /// Users whose recommendations were replaced
    pub succeeded: usize,
    /// Users with no embedding or no neighbors
    pub skipped: usize,
    /// Users whose recomputation failed, ascending by id
    pub failed: Vec<(UserId, String)>,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, user_id: UserId, outcome: &Result<RecomputeOutcome>) {
        match outcome {
            Ok(RecomputeOutcome::Stored { .. }) => self.succeeded += 1,
            Ok(
                RecomputeOutcome::NoEmbedding
                | RecomputeOutcome::NoNeighbors
                | RecomputeOutcome::NoInteractions,
            ) => self.skipped += 1,
            Err(e) => self.failed.push((user_id, e.to_string())),
        }
    }
}

pub struct BatchOrchestrator {
    engine: Arc<RecommendationEngine>,
    concurrency: usize,
    retry_policy: RetryPolicy,
    progress_interval: usize,
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<RecommendationEngine>) -> Self {
        Self {
            engine,
            concurrency: 4,
            retry_policy: RetryPolicy::default(),
            progress_interval: 10,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Log progress every `interval` users; 0 disables progress lines
    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Recompute recommendations for every user with a stored embedding
    ///
    /// Only a failure to list the users is returned as an error.
    pub async fn run(&self) -> Result<BatchReport> {
        let repository = self.engine.repository();
        let users = retry_with_backoff(
            || repository.users_with_embeddings(),
            &self.retry_policy,
            RecommenderError::is_transient,
        )
        .await?;

        Ok(self.run_for(users).await)
    }

    /// Recompute recommendations for the given users
    #[instrument(skip(self, users), fields(users = users.len(), concurrency = self.concurrency))]
    pub async fn run_for(&self, users: Vec<UserId>) -> BatchReport {
        let start = Instant::now();
        let total = users.len();
        info!("Computing recommendations for {} users", total);

        let mut report = BatchReport {
            total,
            ..Default::default()
        };

        let mut results = stream::iter(users)
            .map(|user_id| {
                let engine = Arc::clone(&self.engine);
                let policy = &self.retry_policy;
                async move {
                    let outcome = retry_with_backoff(
                        || engine.compute_for_user(user_id),
                        policy,
                        RecommenderError::is_transient,
                    )
                    .await;
                    (user_id, outcome)
                }
            })
            .buffer_unordered(self.concurrency);

        let mut processed = 0usize;
        while let Some((user_id, outcome)) = results.next().await {
            if let Err(e) = &outcome {
                error!(user_id, error = %e, "Failed to compute recommendations");
            }
            report.record(user_id, &outcome);

            processed += 1;
            if self.progress_interval > 0 && processed % self.progress_interval == 0 {
                info!("Processed {}/{} users", processed, total);
            }
        }

        report.failed.sort_by_key(|(user_id, _)| *user_id);
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failure_count(),
            duration_ms = report.duration_ms,
            "Done computing recommendations"
        );
        report
    }
}
