//! Neighborhood-based recommendation scoring
//!
//! For one user: find the nearest users in embedding space, pool the movies
//! they interacted with (minus the ones the user already has), score each
//! candidate and persist the top N.
//!
//! Candidate score:
//!
//! ```text
//! weighted_count * 0.6 + (mean_quality / 10) * 0.3 + (min(popularity, 100) / 100) * 0.1
//! ```
//!
//! On-demand refreshes use the blended [`HybridScorer`] instead, which also
//! serves users that have no embedding or no neighbors.

use crate::embedding_store::UserFoldIn;
use crate::error::Result;
use crate::hybrid::{GenreProfile, HybridConfig, HybridScorer};
use crate::repository::RecommendationRepository;
use crate::types::{MovieId, NeighborInteraction, RecommendationRecord, ScoredMovie, UserId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const COUNT_WEIGHT: f64 = 0.6;
const QUALITY_WEIGHT: f64 = 0.3;
const POPULARITY_WEIGHT: f64 = 0.1;
const QUALITY_SCALE: f64 = 10.0;
const POPULARITY_CAP: f64 = 100.0;

/// Per-movie aggregate of neighbor contributions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateScore {
    /// Sum of relation weights (favorite 1.0, other 0.5)
    pub weighted_count: f64,
    quality_sum: f64,
    quality_count: u32,
    pub popularity: f64,
}

impl CandidateScore {
    fn from_interaction(interaction: &NeighborInteraction) -> Self {
        let (quality_sum, quality_count) = match interaction.stats.quality_score {
            Some(score) => (score, 1),
            None => (0.0, 0),
        };
        Self {
            weighted_count: interaction.relation.scoring_weight(),
            quality_sum,
            quality_count,
            popularity: interaction.stats.popularity,
        }
    }

    fn merge(&mut self, other: &CandidateScore) {
        self.weighted_count += other.weighted_count;
        self.quality_sum += other.quality_sum;
        self.quality_count += other.quality_count;
        // Same movie, same statistic; max keeps the merge order-independent
        self.popularity = self.popularity.max(other.popularity);
    }

    /// Mean of the attached quality scores, 0.0 when there are none
    pub fn mean_quality(&self) -> f64 {
        if self.quality_count == 0 {
            0.0
        } else {
            self.quality_sum / f64::from(self.quality_count)
        }
    }

    pub fn final_score(&self) -> f64 {
        self.weighted_count * COUNT_WEIGHT
            + (self.mean_quality() / QUALITY_SCALE) * QUALITY_WEIGHT
            + (self.popularity.min(POPULARITY_CAP) / POPULARITY_CAP) * POPULARITY_WEIGHT
    }
}

/// Candidate movies pooled from neighbor interactions
///
/// `merge` is associative and commutative, so partial accumulators built over
/// disjoint neighbor subsets can be combined in any order.
#[derive(Debug, Clone, Default)]
pub struct CandidateAccumulator {
    candidates: HashMap<MovieId, CandidateScore>,
}

impl CandidateAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, interaction: &NeighborInteraction) {
        let contribution = CandidateScore::from_interaction(interaction);
        self.candidates
            .entry(interaction.movie_id)
            .and_modify(|existing| existing.merge(&contribution))
            .or_insert(contribution);
    }

    pub fn merge(mut self, other: CandidateAccumulator) -> Self {
        for (movie_id, score) in other.candidates {
            self.candidates
                .entry(movie_id)
                .and_modify(|existing| existing.merge(&score))
                .or_insert(score);
        }
        self
    }

    pub fn get(&self, movie_id: MovieId) -> Option<&CandidateScore> {
        self.candidates.get(&movie_id)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Top `n` candidates by final score, ties broken by ascending movie id
    pub fn rank(&self, n: usize) -> Vec<ScoredMovie> {
        let mut scored: Vec<ScoredMovie> = self
            .candidates
            .iter()
            .map(|(&movie_id, score)| ScoredMovie {
                movie_id,
                score: score.final_score(),
            })
            .collect();

        scored.sort_by(compare_ranked);
        scored.truncate(n);
        scored
    }
}

fn compare_ranked(a: &ScoredMovie, b: &ScoredMovie) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.movie_id.cmp(&b.movie_id))
}

/// Result of recomputing one user's recommendations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeOutcome {
    /// The user has no stored embedding; nothing written
    NoEmbedding,
    /// No other user is close enough; nothing written
    NoNeighbors,
    /// The user has no movies; any previous set was cleared
    NoInteractions,
    /// `count` recommendations replaced the previous set
    Stored { count: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Nearest users consulted (default: 20)
    pub neighbor_count: usize,
    /// Recommendations kept per user (default: 10)
    pub top_n: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            neighbor_count: 20,
            top_n: 10,
        }
    }
}

pub struct RecommendationEngine {
    repository: Arc<dyn RecommendationRepository>,
    fold_in: Option<Arc<dyn UserFoldIn>>,
    config: EngineConfig,
    hybrid: HybridConfig,
}

impl RecommendationEngine {
    pub fn new(repository: Arc<dyn RecommendationRepository>, config: EngineConfig) -> Self {
        Self {
            repository,
            fold_in: None,
            config,
            hybrid: HybridConfig::default(),
        }
    }

    pub fn with_hybrid_config(mut self, hybrid: HybridConfig) -> Self {
        self.hybrid = hybrid;
        self
    }

    /// Enable embedding fold-in for [`refresh_user`](Self::refresh_user)
    pub fn with_fold_in(mut self, fold_in: Arc<dyn UserFoldIn>) -> Self {
        self.fold_in = Some(fold_in);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn RecommendationRepository> {
        &self.repository
    }

    /// Recompute and persist one user's top-N recommendations
    ///
    /// Missing embeddings and empty neighborhoods are no-ops. Persistence
    /// errors propagate without retry.
    #[instrument(skip(self))]
    pub async fn compute_for_user(&self, user_id: UserId) -> Result<RecomputeOutcome> {
        let Some(embedding) = self.repository.user_embedding(user_id).await? else {
            debug!("User has no embedding");
            return Ok(RecomputeOutcome::NoEmbedding);
        };

        let neighbors = self
            .repository
            .nearest_users(&embedding, user_id, self.config.neighbor_count)
            .await?;
        if neighbors.is_empty() {
            debug!("User has no neighbors");
            return Ok(RecomputeOutcome::NoNeighbors);
        }

        let seen = self.repository.user_movie_ids(user_id).await?;
        let neighbor_ids: Vec<UserId> = neighbors.iter().map(|n| n.user_id).collect();
        let interactions = self.repository.neighbor_interactions(&neighbor_ids).await?;

        let mut accumulator = CandidateAccumulator::new();
        for interaction in interactions.iter().filter(|i| !seen.contains(&i.movie_id)) {
            accumulator.add(interaction);
        }

        let ranked = accumulator.rank(self.config.top_n);
        self.repository
            .replace_recommendations(user_id, &ranked)
            .await?;

        debug!(
            neighbors = neighbors.len(),
            candidates = accumulator.len(),
            stored = ranked.len(),
            "Recomputed recommendations"
        );
        Ok(RecomputeOutcome::Stored {
            count: ranked.len(),
        })
    }

    /// Recompute and persist one user's recommendations with the hybrid blend
    ///
    /// Embedding and collaborative candidates are empty for a user without an
    /// embedding; genre candidates still apply.
    #[instrument(skip(self))]
    pub async fn compute_hybrid(&self, user_id: UserId) -> Result<RecomputeOutcome> {
        let seen = self.repository.user_movie_ids(user_id).await?;
        if seen.is_empty() {
            self.repository.replace_recommendations(user_id, &[]).await?;
            debug!("User has no movies");
            return Ok(RecomputeOutcome::NoInteractions);
        }

        let profile = GenreProfile::from_counts(&self.repository.user_genre_counts(user_id).await?);
        let mut scorer = HybridScorer::new();

        for (movie_id, similarity) in self
            .repository
            .embedding_candidates(user_id, self.hybrid.embedding_candidates)
            .await?
        {
            scorer.add_embedding_match(movie_id, similarity);
        }

        for (movie_id, relation) in self
            .repository
            .collaborative_candidates(user_id, self.hybrid.collaborative_rows)
            .await?
        {
            scorer.add_collaborative(movie_id, &relation);
        }

        if !profile.is_empty() {
            for movie in self
                .repository
                .genre_candidates(user_id, &profile.genre_ids(), self.hybrid.genre_candidates)
                .await?
            {
                scorer.add_genre_match(movie);
            }
        }

        let missing = scorer.missing_details();
        if !missing.is_empty() {
            for movie in self.repository.candidate_movies(&missing).await? {
                scorer.apply_details(movie);
            }
        }

        let ranked = scorer.rank(&profile, self.hybrid.top_n);
        self.repository
            .replace_recommendations(user_id, &ranked)
            .await?;

        debug!(
            genres = profile.genre_ids().len(),
            candidates = scorer.len(),
            stored = ranked.len(),
            "Recomputed hybrid recommendations"
        );
        Ok(RecomputeOutcome::Stored {
            count: ranked.len(),
        })
    }

    /// Stored recommendations, score descending
    ///
    /// Users with nothing stored get an empty list without a ranked read.
    pub async fn recommendations_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<RecommendationRecord>> {
        if !self.repository.has_recommendations(user_id).await? {
            return Ok(Vec::new());
        }
        self.repository.recommendations(user_id, limit).await
    }

    /// Fold in the user's embedding from their movies, then recompute with
    /// the hybrid blend
    ///
    /// A failed fold-in is logged and the recompute still runs against
    /// whatever embedding is stored.
    #[instrument(skip(self))]
    pub async fn refresh_user(&self, user_id: UserId) -> Result<RecomputeOutcome> {
        if let Some(fold_in) = &self.fold_in {
            match fold_in.fold_in_user(user_id).await {
                Ok(Some(_)) => debug!("Folded in user embedding"),
                Ok(None) => debug!("No embedded movies to fold in"),
                Err(e) => warn!(error = %e, "Fold-in failed, recomputing with stored embedding"),
            }
        }

        let outcome = self.compute_hybrid(user_id).await?;
        info!(?outcome, "Refreshed recommendations");
        Ok(outcome)
    }

    pub async fn invalidate(&self, user_id: UserId) -> Result<u64> {
        self.repository.invalidate_recommendations(user_id).await
    }
}
