//! Hybrid scoring for on-demand refreshes
//!
//! Blends five signals per candidate movie:
//!
//! ```text
//! genre_affinity * 0.35
//!   + max(embedding_similarity, 0) * 0.25
//!   + (collaborative / max_collaborative) * 0.20
//!   + (quality / 10) * 0.12
//!   + (min(popularity, 100) / 100) * 0.08
//! ```
//!
//! Genre affinity is the sum of the user's normalised genre frequencies over
//! the candidate's genres, so genre candidates are produced even for users
//! without an embedding.

use crate::types::{CandidateMovie, GenreId, MovieId, RelationKind, ScoredMovie};
use std::collections::HashMap;

const GENRE_WEIGHT: f64 = 0.35;
const EMBEDDING_WEIGHT: f64 = 0.25;
const COLLABORATIVE_WEIGHT: f64 = 0.20;
const QUALITY_WEIGHT: f64 = 0.12;
const POPULARITY_WEIGHT: f64 = 0.08;
const QUALITY_SCALE: f64 = 10.0;
const POPULARITY_CAP: f64 = 100.0;

/// Candidate pool sizes and output length for the hybrid path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HybridConfig {
    /// Closest movies by embedding (default: 50)
    pub embedding_candidates: usize,
    /// Neighbor interaction rows, nearest users first (default: 200)
    pub collaborative_rows: usize,
    /// Movies sharing the user's genres (default: 200)
    pub genre_candidates: usize,
    /// Recommendations kept (default: 20)
    pub top_n: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            embedding_candidates: 50,
            collaborative_rows: 200,
            genre_candidates: 200,
            top_n: 20,
        }
    }
}

/// The user's genre frequencies, normalised to sum to 1
#[derive(Debug, Clone, Default)]
pub struct GenreProfile {
    weights: HashMap<GenreId, f64>,
}

impl GenreProfile {
    /// Build from `(genre, count)` pairs; non-positive counts are ignored
    pub fn from_counts(counts: &[(GenreId, i64)]) -> Self {
        let total: i64 = counts.iter().map(|(_, n)| (*n).max(0)).sum();
        if total == 0 {
            return Self::default();
        }

        let weights = counts
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(genre, n)| (*genre, *n as f64 / total as f64))
            .collect();
        Self { weights }
    }

    pub fn weight(&self, genre_id: GenreId) -> f64 {
        self.weights.get(&genre_id).copied().unwrap_or(0.0)
    }

    pub fn affinity(&self, genre_ids: &[GenreId]) -> f64 {
        genre_ids.iter().map(|g| self.weight(*g)).sum()
    }

    /// Genres with a non-zero weight, ascending
    pub fn genre_ids(&self) -> Vec<GenreId> {
        let mut ids: Vec<GenreId> = self.weights.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HybridCandidate {
    pub embedding_similarity: f64,
    /// Sum of neighbor relation weights
    pub collaborative: f64,
    pub quality_score: Option<f64>,
    pub popularity: f64,
    pub genre_ids: Vec<GenreId>,
    has_details: bool,
}

impl HybridCandidate {
    fn set_details(&mut self, movie: CandidateMovie) {
        self.quality_score = movie.stats.quality_score;
        self.popularity = movie.stats.popularity;
        self.genre_ids = movie.genre_ids;
        self.has_details = true;
    }

    fn score(&self, profile: &GenreProfile, max_collaborative: f64) -> f64 {
        let collaborative = if max_collaborative > 0.0 {
            self.collaborative / max_collaborative
        } else {
            0.0
        };
        let quality = self.quality_score.unwrap_or(0.0) / QUALITY_SCALE;
        let popularity = self.popularity.min(POPULARITY_CAP) / POPULARITY_CAP;

        profile.affinity(&self.genre_ids) * GENRE_WEIGHT
            + self.embedding_similarity.max(0.0) * EMBEDDING_WEIGHT
            + collaborative * COLLABORATIVE_WEIGHT
            + quality * QUALITY_WEIGHT
            + popularity * POPULARITY_WEIGHT
    }
}

/// Candidate pool fed from the embedding, collaborative and genre sources
#[derive(Debug, Clone, Default)]
pub struct HybridScorer {
    candidates: HashMap<MovieId, HybridCandidate>,
}

impl HybridScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_embedding_match(&mut self, movie_id: MovieId, similarity: f64) {
        let similarity = if similarity.is_finite() { similarity } else { 0.0 };
        self.candidates.entry(movie_id).or_default().embedding_similarity = similarity;
    }

    pub fn add_collaborative(&mut self, movie_id: MovieId, relation: &RelationKind) {
        self.candidates.entry(movie_id).or_default().collaborative += relation.scoring_weight();
    }

    /// Add a genre candidate, or attach its details to an existing one
    pub fn add_genre_match(&mut self, movie: CandidateMovie) {
        self.candidates
            .entry(movie.movie_id)
            .or_default()
            .set_details(movie);
    }

    /// Attach details to a candidate already in the pool; unknown movies are ignored
    pub fn apply_details(&mut self, movie: CandidateMovie) {
        if let Some(candidate) = self.candidates.get_mut(&movie.movie_id) {
            candidate.set_details(movie);
        }
    }

    /// Candidates still lacking statistics and genres, ascending
    pub fn missing_details(&self) -> Vec<MovieId> {
        let mut ids: Vec<MovieId> = self
            .candidates
            .iter()
            .filter(|(_, c)| !c.has_details)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn get(&self, movie_id: MovieId) -> Option<&HybridCandidate> {
        self.candidates.get(&movie_id)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Top `n` by blended score, ties broken by ascending movie id
    pub fn rank(&self, profile: &GenreProfile, n: usize) -> Vec<ScoredMovie> {
        let max_collaborative = self
            .candidates
            .values()
            .map(|c| c.collaborative)
            .fold(0.0, f64::max);

        let mut scored: Vec<ScoredMovie> = self
            .candidates
            .iter()
            .map(|(&movie_id, candidate)| ScoredMovie {
                movie_id,
                score: candidate.score(profile, max_collaborative),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.movie_id.cmp(&b.movie_id))
        });
        scored.truncate(n);
        scored
    }
}
