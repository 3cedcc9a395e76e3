//! In-memory repository and fold-in doubles

use crate::embedding_store::UserFoldIn;
use crate::error::{RecommenderError, Result};
use crate::repository::{CandidateSource, RecommendationRepository};
use crate::types::{
    CandidateMovie, GenreId, MovieId, MovieStats, Neighbor, NeighborInteraction,
    RecommendationRecord, RelationKind, ScoredMovie, UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use moovies_core::math::cosine_distance;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Failure injected into `replace_recommendations`
#[derive(Debug, Clone, Copy)]
pub enum InjectedFailure {
    /// Pool timeout, retried by the batch
    Transient,
    /// Row not found, never retried
    Permanent,
}

impl InjectedFailure {
    fn to_error(self) -> RecommenderError {
        match self {
            InjectedFailure::Transient => RecommenderError::from(sqlx::Error::PoolTimedOut),
            InjectedFailure::Permanent => RecommenderError::from(sqlx::Error::RowNotFound),
        }
    }
}

const UNRATED: MovieStats = MovieStats {
    popularity: 0.0,
    quality_score: None,
};

#[derive(Default)]
struct State {
    embeddings: HashMap<UserId, Vec<f32>>,
    movie_embeddings: HashMap<MovieId, Vec<f32>>,
    interactions: Vec<(UserId, MovieId, RelationKind)>,
    movies: HashMap<MovieId, MovieStats>,
    genres: HashMap<MovieId, Vec<GenreId>>,
    recommendations: HashMap<UserId, Vec<RecommendationRecord>>,
    failures: HashMap<UserId, VecDeque<InjectedFailure>>,
    ping_fails: bool,
}

#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
    replace_calls: AtomicUsize,
    read_calls: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(self, user_id: UserId, vector: Vec<f32>) -> Self {
        self.state.lock().unwrap().embeddings.insert(user_id, vector);
        self
    }

    pub fn with_interaction(self, user_id: UserId, movie_id: MovieId, relation: RelationKind) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.interactions.push((user_id, movie_id, relation));
            state.movies.entry(movie_id).or_insert(UNRATED);
        }
        self
    }

    pub fn with_genres(self, movie_id: MovieId, genres: &[GenreId]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.genres.insert(movie_id, genres.to_vec());
            state.movies.entry(movie_id).or_insert(UNRATED);
        }
        self
    }

    pub fn with_movie_embedding(self, movie_id: MovieId, vector: Vec<f32>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.movie_embeddings.insert(movie_id, vector);
            state.movies.entry(movie_id).or_insert(UNRATED);
        }
        self
    }

    pub fn favorite(self, user_id: UserId, movie_id: MovieId) -> Self {
        self.with_interaction(user_id, movie_id, RelationKind::Favorite)
    }

    pub fn watchlist(self, user_id: UserId, movie_id: MovieId) -> Self {
        self.with_interaction(user_id, movie_id, RelationKind::Other("watchlist".into()))
    }

    pub fn with_movie(self, movie_id: MovieId, popularity: f64, quality_score: Option<f64>) -> Self {
        self.state.lock().unwrap().movies.insert(
            movie_id,
            MovieStats {
                popularity,
                quality_score,
            },
        );
        self
    }

    pub fn fail_replace(&self, user_id: UserId, failures: &[InjectedFailure]) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(user_id)
            .or_default()
            .extend(failures.iter().copied());
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.state.lock().unwrap().ping_fails = fails;
    }

    pub fn stored(&self, user_id: UserId) -> Vec<RecommendationRecord> {
        self.state
            .lock()
            .unwrap()
            .recommendations
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stored_movie_ids(&self, user_id: UserId) -> Vec<MovieId> {
        self.stored(user_id).iter().map(|r| r.movie_id).collect()
    }

    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }
}

impl State {
    fn seen(&self, user_id: UserId) -> HashSet<MovieId> {
        self.interactions
            .iter()
            .filter(|(user, _, _)| *user == user_id)
            .map(|(_, movie, _)| *movie)
            .collect()
    }

    fn sorted_genres(&self, movie_id: MovieId) -> Vec<GenreId> {
        let mut genres = self.genres.get(&movie_id).cloned().unwrap_or_default();
        genres.sort_unstable();
        genres
    }
}

#[async_trait]
impl CandidateSource for InMemoryRepository {
    async fn user_genre_counts(&self, user_id: UserId) -> Result<Vec<(GenreId, i64)>> {
        let state = self.state.lock().unwrap();
        let mut counts: BTreeMap<GenreId, i64> = BTreeMap::new();
        for (_, movie_id, _) in state.interactions.iter().filter(|(u, _, _)| *u == user_id) {
            for genre in state.genres.get(movie_id).into_iter().flatten() {
                *counts.entry(*genre).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    async fn embedding_candidates(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<(MovieId, f64)>> {
        let state = self.state.lock().unwrap();
        let Some(user) = state.embeddings.get(&user_id) else {
            return Ok(Vec::new());
        };
        let seen = state.seen(user_id);

        let mut ranked: Vec<(MovieId, f64)> = state
            .movie_embeddings
            .iter()
            .filter(|(id, _)| !seen.contains(*id))
            .map(|(id, vector)| (*id, f64::from(cosine_distance(user, vector))))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        Ok(ranked.into_iter().map(|(id, d)| (id, 1.0 - d)).collect())
    }

    async fn collaborative_candidates(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<(MovieId, RelationKind)>> {
        let state = self.state.lock().unwrap();
        let Some(user) = state.embeddings.get(&user_id) else {
            return Ok(Vec::new());
        };
        let seen = state.seen(user_id);

        let mut others: Vec<(UserId, f64)> = state
            .embeddings
            .iter()
            .filter(|(id, _)| **id != user_id)
            .map(|(id, vector)| (*id, f64::from(cosine_distance(user, vector))))
            .collect();
        others.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut rows = Vec::new();
        for (other, _) in others {
            let mut theirs: Vec<(MovieId, RelationKind)> = state
                .interactions
                .iter()
                .filter(|(u, m, _)| *u == other && !seen.contains(m))
                .map(|(_, m, r)| (*m, r.clone()))
                .collect();
            theirs.sort_by_key(|(m, _)| *m);
            rows.extend(theirs);
        }
        rows.truncate(limit);
        Ok(rows)
    }

    async fn genre_candidates(
        &self,
        user_id: UserId,
        genres: &[GenreId],
        limit: usize,
    ) -> Result<Vec<CandidateMovie>> {
        let state = self.state.lock().unwrap();
        let seen = state.seen(user_id);

        let mut matches: Vec<CandidateMovie> = state
            .genres
            .keys()
            .filter(|id| !seen.contains(*id))
            .filter_map(|&movie_id| {
                let matched: Vec<GenreId> = state
                    .sorted_genres(movie_id)
                    .into_iter()
                    .filter(|g| genres.contains(g))
                    .collect();
                (!matched.is_empty()).then(|| CandidateMovie {
                    movie_id,
                    stats: state.movies.get(&movie_id).copied().unwrap_or(UNRATED),
                    genre_ids: matched,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.genre_ids
                .len()
                .cmp(&a.genre_ids.len())
                .then_with(|| {
                    let quality = |m: &CandidateMovie| m.stats.quality_score.unwrap_or(f64::MIN);
                    quality(b).total_cmp(&quality(a))
                })
                .then_with(|| a.movie_id.cmp(&b.movie_id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn candidate_movies(&self, movie_ids: &[MovieId]) -> Result<Vec<CandidateMovie>> {
        let state = self.state.lock().unwrap();
        Ok(movie_ids
            .iter()
            .filter_map(|id| {
                state.movies.get(id).map(|stats| CandidateMovie {
                    movie_id: *id,
                    stats: *stats,
                    genre_ids: state.sorted_genres(*id),
                })
            })
            .collect())
    }
}

#[async_trait]
impl RecommendationRepository for InMemoryRepository {
    async fn ping(&self) -> Result<()> {
        if self.state.lock().unwrap().ping_fails {
            return Err(RecommenderError::from(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    async fn user_embedding(&self, user_id: UserId) -> Result<Option<Vec<f32>>> {
        Ok(self.state.lock().unwrap().embeddings.get(&user_id).cloned())
    }

    async fn nearest_users(
        &self,
        vector: &[f32],
        exclude: UserId,
        k: usize,
    ) -> Result<Vec<Neighbor>> {
        let state = self.state.lock().unwrap();
        let mut neighbors: Vec<Neighbor> = state
            .embeddings
            .iter()
            .filter(|(id, _)| **id != exclude)
            .map(|(id, embedding)| Neighbor {
                user_id: *id,
                distance: f64::from(cosine_distance(vector, embedding)),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    async fn user_movie_ids(&self, user_id: UserId) -> Result<HashSet<MovieId>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .interactions
            .iter()
            .filter(|(user, _, _)| *user == user_id)
            .map(|(_, movie, _)| *movie)
            .collect())
    }

    async fn neighbor_interactions(&self, user_ids: &[UserId]) -> Result<Vec<NeighborInteraction>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .interactions
            .iter()
            .filter(|(user, _, _)| user_ids.contains(user))
            .map(|(_, movie_id, relation)| NeighborInteraction {
                movie_id: *movie_id,
                relation: relation.clone(),
                stats: state.movies[movie_id],
            })
            .collect())
    }

    async fn replace_recommendations(&self, user_id: UserId, movies: &[ScoredMovie]) -> Result<()> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();

        if let Some(failure) = state.failures.get_mut(&user_id).and_then(VecDeque::pop_front) {
            return Err(failure.to_error());
        }

        let now = Utc::now();
        let rows = movies
            .iter()
            .map(|m| RecommendationRecord {
                user_id,
                movie_id: m.movie_id,
                score: m.score,
                computed_at: now,
            })
            .collect();
        state.recommendations.insert(user_id, rows);
        Ok(())
    }

    async fn users_with_embeddings(&self) -> Result<Vec<UserId>> {
        let mut ids: Vec<UserId> = self.state.lock().unwrap().embeddings.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn recommendations(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<RecommendationRecord>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.stored(user_id);
        rows.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.movie_id.cmp(&b.movie_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn has_recommendations(&self, user_id: UserId) -> Result<bool> {
        Ok(!self.stored(user_id).is_empty())
    }

    async fn invalidate_recommendations(&self, user_id: UserId) -> Result<u64> {
        let removed = self
            .state
            .lock()
            .unwrap()
            .recommendations
            .remove(&user_id)
            .map(|rows| rows.len() as u64)
            .unwrap_or(0);
        Ok(removed)
    }
}

/// Fold-in double that records calls and can be told to fail
#[derive(Default)]
pub struct RecordingFoldIn {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl RecordingFoldIn {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl UserFoldIn for RecordingFoldIn {
    async fn fold_in_user(&self, _user_id: UserId) -> Result<Option<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RecommenderError::from(sqlx::Error::PoolTimedOut));
        }
        Ok(None)
    }
}
