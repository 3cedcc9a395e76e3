//! Training set construction
//!
//! Turns interaction and genre rows into the labeled tensors consumed by the
//! model trainer:
//! 1. Genre lookup per dense movie index, capped at `max_genres` in encounter order
//! 2. One positive sample per mapped interaction (favorite 1.0, other 0.7)
//! 3. `negative_ratio` negatives per positive, drawn from a seeded RNG
//! 4. Genre rows padded with 0 to a fixed width
//!
//! Identical input and seed always produce identical output.

use crate::error::Result;
use crate::mapping::IdMappings;
use crate::types::{GenreAssociation, GenreId, Interaction};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Negative sampling and tensor layout parameters
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Width of every genre row (default: 5)
    pub max_genres: usize,
    /// Negatives generated per positive (default: 4)
    pub negative_ratio: usize,
    /// Rejected draws tolerated before falling back to a catalog scan (default: 64)
    pub retry_cap: usize,
    /// RNG seed for negative sampling (default: 42)
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_genres: 5,
            negative_ratio: 4,
            retry_cap: 64,
            seed: 42,
        }
    }
}

/// Counters collected while building a training set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingStats {
    pub positives: usize,
    pub negatives: usize,
    /// Interactions whose user or movie is outside the mapping
    pub dropped_interactions: usize,
    /// Genre rows for unmapped movies or with a non-positive genre id
    pub dropped_genres: usize,
    /// Negatives that needed the catalog scan after `retry_cap` rejections
    pub probed_negatives: usize,
    /// Negatives that collide with a positive because the user has seen every movie
    pub capped_negatives: usize,
}

/// Four parallel sequences of equal length, positives first
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    pub users: Vec<i32>,
    pub movies: Vec<i32>,
    /// `len() x max_genres`, zero-padded
    pub genres: Array2<i32>,
    pub labels: Vec<f32>,
    /// Largest genre id seen in the genre rows (0 when there are none)
    pub num_genres: usize,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn max_genres(&self) -> usize {
        self.genres.ncols()
    }

    pub fn positive_count(&self) -> usize {
        self.labels.iter().filter(|l| **l > 0.0).count()
    }

    /// Rows at `indices`, in the given order
    pub fn select(&self, indices: &[usize]) -> TrainingSet {
        TrainingSet {
            users: indices.iter().map(|&i| self.users[i]).collect(),
            movies: indices.iter().map(|&i| self.movies[i]).collect(),
            genres: self.genres.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            num_genres: self.num_genres,
        }
    }

    /// Deterministic `(train, validation)` partition
    ///
    /// Rows are shuffled with `seed`; the first `ceil(len * validation_fraction)`
    /// go to validation.
    pub fn split(&self, validation_fraction: f64, seed: u64) -> (TrainingSet, TrainingSet) {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let fraction = validation_fraction.clamp(0.0, 1.0);
        let validation_len = ((self.len() as f64) * fraction).ceil() as usize;
        let (validation, train) = indices.split_at(validation_len.min(self.len()));

        (self.select(train), self.select(validation))
    }
}

/// Builds labeled training tensors with seeded negative sampling
pub struct TrainingSetBuilder {
    config: SamplingConfig,
}

impl TrainingSetBuilder {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    pub fn build(
        &self,
        interactions: &[Interaction],
        genres: &[GenreAssociation],
        mappings: &IdMappings,
    ) -> Result<(TrainingSet, TrainingStats)> {
        let width = self.config.max_genres;
        let num_movies = mappings.num_movies();
        let mut stats = TrainingStats::default();

        // Genre lookup keyed by dense movie index, encounter order
        let mut genre_lookup: HashMap<usize, Vec<GenreId>> = HashMap::new();
        let mut num_genres = 0usize;
        for association in genres {
            if association.genre_id > 0 {
                num_genres = num_genres.max(association.genre_id as usize);
            }
            let Some(movie_idx) = mappings.movies.index_of(&association.movie_id) else {
                stats.dropped_genres += 1;
                continue;
            };
            if association.genre_id <= 0 {
                stats.dropped_genres += 1;
                continue;
            }
            let entry = genre_lookup.entry(movie_idx).or_default();
            if entry.len() < width {
                entry.push(association.genre_id);
            }
        }

        let genre_row = |movie_idx: usize| -> Vec<i32> {
            let mut row = genre_lookup.get(&movie_idx).cloned().unwrap_or_default();
            row.resize(width, 0);
            row
        };

        let mut users: Vec<usize> = Vec::new();
        let mut movies: Vec<usize> = Vec::new();
        let mut genre_rows: Vec<Vec<i32>> = Vec::new();
        let mut labels: Vec<f32> = Vec::new();
        let mut seen: HashMap<usize, HashSet<usize>> = HashMap::new();

        for interaction in interactions {
            let (Some(user_idx), Some(movie_idx)) = (
                mappings.users.index_of(&interaction.user_id),
                mappings.movies.index_of(&interaction.movie_id),
            ) else {
                stats.dropped_interactions += 1;
                continue;
            };

            seen.entry(user_idx).or_default().insert(movie_idx);
            users.push(user_idx);
            movies.push(movie_idx);
            genre_rows.push(genre_row(movie_idx));
            labels.push(interaction.relation.training_label());
        }
        stats.positives = users.len();

        if stats.dropped_interactions > 0 || stats.dropped_genres > 0 {
            warn!(
                dropped_interactions = stats.dropped_interactions,
                dropped_genres = stats.dropped_genres,
                "Dropped rows referencing ids outside the current mapping"
            );
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let num_positives = stats.positives;
        let empty = HashSet::new();

        if num_positives > 0 && num_movies > 0 {
            for _ in 0..num_positives * self.config.negative_ratio {
                let user_idx = users[rng.gen_range(0..num_positives)];
                let user_seen = seen.get(&user_idx).unwrap_or(&empty);
                let movie_idx = self.draw_negative(&mut rng, user_seen, num_movies, &mut stats);

                users.push(user_idx);
                movies.push(movie_idx);
                genre_rows.push(genre_row(movie_idx));
                labels.push(0.0);
                stats.negatives += 1;
            }
        }

        if stats.capped_negatives > 0 {
            warn!(
                capped_negatives = stats.capped_negatives,
                "Accepted negatives that collide with positives for users who have seen every movie"
            );
        }

        let genres = Array2::from_shape_fn((genre_rows.len(), width), |(r, c)| genre_rows[r][c]);

        let set = TrainingSet {
            users: users.into_iter().map(|i| i as i32).collect(),
            movies: movies.into_iter().map(|i| i as i32).collect(),
            genres,
            labels,
            num_genres,
        };

        info!(
            samples = set.len(),
            positives = stats.positives,
            negatives = stats.negatives,
            "Built training set"
        );

        Ok((set, stats))
    }

    /// Draw a movie index in `1..=num_movies` outside `seen`
    ///
    /// Rejection sampling for up to `retry_cap` draws, then a wrapping scan from
    /// a random start. When every movie is in `seen` the random start itself is
    /// returned.
    fn draw_negative(
        &self,
        rng: &mut StdRng,
        seen: &HashSet<usize>,
        num_movies: usize,
        stats: &mut TrainingStats,
    ) -> usize {
        let mut candidate = rng.gen_range(1..=num_movies);
        let mut rejections = 0;

        while seen.contains(&candidate) {
            if rejections >= self.config.retry_cap {
                stats.probed_negatives += 1;
                let start = rng.gen_range(1..=num_movies);
                let found = (0..num_movies)
                    .map(|offset| (start - 1 + offset) % num_movies + 1)
                    .find(|idx| !seen.contains(idx));

                return match found {
                    Some(idx) => idx,
                    None => {
                        stats.capped_negatives += 1;
                        debug!(movie_idx = start, "No unseen movie left for user");
                        start
                    }
                };
            }
            rejections += 1;
            candidate = rng.gen_range(1..=num_movies);
        }

        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelationKind;

    fn favorite(user_id: i32, movie_id: i32) -> Interaction {
        Interaction::new(user_id, movie_id, RelationKind::Favorite)
    }

    fn watchlist(user_id: i32, movie_id: i32) -> Interaction {
        Interaction::new(user_id, movie_id, RelationKind::Other("watchlist".into()))
    }

    fn genre(movie_id: i32, genre_id: i32) -> GenreAssociation {
        GenreAssociation { movie_id, genre_id }
    }

    fn catalog() -> Vec<Interaction> {
        let mut rows = Vec::new();
        for user in 1..=6 {
            for movie in 1..=20 {
                if (user * 7 + movie) % 5 == 0 {
                    rows.push(favorite(user, movie));
                } else if (user + movie) % 6 == 0 {
                    rows.push(watchlist(user, movie));
                }
            }
        }
        rows
    }

    #[test]
    fn test_labels_follow_relation_kind() {
        let interactions = vec![favorite(1, 10), watchlist(1, 11), favorite(2, 12)];
        let mappings = IdMappings::from_interactions(&interactions).unwrap();
        let builder = TrainingSetBuilder::new(SamplingConfig {
            negative_ratio: 0,
            ..Default::default()
        });

        let (set, stats) = builder.build(&interactions, &[], &mappings).unwrap();
        assert_eq!(set.labels, vec![1.0, 0.7, 1.0]);
        assert_eq!(stats.positives, 3);
        assert_eq!(stats.negatives, 0);
    }

    #[test]
    fn test_sequences_have_equal_length() {
        let interactions = catalog();
        let mappings = IdMappings::from_interactions(&interactions).unwrap();
        let builder = TrainingSetBuilder::new(SamplingConfig::default());

        let (set, stats) = builder.build(&interactions, &[], &mappings).unwrap();
        let expected = interactions.len() * 5;
        assert_eq!(set.len(), expected);
        assert_eq!(set.users.len(), expected);
        assert_eq!(set.movies.len(), expected);
        assert_eq!(set.genres.nrows(), expected);
        assert_eq!(stats.negatives, interactions.len() * 4);
    }

    #[test]
    fn test_negative_sampling_is_deterministic() {
        let interactions = catalog();
        let genres = vec![genre(5, 1), genre(5, 3), genre(10, 2)];
        let mappings = IdMappings::from_interactions(&interactions).unwrap();
        let builder = TrainingSetBuilder::new(SamplingConfig::default());

        let (first, _) = builder.build(&interactions, &genres, &mappings).unwrap();
        let (second, _) = builder.build(&interactions, &genres, &mappings).unwrap();
        assert_eq!(first, second);

        let other_seed = TrainingSetBuilder::new(SamplingConfig {
            seed: 7,
            ..Default::default()
        });
        let (third, _) = other_seed.build(&interactions, &genres, &mappings).unwrap();
        assert_ne!(first.movies, third.movies);
    }

    #[test]
    fn test_negatives_never_duplicate_positives() {
        let interactions = catalog();
        let mappings = IdMappings::from_interactions(&interactions).unwrap();
        let builder = TrainingSetBuilder::new(SamplingConfig::default());

        let (set, stats) = builder.build(&interactions, &[], &mappings).unwrap();
        let positives: HashSet<(i32, i32)> = (0..set.len())
            .filter(|&i| set.labels[i] > 0.0)
            .map(|i| (set.users[i], set.movies[i]))
            .collect();

        for i in 0..set.len() {
            if set.labels[i] == 0.0 {
                assert!(!positives.contains(&(set.users[i], set.movies[i])));
                assert!((1..=mappings.num_movies() as i32).contains(&set.movies[i]));
            }
        }
        assert_eq!(stats.capped_negatives, 0);
    }

    #[test]
    fn test_user_who_saw_whole_catalog_terminates() {
        // One user has seen both movies, so no valid negative exists for them
        let interactions = vec![favorite(1, 100), favorite(1, 200)];
        let mappings = IdMappings::from_interactions(&interactions).unwrap();
        let builder = TrainingSetBuilder::new(SamplingConfig {
            retry_cap: 3,
            ..Default::default()
        });

        let (set, stats) = builder.build(&interactions, &[], &mappings).unwrap();
        assert_eq!(set.len(), 10);
        assert_eq!(stats.negatives, 8);
        assert_eq!(stats.capped_negatives, 8);
        assert_eq!(stats.probed_negatives, 8);
    }

    #[test]
    fn test_catalog_scan_finds_the_last_unseen_movie() {
        // User 1 has seen 99 of 100 movies; rejection sampling will rarely hit
        // the single unseen one within the cap, the scan must.
        let mut interactions: Vec<Interaction> = (1..=99).map(|m| favorite(1, m)).collect();
        interactions.push(favorite(2, 100));
        let mappings = IdMappings::from_interactions(&interactions).unwrap();
        let builder = TrainingSetBuilder::new(SamplingConfig {
            retry_cap: 1,
            negative_ratio: 1,
            ..Default::default()
        });

        let (set, stats) = builder.build(&interactions, &[], &mappings).unwrap();
        let user_one = mappings.users.index_of(&1).unwrap() as i32;
        let last_movie = mappings.movies.index_of(&100).unwrap() as i32;
        for i in 0..set.len() {
            if set.labels[i] == 0.0 && set.users[i] == user_one {
                assert_eq!(set.movies[i], last_movie);
            }
        }
        assert_eq!(stats.capped_negatives, 0);
    }

    #[test]
    fn test_genre_rows_are_capped_and_padded() {
        let interactions = vec![favorite(1, 10), favorite(1, 20)];
        let genres = vec![
            genre(10, 1),
            genre(10, 2),
            genre(10, 3),
            genre(10, 4),
            genre(10, 5),
            genre(10, 6),
            genre(20, 9),
            genre(30, 8),
        ];
        let mappings = IdMappings::from_interactions(&interactions).unwrap();
        let builder = TrainingSetBuilder::new(SamplingConfig {
            negative_ratio: 0,
            ..Default::default()
        });

        let (set, stats) = builder.build(&interactions, &genres, &mappings).unwrap();
        assert_eq!(set.max_genres(), 5);
        assert_eq!(set.genres.row(0).to_vec(), vec![1, 2, 3, 4, 5]);
        assert_eq!(set.genres.row(1).to_vec(), vec![9, 0, 0, 0, 0]);
        assert_eq!(set.num_genres, 9);
        assert_eq!(stats.dropped_genres, 1);
    }

    #[test]
    fn test_movie_without_genres_gets_zero_row() {
        let interactions = vec![favorite(1, 10)];
        let mappings = IdMappings::from_interactions(&interactions).unwrap();
        let builder = TrainingSetBuilder::new(SamplingConfig {
            negative_ratio: 0,
            ..Default::default()
        });

        let (set, _) = builder.build(&interactions, &[], &mappings).unwrap();
        assert_eq!(set.genres.row(0).to_vec(), vec![0; 5]);
        assert_eq!(set.num_genres, 0);
    }

    #[test]
    fn test_unmapped_interactions_are_dropped_and_counted() {
        let snapshot = vec![favorite(1, 10), favorite(2, 20)];
        let mappings = IdMappings::from_interactions(&snapshot).unwrap();
        let mut current = snapshot.clone();
        current.push(favorite(3, 10));
        current.push(favorite(1, 99));

        let builder = TrainingSetBuilder::new(SamplingConfig {
            negative_ratio: 0,
            ..Default::default()
        });
        let (set, stats) = builder.build(&current, &[], &mappings).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(stats.dropped_interactions, 2);
    }

    #[test]
    fn test_split_is_deterministic_and_complete() {
        let interactions = catalog();
        let mappings = IdMappings::from_interactions(&interactions).unwrap();
        let builder = TrainingSetBuilder::new(SamplingConfig::default());
        let (set, _) = builder.build(&interactions, &[], &mappings).unwrap();

        let (train, validation) = set.split(0.1, 42);
        let (train_again, validation_again) = set.split(0.1, 42);

        assert_eq!(train, train_again);
        assert_eq!(validation, validation_again);
        assert_eq!(train.len() + validation.len(), set.len());
        assert_eq!(validation.len(), ((set.len() as f64) * 0.1).ceil() as usize);
        assert_eq!(train.max_genres(), set.max_genres());
    }

    #[test]
    fn test_positive_count_survives_split() {
        let interactions = catalog();
        let mappings = IdMappings::from_interactions(&interactions).unwrap();
        let builder = TrainingSetBuilder::new(SamplingConfig::default());
        let (set, stats) = builder.build(&interactions, &[], &mappings).unwrap();

        assert_eq!(set.positive_count(), stats.positives);
        let (train, validation) = set.split(0.1, 42);
        assert_eq!(
            train.positive_count() + validation.positive_count(),
            stats.positives
        );
    }
}
