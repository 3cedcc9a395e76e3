//! Record types decoded at the database boundary

use crate::error::{RecommenderError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UserId = i32;
pub type MovieId = i32;
pub type GenreId = i32;

/// Dense index 0 is reserved for padding and never maps to an entity
pub const PADDING_INDEX: usize = 0;

/// Width of the `vector` columns created by the bundled migration
pub const STORED_EMBEDDING_DIM: usize = 128;

/// How a user is related to a movie in `user_movies.relation_type`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Favorite,
    /// Any non-favorite relation (watchlist and the like), raw value kept
    Other(String),
}

impl RelationKind {
    /// Exactly `"favorite"` is a favorite; any other non-blank value is kept as-is
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(RecommenderError::invalid_row(
                "interaction",
                "relation_type is empty",
            ));
        }
        if raw == "favorite" {
            Ok(RelationKind::Favorite)
        } else {
            Ok(RelationKind::Other(raw.to_string()))
        }
    }

    /// Label used for the positive training sample
    pub fn training_label(&self) -> f32 {
        match self {
            RelationKind::Favorite => 1.0,
            RelationKind::Other(_) => 0.7,
        }
    }

    /// Weight a neighbor's interaction contributes to a candidate's count
    pub fn scoring_weight(&self) -> f64 {
        match self {
            RelationKind::Favorite => 1.0,
            RelationKind::Other(_) => 0.5,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationKind::Favorite => write!(f, "favorite"),
            RelationKind::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// One row of `user_movies`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub relation: RelationKind,
}

impl Interaction {
    pub fn new(user_id: UserId, movie_id: MovieId, relation: RelationKind) -> Self {
        Self {
            user_id,
            movie_id,
            relation,
        }
    }
}

/// One row of `movie_genres`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenreAssociation {
    pub movie_id: MovieId,
    pub genre_id: GenreId,
}

/// Per-movie statistics from `movies`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovieStats {
    /// Global popularity; NULL in the database reads as 0.0
    pub popularity: f64,
    /// Quality score on a 0-10 scale, when the movie has one
    pub quality_score: Option<f64>,
}

impl MovieStats {
    /// Validate nullable columns as they come off the wire
    pub fn from_columns(popularity: Option<f64>, quality_score: Option<f64>) -> Result<Self> {
        let popularity = popularity.unwrap_or(0.0);
        if !popularity.is_finite() {
            return Err(RecommenderError::invalid_row(
                "movie",
                format!("popularity is not finite: {}", popularity),
            ));
        }
        if let Some(score) = quality_score {
            if !score.is_finite() {
                return Err(RecommenderError::invalid_row(
                    "movie",
                    format!("score is not finite: {}", score),
                ));
            }
        }
        Ok(Self {
            popularity,
            quality_score,
        })
    }
}

/// A neighbor's interaction joined with the movie's statistics
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborInteraction {
    pub movie_id: MovieId,
    pub relation: RelationKind,
    pub stats: MovieStats,
}

/// A candidate movie's statistics and genres, for hybrid scoring
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMovie {
    pub movie_id: MovieId,
    pub stats: MovieStats,
    pub genre_ids: Vec<GenreId>,
}

/// Entity kinds that own an embedding table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Movie,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::User => "user_embeddings",
            EntityKind::Movie => "movie_embeddings",
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            EntityKind::User => "user_id",
            EntityKind::Movie => "movie_id",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Movie => write!(f, "movie"),
        }
    }
}

/// A stored, normalised embedding
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEmbedding {
    pub id: i32,
    pub vector: Vec<f32>,
    pub updated_at: DateTime<Utc>,
}

/// A user returned by nearest-neighbor search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub user_id: UserId,
    /// Cosine distance to the query vector, ascending across results
    pub distance: f64,
}

/// A ranked candidate ready to be persisted
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredMovie {
    pub movie_id: MovieId,
    pub score: f64,
}

/// One row of `user_recommendations`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationRecord {
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub score: f64,
    pub computed_at: DateTime<Utc>,
}
