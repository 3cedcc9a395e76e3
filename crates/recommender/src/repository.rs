//! Database access for the recommendation engine
//!
//! [`RecommendationRepository`] is the session seam the engine and the batch
//! orchestrator work against. The Postgres implementation borrows a shared
//! pool handed in by the caller.

use crate::error::{RecommenderError, Result};
use crate::types::{
    CandidateMovie, GenreAssociation, GenreId, Interaction, MovieId, MovieStats, Neighbor,
    NeighborInteraction, RecommendationRecord, RelationKind, ScoredMovie, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use tracing::{debug, instrument};

/// Candidate retrieval for hybrid scoring
///
/// Every candidate query excludes the movies the user already has.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// `(genre, count)` over the genres of the user's movies
    async fn user_genre_counts(&self, user_id: UserId) -> Result<Vec<(GenreId, i64)>>;

    /// Up to `limit` movies closest to the user's embedding, as
    /// `(movie, cosine similarity)`; empty when the user has no embedding
    async fn embedding_candidates(&self, user_id: UserId, limit: usize)
        -> Result<Vec<(MovieId, f64)>>;

    /// Up to `limit` interaction rows of other embedded users, nearest first
    async fn collaborative_candidates(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<(MovieId, RelationKind)>>;

    /// Up to `limit` movies in any of `genres`, carrying only the matched
    /// genres, most matched genres first then highest quality
    async fn genre_candidates(
        &self,
        user_id: UserId,
        genres: &[GenreId],
        limit: usize,
    ) -> Result<Vec<CandidateMovie>>;

    /// Statistics and every genre of the given movies
    async fn candidate_movies(&self, movie_ids: &[MovieId]) -> Result<Vec<CandidateMovie>>;
}

/// Storage operations needed to compute, persist and serve recommendations
#[async_trait]
pub trait RecommendationRepository: CandidateSource {
    /// Round-trip to the store, for health checks
    async fn ping(&self) -> Result<()>;

    /// Stored embedding for a user, if any
    async fn user_embedding(&self, user_id: UserId) -> Result<Option<Vec<f32>>>;

    /// Up to `k` users closest to `vector` by cosine distance, ascending,
    /// never including `exclude`
    async fn nearest_users(
        &self,
        vector: &[f32],
        exclude: UserId,
        k: usize,
    ) -> Result<Vec<Neighbor>>;

    /// Movies the user has any relation with
    async fn user_movie_ids(&self, user_id: UserId) -> Result<HashSet<MovieId>>;

    /// Every interaction of the given users, joined with movie statistics
    async fn neighbor_interactions(&self, user_ids: &[UserId]) -> Result<Vec<NeighborInteraction>>;

    /// Replace the user's whole recommendation set with `movies`
    async fn replace_recommendations(&self, user_id: UserId, movies: &[ScoredMovie]) -> Result<()>;

    /// Every user that has a stored embedding, ascending
    async fn users_with_embeddings(&self) -> Result<Vec<UserId>>;

    /// Stored recommendations, score descending
    async fn recommendations(&self, user_id: UserId, limit: usize)
        -> Result<Vec<RecommendationRecord>>;

    async fn has_recommendations(&self, user_id: UserId) -> Result<bool>;

    /// Drop the user's stored recommendations; returns the number removed
    async fn invalidate_recommendations(&self, user_id: UserId) -> Result<u64>;
}

/// Postgres + pgvector implementation
#[derive(Clone)]
pub struct PostgresRecommendationRepository {
    pool: PgPool,
}

impl PostgresRecommendationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Full interaction snapshot for training
    #[instrument(skip(self))]
    pub async fn load_interactions(&self) -> Result<Vec<Interaction>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, movie_id, relation_type
            FROM user_movies
            ORDER BY user_id, movie_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let interactions = rows
            .iter()
            .map(decode_interaction)
            .collect::<Result<Vec<_>>>()?;

        debug!(count = interactions.len(), "Loaded interactions");
        Ok(interactions)
    }

    /// Every movie-genre association
    #[instrument(skip(self))]
    pub async fn load_movie_genres(&self) -> Result<Vec<GenreAssociation>> {
        let rows = sqlx::query(
            r#"
            SELECT movie_id, genre_id
            FROM movie_genres
            ORDER BY movie_id, genre_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let genres = rows
            .iter()
            .map(|row| -> Result<GenreAssociation> {
                Ok(GenreAssociation {
                    movie_id: row.try_get("movie_id")?,
                    genre_id: row.try_get("genre_id")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(count = genres.len(), "Loaded movie genres");
        Ok(genres)
    }
}

fn decode_interaction(row: &PgRow) -> Result<Interaction> {
    let relation: String = row.try_get("relation_type")?;
    Ok(Interaction {
        user_id: row.try_get("user_id")?,
        movie_id: row.try_get("movie_id")?,
        relation: RelationKind::parse(&relation)?,
    })
}

fn decode_neighbor_interaction(row: &PgRow) -> Result<NeighborInteraction> {
    let relation: String = row.try_get("relation_type")?;
    let popularity: Option<f64> = row.try_get("popularity")?;
    let score: Option<f64> = row.try_get("score")?;

    Ok(NeighborInteraction {
        movie_id: row.try_get("movie_id")?,
        relation: RelationKind::parse(&relation)?,
        stats: MovieStats::from_columns(popularity, score)?,
    })
}

fn decode_candidate_movie(row: &PgRow) -> Result<CandidateMovie> {
    let popularity: Option<f64> = row.try_get("popularity")?;
    let score: Option<f64> = row.try_get("score")?;

    Ok(CandidateMovie {
        movie_id: row.try_get("movie_id")?,
        stats: MovieStats::from_columns(popularity, score)?,
        genre_ids: row.try_get("genre_ids")?,
    })
}

fn to_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl CandidateSource for PostgresRecommendationRepository {
    async fn user_genre_counts(&self, user_id: UserId) -> Result<Vec<(GenreId, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT mg.genre_id, COUNT(*) AS cnt
            FROM user_movies um
            JOIN movie_genres mg ON mg.movie_id = um.movie_id
            WHERE um.user_id = $1
            GROUP BY mg.genre_id
            ORDER BY mg.genre_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(GenreId, i64)> { Ok((row.try_get("genre_id")?, row.try_get("cnt")?)) })
            .collect()
    }

    async fn embedding_candidates(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<(MovieId, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT me.movie_id, 1 - (me.embedding <=> ue.embedding) AS similarity
            FROM movie_embeddings me
            CROSS JOIN user_embeddings ue
            WHERE ue.user_id = $1
              AND me.movie_id NOT IN (SELECT movie_id FROM user_movies WHERE user_id = $1)
            ORDER BY me.embedding <=> ue.embedding ASC, me.movie_id ASC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(MovieId, f64)> {
                let similarity: Option<f64> = row.try_get("similarity")?;
                Ok((
                    row.try_get("movie_id")?,
                    similarity.filter(|s| s.is_finite()).unwrap_or(0.0),
                ))
            })
            .collect()
    }

    async fn collaborative_candidates(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<(MovieId, RelationKind)>> {
        let rows = sqlx::query(
            r#"
            SELECT um.movie_id, um.relation_type
            FROM user_embeddings ue_other
            JOIN user_movies um ON um.user_id = ue_other.user_id
            CROSS JOIN user_embeddings ue_self
            WHERE ue_self.user_id = $1
              AND ue_other.user_id <> $1
              AND um.movie_id NOT IN (SELECT movie_id FROM user_movies WHERE user_id = $1)
            ORDER BY ue_other.embedding <=> ue_self.embedding ASC, um.user_id ASC, um.movie_id ASC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(MovieId, RelationKind)> {
                let relation: String = row.try_get("relation_type")?;
                Ok((row.try_get("movie_id")?, RelationKind::parse(&relation)?))
            })
            .collect()
    }

    async fn genre_candidates(
        &self,
        user_id: UserId,
        genres: &[GenreId],
        limit: usize,
    ) -> Result<Vec<CandidateMovie>> {
        if genres.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT m.id AS movie_id,
                   m.popularity::DOUBLE PRECISION AS popularity,
                   m.score::DOUBLE PRECISION AS score,
                   array_agg(mg.genre_id ORDER BY mg.genre_id) AS genre_ids
            FROM movies m
            JOIN movie_genres mg ON mg.movie_id = m.id
            WHERE mg.genre_id = ANY($2)
              AND m.id NOT IN (SELECT movie_id FROM user_movies WHERE user_id = $1)
            GROUP BY m.id, m.score, m.popularity
            ORDER BY COUNT(DISTINCT mg.genre_id) DESC, m.score DESC NULLS LAST, m.id ASC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(genres)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_candidate_movie).collect()
    }

    async fn candidate_movies(&self, movie_ids: &[MovieId]) -> Result<Vec<CandidateMovie>> {
        if movie_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT m.id AS movie_id,
                   m.popularity::DOUBLE PRECISION AS popularity,
                   m.score::DOUBLE PRECISION AS score,
                   COALESCE(
                       (SELECT array_agg(mg.genre_id ORDER BY mg.genre_id)
                        FROM movie_genres mg WHERE mg.movie_id = m.id),
                       '{}'::INTEGER[]
                   ) AS genre_ids
            FROM movies m
            WHERE m.id = ANY($1)
            "#,
        )
        .bind(movie_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_candidate_movie).collect()
    }
}

#[async_trait]
impl RecommendationRepository for PostgresRecommendationRepository {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn user_embedding(&self, user_id: UserId) -> Result<Option<Vec<f32>>> {
        let embedding: Option<Vector> =
            sqlx::query_scalar("SELECT embedding FROM user_embeddings WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(embedding.map(|v| v.to_vec()))
    }

    async fn nearest_users(
        &self,
        vector: &[f32],
        exclude: UserId,
        k: usize,
    ) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT user_id, embedding <=> $1 AS distance
            FROM user_embeddings
            WHERE user_id <> $2
            ORDER BY embedding <=> $1 ASC, user_id ASC
            LIMIT $3
            "#,
        )
        .bind(Vector::from(vector.to_vec()))
        .bind(exclude)
        .bind(to_limit(k))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Neighbor> {
                let distance: Option<f64> = row.try_get("distance")?;
                Ok(Neighbor {
                    user_id: row.try_get("user_id")?,
                    // NaN against a zero vector
                    distance: distance.filter(|d| d.is_finite()).unwrap_or(f64::MAX),
                })
            })
            .collect()
    }

    async fn user_movie_ids(&self, user_id: UserId) -> Result<HashSet<MovieId>> {
        let ids: Vec<MovieId> =
            sqlx::query_scalar("SELECT movie_id FROM user_movies WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(ids.into_iter().collect())
    }

    async fn neighbor_interactions(&self, user_ids: &[UserId]) -> Result<Vec<NeighborInteraction>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT um.movie_id,
                   um.relation_type,
                   m.popularity::DOUBLE PRECISION AS popularity,
                   m.score::DOUBLE PRECISION AS score
            FROM user_movies um
            JOIN movies m ON m.id = um.movie_id
            WHERE um.user_id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_neighbor_interaction).collect()
    }

    #[instrument(skip(self, movies), fields(count = movies.len()))]
    async fn replace_recommendations(&self, user_id: UserId, movies: &[ScoredMovie]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Serialises writers for the same user until commit
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(i64::from(user_id))
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM user_recommendations WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for movie in movies {
            sqlx::query(
                r#"
                INSERT INTO user_recommendations (user_id, movie_id, score, computed_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (user_id, movie_id)
                DO UPDATE SET score = EXCLUDED.score, computed_at = NOW()
                "#,
            )
            .bind(user_id)
            .bind(movie.movie_id)
            .bind(movie.score)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn users_with_embeddings(&self) -> Result<Vec<UserId>> {
        let ids: Vec<UserId> =
            sqlx::query_scalar("SELECT user_id FROM user_embeddings ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn recommendations(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<RecommendationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, movie_id, score, computed_at
            FROM user_recommendations
            WHERE user_id = $1
            ORDER BY score DESC, movie_id ASC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<RecommendationRecord> {
                let score: f64 = row.try_get("score")?;
                if !score.is_finite() {
                    return Err(RecommenderError::invalid_row(
                        "recommendation",
                        format!("score is not finite: {}", score),
                    ));
                }
                let computed_at: DateTime<Utc> = row.try_get("computed_at")?;
                Ok(RecommendationRecord {
                    user_id: row.try_get("user_id")?,
                    movie_id: row.try_get("movie_id")?,
                    score,
                    computed_at,
                })
            })
            .collect()
    }

    async fn has_recommendations(&self, user_id: UserId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_recommendations WHERE user_id = $1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn invalidate_recommendations(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_recommendations WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_limit_saturates() {
        assert_eq!(to_limit(20), 20);
        assert_eq!(to_limit(usize::MAX), i64::MAX);
    }
}
