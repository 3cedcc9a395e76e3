//! Embedding persistence
//!
//! Fuses each entity's GMF and MLP vectors into one normalised embedding and
//! upserts it into a pgvector column keyed by external ID. Each entity type is
//! written in a single transaction: a failure before commit leaves the
//! previous embeddings untouched.

use crate::error::{RecommenderError, Result};
use crate::mapping::IdMapper;
use crate::trainer::TrainedEmbeddings;
use crate::types::{EntityEmbedding, EntityKind, MovieId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moovies_core::math::{mean_vector, normalize_vector};
use ndarray::ArrayView1;
use pgvector::Vector;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Average two representation vectors and L2-normalise the result
///
/// A zero average is returned unnormalised.
pub fn fuse_embedding(gmf: ArrayView1<'_, f32>, mlp: ArrayView1<'_, f32>) -> Vec<f32> {
    let mut fused: Vec<f32> = gmf
        .iter()
        .zip(mlp.iter())
        .map(|(g, m)| (g + m) / 2.0)
        .collect();
    normalize_vector(&mut fused);
    fused
}

/// Fused `(external id, vector)` rows for every mapped index of one entity type
///
/// The padding row is never visited because the mapper has no inverse for it.
pub(crate) fn fused_rows(
    kind: EntityKind,
    embeddings: &TrainedEmbeddings,
    mapper: &IdMapper<i32>,
    dim: usize,
) -> Result<Vec<(i32, Vec<f32>)>> {
    let mut rows = Vec::with_capacity(mapper.len());

    for (index, id) in mapper.iter() {
        let pair = match kind {
            EntityKind::User => embeddings.user_vectors(index),
            EntityKind::Movie => embeddings.movie_vectors(index),
        };
        let (gmf, mlp) = pair.ok_or_else(|| RecommenderError::TableTooSmall {
            table: kind.table().to_string(),
            rows: embeddings.rows_for(kind),
            required: mapper.len() + 1,
        })?;

        let fused = fuse_embedding(gmf, mlp);
        if fused.len() != dim {
            return Err(RecommenderError::DimensionMismatch {
                table: kind.table().to_string(),
                expected: dim,
                actual: fused.len(),
            });
        }
        rows.push((*id, fused));
    }

    Ok(rows)
}

/// pgvector-backed store for user and movie embeddings
#[derive(Clone)]
pub struct EmbeddingStore {
    pool: PgPool,
    dim: usize,
}

impl EmbeddingStore {
    /// `dim` must match the width of the `vector` columns
    pub fn new(pool: PgPool, dim: usize) -> Self {
        Self { pool, dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Fuse and upsert every mapped user; returns the number of rows written
    pub async fn store_user_embeddings(
        &self,
        embeddings: &TrainedEmbeddings,
        users: &IdMapper<UserId>,
    ) -> Result<usize> {
        let rows = fused_rows(EntityKind::User, embeddings, users, self.dim)?;
        self.upsert_all(EntityKind::User, &rows).await
    }

    /// Fuse and upsert every mapped movie; returns the number of rows written
    pub async fn store_movie_embeddings(
        &self,
        embeddings: &TrainedEmbeddings,
        movies: &IdMapper<MovieId>,
    ) -> Result<usize> {
        let rows = fused_rows(EntityKind::Movie, embeddings, movies, self.dim)?;
        self.upsert_all(EntityKind::Movie, &rows).await
    }

    #[instrument(skip(self, rows), fields(kind = %kind, rows = rows.len()))]
    async fn upsert_all(&self, kind: EntityKind, rows: &[(i32, Vec<f32>)]) -> Result<usize> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        for (id, vector) in rows {
            upsert_one(&mut tx, kind, *id, vector).await?;
        }

        tx.commit().await?;

        info!(
            count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Stored {} embeddings",
            kind
        );
        Ok(rows.len())
    }

    pub async fn user_embedding(&self, user_id: UserId) -> Result<Option<EntityEmbedding>> {
        self.fetch(EntityKind::User, user_id).await
    }

    pub async fn movie_embedding(&self, movie_id: MovieId) -> Result<Option<EntityEmbedding>> {
        self.fetch(EntityKind::Movie, movie_id).await
    }

    async fn fetch(&self, kind: EntityKind, id: i32) -> Result<Option<EntityEmbedding>> {
        let sql = format!(
            "SELECT embedding, updated_at FROM {} WHERE {} = $1",
            kind.table(),
            kind.key_column()
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let embedding: Vector = row.try_get("embedding")?;
                let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
                Ok(Some(EntityEmbedding {
                    id,
                    vector: embedding.to_vec(),
                    updated_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Recompute one user's embedding from the movies they interacted with
    ///
    /// The new vector is the normalised mean of the stored movie embeddings.
    /// Returns `None` and writes nothing when none of the user's movies has an
    /// embedding.
    #[instrument(skip(self))]
    pub async fn fold_in_user(&self, user_id: UserId) -> Result<Option<Vec<f32>>> {
        let rows = sqlx::query(
            r#"
            SELECT me.embedding
            FROM user_movies um
            JOIN movie_embeddings me ON me.movie_id = um.movie_id
            WHERE um.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let vectors = rows
            .iter()
            .map(|row| row.try_get::<Vector, _>("embedding").map(|v| v.to_vec()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let Some(mut vector) = mean_vector(&vectors) else {
            debug!("No embedded movies for user, leaving embedding untouched");
            return Ok(None);
        };
        normalize_vector(&mut vector);

        let mut tx = self.pool.begin().await?;
        upsert_one(&mut tx, EntityKind::User, user_id, &vector).await?;
        tx.commit().await?;

        debug!(movies = vectors.len(), "Folded in user embedding");
        Ok(Some(vector))
    }
}

/// Rebuilds a single user's embedding from their current interactions
#[async_trait]
pub trait UserFoldIn: Send + Sync {
    async fn fold_in_user(&self, user_id: UserId) -> Result<Option<Vec<f32>>>;
}

#[async_trait]
impl UserFoldIn for EmbeddingStore {
    async fn fold_in_user(&self, user_id: UserId) -> Result<Option<Vec<f32>>> {
        EmbeddingStore::fold_in_user(self, user_id).await
    }
}

async fn upsert_one(
    tx: &mut Transaction<'_, Postgres>,
    kind: EntityKind,
    id: i32,
    vector: &[f32],
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {table} ({key}, embedding, updated_at) VALUES ($1, $2, NOW()) \
         ON CONFLICT ({key}) DO UPDATE SET embedding = EXCLUDED.embedding, updated_at = NOW()",
        table = kind.table(),
        key = kind.key_column()
    );

    sqlx::query(&sql)
        .bind(id)
        .bind(Vector::from(vector.to_vec()))
        .execute(&mut **tx)
        .await?;
    Ok(())
}
