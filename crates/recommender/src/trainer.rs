//! Model trainer contract and weight exchange
//!
//! The trainer is an opaque collaborator: it receives labeled index tensors
//! and returns, per entity, two embedding tables (GMF and MLP spaces) indexed
//! by dense index. Weights cross the process boundary as bincode snapshots
//! holding each table's shape and flat row-major data.

use crate::error::{RecommenderError, Result};
use crate::training::TrainingSet;
use crate::types::EntityKind;
use async_trait::async_trait;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Everything a trainer needs to fit the model
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerInput {
    pub train: TrainingSet,
    pub validation: TrainingSet,
    pub num_users: usize,
    pub num_movies: usize,
    pub num_genres: usize,
    pub embedding_dim: usize,
}

/// Four embedding tables, row `i` belongs to dense index `i`
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedEmbeddings {
    pub user_gmf: Array2<f32>,
    pub user_mlp: Array2<f32>,
    pub movie_gmf: Array2<f32>,
    pub movie_mlp: Array2<f32>,
}

impl TrainedEmbeddings {
    /// Check row counts cover every dense index and all widths agree
    pub fn validate(&self, num_users: usize, num_movies: usize) -> Result<()> {
        let width = self.user_gmf.ncols();
        if width == 0 {
            return Err(RecommenderError::InvalidSnapshot(
                "embedding tables have zero width".to_string(),
            ));
        }

        let tables = [
            ("user_gmf", &self.user_gmf, num_users + 1),
            ("user_mlp", &self.user_mlp, num_users + 1),
            ("movie_gmf", &self.movie_gmf, num_movies + 1),
            ("movie_mlp", &self.movie_mlp, num_movies + 1),
        ];

        for (name, table, required) in tables {
            if table.ncols() != width {
                return Err(RecommenderError::DimensionMismatch {
                    table: name.to_string(),
                    expected: width,
                    actual: table.ncols(),
                });
            }
            if table.nrows() < required {
                return Err(RecommenderError::TableTooSmall {
                    table: name.to_string(),
                    rows: table.nrows(),
                    required,
                });
            }
        }

        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.user_gmf.ncols()
    }

    /// Rows available in both tables of one entity type
    pub fn rows_for(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::User => self.user_gmf.nrows().min(self.user_mlp.nrows()),
            EntityKind::Movie => self.movie_gmf.nrows().min(self.movie_mlp.nrows()),
        }
    }

    pub fn user_vectors(&self, index: usize) -> Option<(ArrayView1<'_, f32>, ArrayView1<'_, f32>)> {
        row_pair(&self.user_gmf, &self.user_mlp, index)
    }

    pub fn movie_vectors(&self, index: usize) -> Option<(ArrayView1<'_, f32>, ArrayView1<'_, f32>)> {
        row_pair(&self.movie_gmf, &self.movie_mlp, index)
    }
}

fn row_pair<'a>(
    gmf: &'a Array2<f32>,
    mlp: &'a Array2<f32>,
    index: usize,
) -> Option<(ArrayView1<'a, f32>, ArrayView1<'a, f32>)> {
    if index < gmf.nrows() && index < mlp.nrows() {
        Some((gmf.row(index), mlp.row(index)))
    } else {
        None
    }
}

/// Shape plus flat row-major data for one matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializableMatrix<T> {
    shape: (usize, usize),
    data: Vec<T>,
}

impl<T: Clone> SerializableMatrix<T> {
    fn from_array(array: &Array2<T>) -> Self {
        Self {
            shape: (array.nrows(), array.ncols()),
            data: array.iter().cloned().collect(),
        }
    }

    fn into_array(self, name: &str) -> Result<Array2<T>> {
        Array2::from_shape_vec(self.shape, self.data).map_err(|e| {
            RecommenderError::InvalidSnapshot(format!("cannot reconstruct {}: {}", name, e))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializableTrainingSet {
    users: Vec<i32>,
    movies: Vec<i32>,
    genres: SerializableMatrix<i32>,
    labels: Vec<f32>,
    num_genres: usize,
}

impl SerializableTrainingSet {
    fn from_set(set: &TrainingSet) -> Self {
        Self {
            users: set.users.clone(),
            movies: set.movies.clone(),
            genres: SerializableMatrix::from_array(&set.genres),
            labels: set.labels.clone(),
            num_genres: set.num_genres,
        }
    }

    fn into_set(self) -> Result<TrainingSet> {
        Ok(TrainingSet {
            users: self.users,
            movies: self.movies,
            genres: self.genres.into_array("genres")?,
            labels: self.labels,
            num_genres: self.num_genres,
        })
    }
}

/// On-disk format of a [`TrainerInput`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainingSnapshot {
    train: SerializableTrainingSet,
    validation: SerializableTrainingSet,
    num_users: usize,
    num_movies: usize,
    num_genres: usize,
    embedding_dim: usize,
}

impl TrainerInput {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let snapshot = TrainingSnapshot {
            train: SerializableTrainingSet::from_set(&self.train),
            validation: SerializableTrainingSet::from_set(&self.validation),
            num_users: self.num_users,
            num_movies: self.num_movies,
            num_genres: self.num_genres,
            embedding_dim: self.embedding_dim,
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: TrainingSnapshot = bincode::deserialize(bytes)?;
        Ok(Self {
            train: snapshot.train.into_set()?,
            validation: snapshot.validation.into_set()?,
            num_users: snapshot.num_users,
            num_movies: snapshot.num_movies,
            num_genres: snapshot.num_genres,
            embedding_dim: snapshot.embedding_dim,
        })
    }

    pub async fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        tokio::fs::write(path, &bytes).await?;
        debug!(path = %path.display(), size_bytes = bytes.len(), "Wrote training snapshot");
        Ok(())
    }

    pub async fn read_from(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_bytes(&bytes)
    }
}

/// On-disk format of [`TrainedEmbeddings`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightSnapshot {
    user_gmf: SerializableMatrix<f32>,
    user_mlp: SerializableMatrix<f32>,
    movie_gmf: SerializableMatrix<f32>,
    movie_mlp: SerializableMatrix<f32>,
}

impl WeightSnapshot {
    pub fn from_embeddings(embeddings: &TrainedEmbeddings) -> Self {
        Self {
            user_gmf: SerializableMatrix::from_array(&embeddings.user_gmf),
            user_mlp: SerializableMatrix::from_array(&embeddings.user_mlp),
            movie_gmf: SerializableMatrix::from_array(&embeddings.movie_gmf),
            movie_mlp: SerializableMatrix::from_array(&embeddings.movie_mlp),
        }
    }

    pub fn into_embeddings(self) -> Result<TrainedEmbeddings> {
        Ok(TrainedEmbeddings {
            user_gmf: self.user_gmf.into_array("user_gmf")?,
            user_mlp: self.user_mlp.into_array("user_mlp")?,
            movie_gmf: self.movie_gmf.into_array("movie_gmf")?,
            movie_mlp: self.movie_mlp.into_array("movie_mlp")?,
        })
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        tokio::fs::write(path, &bytes).await?;
        debug!(path = %path.display(), size_bytes = bytes.len(), "Saved weight snapshot");
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

/// Fits the model and hands back the embedding tables
#[async_trait]
pub trait ModelTrainer: Send + Sync {
    async fn train(&self, input: &TrainerInput) -> Result<TrainedEmbeddings>;
}

/// Runs an external training program
///
/// The program is invoked as `<program> <args..> --input <snapshot> --output
/// <weights>` and must write a [`WeightSnapshot`] to the output path.
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
}

impl CommandTrainer {
    pub fn new(program: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn input_path(&self) -> PathBuf {
        self.work_dir.join("training_set.bin")
    }

    pub fn output_path(&self) -> PathBuf {
        self.work_dir.join("weights.bin")
    }
}

#[async_trait]
impl ModelTrainer for CommandTrainer {
    #[instrument(skip(self, input), fields(program = %self.program))]
    async fn train(&self, input: &TrainerInput) -> Result<TrainedEmbeddings> {
        let start = Instant::now();
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let input_path = self.input_path();
        let output_path = self.output_path();
        input.write_to(&input_path).await?;

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .status()
            .await
            .map_err(|e| {
                RecommenderError::Trainer(format!("failed to launch {}: {}", self.program, e))
            })?;

        if !status.success() {
            return Err(RecommenderError::Trainer(format!(
                "{} exited with {}",
                self.program, status
            )));
        }

        let embeddings = WeightSnapshot::load(&output_path).await?.into_embeddings()?;
        embeddings.validate(input.num_users, input.num_movies)?;

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            dim = embeddings.dim(),
            "External trainer finished"
        );

        Ok(embeddings)
    }
}

/// Serves embeddings from a previously written weight snapshot
#[derive(Debug, Clone)]
pub struct SnapshotTrainer {
    path: PathBuf,
}

impl SnapshotTrainer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ModelTrainer for SnapshotTrainer {
    async fn train(&self, input: &TrainerInput) -> Result<TrainedEmbeddings> {
        let embeddings = WeightSnapshot::load(&self.path).await?.into_embeddings()?;
        embeddings.validate(input.num_users, input.num_movies)?;
        info!(path = %self.path.display(), dim = embeddings.dim(), "Loaded weight snapshot");
        Ok(embeddings)
    }
}
