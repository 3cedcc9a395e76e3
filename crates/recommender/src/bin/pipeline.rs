use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use moovies_core::{
    init_logging, load_dotenv, ConfigLoader, DatabaseConfig, DatabasePool, LogConfig,
};
use moovies_recommender::{
    BatchReport, CommandTrainer, ModelTrainer, PipelineReport, RecommenderConfig, SnapshotTrainer,
    TrainingPipeline,
};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "recommender-pipeline")]
#[command(about = "Offline training and batch recommendation for Moovies", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        help = "Database connection URL"
    )]
    database_url: Option<String>,

    #[command(flatten)]
    tuning: Tuning,
}

/// Overrides for `MOOVIES_*` tuning variables
#[derive(Args)]
struct Tuning {
    #[arg(long, global = true, help = "Nearest users consulted per recommendation")]
    neighbor_count: Option<usize>,

    #[arg(long, global = true, help = "Recommendations stored per user")]
    top_n: Option<usize>,

    #[arg(long, global = true, help = "Users recomputed concurrently")]
    concurrency: Option<usize>,

    #[arg(long, global = true, help = "Seed for negative sampling and the validation split")]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create the embedding and recommendation tables")]
    Migrate,

    #[command(about = "Write the training set snapshot for an external trainer")]
    ExportTrainingSet {
        #[arg(short, long, help = "Output path of the bincode snapshot")]
        output: PathBuf,
    },

    #[command(about = "Train, store embeddings and recompute all recommendations")]
    Run {
        #[arg(
            long,
            conflicts_with = "weights",
            required_unless_present = "weights",
            help = "Trainer program, called with --input <snapshot> --output <weights>"
        )]
        trainer_cmd: Option<String>,

        #[arg(long = "trainer-arg", help = "Extra argument passed to the trainer program")]
        trainer_args: Vec<String>,

        #[arg(long, default_value = "target/recommender", help = "Scratch directory for snapshots")]
        work_dir: PathBuf,

        #[arg(long, help = "Use an existing weight snapshot instead of training")]
        weights: Option<PathBuf>,
    },

    #[command(about = "Recompute recommendations from stored embeddings")]
    Recommend {
        #[arg(long, help = "Only recompute this user")]
        user_id: Option<i32>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    init_logging(&LogConfig::from_env()?).context("Failed to initialise logging")?;

    let config = recommender_config(&cli.tuning)?;

    let mut db_config = match (DatabaseConfig::from_env(), cli.database_url) {
        (Ok(config), None) => config,
        (Ok(config), Some(url)) => DatabaseConfig { url, ..config },
        (Err(_), Some(url)) => DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        },
        (Err(e), None) => return Err(e).context(
            "DATABASE_URL must be set either as environment variable or --database-url flag",
        ),
    };
    db_config.max_connections = db_config
        .max_connections
        .max(config.batch_concurrency as u32 + 1);
    db_config.validate()?;

    let db = DatabasePool::new(&db_config)
        .await
        .context("Failed to connect to database")?;

    let result = dispatch(cli.command, &db, config).await;
    db.close().await;
    result
}

fn recommender_config(tuning: &Tuning) -> Result<RecommenderConfig> {
    let mut config = RecommenderConfig::from_env()?;
    if let Some(n) = tuning.neighbor_count {
        config.neighbor_count = n;
    }
    if let Some(n) = tuning.top_n {
        config.top_n = n;
    }
    if let Some(n) = tuning.concurrency {
        config.batch_concurrency = n;
    }
    if let Some(seed) = tuning.seed {
        config.sampling_seed = seed;
    }
    config.validate()?;
    Ok(config)
}

async fn dispatch(command: Commands, db: &DatabasePool, config: RecommenderConfig) -> Result<()> {
    let pipeline = TrainingPipeline::new(db.pool().clone(), config);

    match command {
        Commands::Migrate => {
            sqlx::migrate!("./migrations")
                .run(db.pool())
                .await
                .context("Failed to apply migrations")?;
            info!("Migrations applied");
        }
        Commands::ExportTrainingSet { output } => {
            match pipeline.export_training_set(&output).await? {
                Some(stats) => info!(
                    positives = stats.positives,
                    negatives = stats.negatives,
                    "Training set written to {}",
                    output.display()
                ),
                None => info!("No interactions, nothing exported"),
            }
        }
        Commands::Run {
            trainer_cmd,
            trainer_args,
            work_dir,
            weights,
        } => {
            let trainer: Box<dyn ModelTrainer> = match (weights, trainer_cmd) {
                (Some(path), _) => Box::new(SnapshotTrainer::new(path)),
                (None, Some(program)) => {
                    Box::new(CommandTrainer::new(program, work_dir).with_args(trainer_args))
                }
                (None, None) => bail!("either --trainer-cmd or --weights is required"),
            };

            match pipeline.run(trainer.as_ref()).await? {
                PipelineReport::NoData => info!("No interactions, nothing to do"),
                PipelineReport::Completed { batch, .. } => check_batch(&batch)?,
            }
        }
        Commands::Recommend { user_id } => {
            let orchestrator = pipeline.orchestrator();
            let report = match user_id {
                Some(id) => orchestrator.run_for(vec![id]).await,
                None => orchestrator.run().await?,
            };
            check_batch(&report)?;
        }
    }

    Ok(())
}

fn check_batch(report: &BatchReport) -> Result<()> {
    if report.is_clean() {
        return Ok(());
    }
    for (user_id, error) in &report.failed {
        eprintln!("  user {}: {}", user_id, error);
    }
    bail!(
        "{} of {} users failed",
        report.failure_count(),
        report.total
    )
}
