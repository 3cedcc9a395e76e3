//! Recommender Service - serves and refreshes per-user recommendations
//!
//! Port: 8083 (MOOVIES_SERVICE_PORT)

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use moovies_core::{
    init_logging, load_dotenv, ConfigLoader, DatabaseConfig, DatabasePool, LogConfig,
    ServiceConfig,
};
use moovies_recommender::api::{configure, AppState};
use moovies_recommender::{
    EmbeddingStore, PostgresRecommendationRepository, RecommendationEngine, RecommenderConfig,
};
use std::sync::Arc;
use tracing::info;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_logging(&LogConfig::from_env()?).context("Failed to initialise logging")?;

    let service_config = ServiceConfig::from_env()?;
    service_config.validate()?;
    let db_config = DatabaseConfig::from_env()?;
    db_config.validate()?;
    let config = RecommenderConfig::from_env()?;

    let db = DatabasePool::new(&db_config)
        .await
        .context("Failed to connect to database")?;

    let repository = PostgresRecommendationRepository::new(db.pool().clone());
    let store = EmbeddingStore::new(db.pool().clone(), config.embedding_dim);
    let engine = RecommendationEngine::new(Arc::new(repository), config.engine())
        .with_fold_in(Arc::new(store));

    let state = web::Data::new(AppState {
        engine: Arc::new(engine),
    });

    info!(
        host = %service_config.host,
        port = service_config.port,
        workers = service_config.workers,
        "Starting Recommender Service"
    );

    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .workers(service_config.workers)
        .bind((service_config.host.as_str(), service_config.port))?
        .run()
        .await?;

    db.close().await;
    Ok(())
}
