//! HTTP surface of the recommender service

use crate::engine::{RecomputeOutcome, RecommendationEngine};
use crate::error::RecommenderError;
use crate::types::{RecommendationRecord, UserId};
use actix_web::{http::StatusCode, web, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

pub struct AppState {
    pub engine: Arc<RecommendationEngine>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Recommender(#[from] RecommenderError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Recommender(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Recommender(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        HttpResponse::build(status).json(serde_json::json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": self.to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct RecommendationsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub movie_id: i32,
    pub score: f64,
    pub computed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationsResponse {
    pub user_id: UserId,
    pub recommendations: Vec<RecommendationItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub user_id: UserId,
    pub status: String,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub user_id: UserId,
    pub removed: u64,
}

impl From<RecommendationRecord> for RecommendationItem {
    fn from(record: RecommendationRecord) -> Self {
        Self {
            movie_id: record.movie_id,
            score: record.score,
            computed_at: record.computed_at,
        }
    }
}

/// Register the health check and the `/api/v1` routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check)).service(
        web::scope("/api/v1")
            .route(
                "/users/{user_id}/recommendations",
                web::get().to(get_recommendations),
            )
            .route(
                "/users/{user_id}/recommendations",
                web::delete().to(invalidate_recommendations),
            )
            .route(
                "/users/{user_id}/recommendations/refresh",
                web::post().to(refresh_recommendations),
            ),
    );
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    match state.engine.repository().ping().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "service": "recommender-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "unhealthy",
            "service": "recommender-service",
            "database": e.to_string()
        })),
    }
}

fn resolve_limit(limit: Option<usize>) -> Result<usize, ApiError> {
    match limit {
        None => Ok(DEFAULT_LIMIT),
        Some(n) if (1..=MAX_LIMIT).contains(&n) => Ok(n),
        Some(n) => Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, n
        ))),
    }
}

async fn get_recommendations(
    state: web::Data<AppState>,
    path: web::Path<UserId>,
    query: web::Query<RecommendationsQuery>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    let limit = resolve_limit(query.limit)?;

    let records = state
        .engine
        .recommendations_for_user(user_id, limit)
        .await?;

    Ok(HttpResponse::Ok().json(RecommendationsResponse {
        user_id,
        recommendations: records.into_iter().map(Into::into).collect(),
    }))
}

async fn refresh_recommendations(
    state: web::Data<AppState>,
    path: web::Path<UserId>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    let outcome = state.engine.refresh_user(user_id).await?;

    let (status, count) = match outcome {
        RecomputeOutcome::NoEmbedding => ("no_embedding", 0),
        RecomputeOutcome::NoNeighbors => ("no_neighbors", 0),
        RecomputeOutcome::NoInteractions => ("no_interactions", 0),
        RecomputeOutcome::Stored { count } => ("stored", count),
    };

    Ok(HttpResponse::Ok().json(RefreshResponse {
        user_id,
        status: status.to_string(),
        count,
    }))
}

async fn invalidate_recommendations(
    state: web::Data<AppState>,
    path: web::Path<UserId>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    let removed = state.engine.invalidate(user_id).await?;
    Ok(HttpResponse::Ok().json(InvalidateResponse { user_id, removed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_limit() {
        assert_eq!(resolve_limit(None).unwrap(), DEFAULT_LIMIT);
        assert_eq!(resolve_limit(Some(5)).unwrap(), 5);
        assert!(resolve_limit(Some(0)).is_err());
        assert!(resolve_limit(Some(MAX_LIMIT + 1)).is_err());
    }

    #[test]
    fn test_transient_errors_map_to_unavailable() {
        let err = ApiError::from(RecommenderError::from(sqlx::Error::PoolTimedOut));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(RecommenderError::NoTrainableData);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
