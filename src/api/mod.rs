//! Read-side HTTP API: thin wrappers over the store and the drift cache.
//!
//! Every endpoint answers the `{success, data, error?, cached?}` envelope.
//! Internal failures map to 4xx/5xx with a short message; stack traces
//! never leave the process.

pub mod dashboard;
pub mod drift_api;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::drift::DriftCache;
use crate::scheduler::Scheduler;
use crate::store::ScoreStore;

#[derive(Clone)]
pub struct AppState {
    pub store: ScoreStore,
    pub drift_cache: Arc<DriftCache>,
    pub scheduler: Arc<Scheduler>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
        cached: None,
    })
}

pub fn ok_cached<T: Serialize>(data: T, cached: bool) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
        cached: Some(cached),
    })
}

/// API-level failure carrying the client-facing status and message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("store failure: {err:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal store failure".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(Envelope::<()> {
            success: false,
            data: None,
            error: Some(self.message),
            cached: None,
        });
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

async fn health(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let db = state.store.health()?;
    let (cache_total, cache_fresh) = state.drift_cache.stats();
    Ok(ok(json!({
        "status": "ok",
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "database": db,
        "drift_cache": {"entries": cache_total, "fresh": cache_fresh},
        "scheduler": state.scheduler.status(),
    })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dashboard/scores", get(dashboard::scores))
        .route("/dashboard/history/batch", get(dashboard::history_batch))
        .route("/dashboard/history/:model_id", get(dashboard::history))
        .route("/dashboard/status", get(dashboard::status))
        .route("/dashboard/batch-status", get(dashboard::batch_status))
        .route("/dashboard/best-model", get(dashboard::best_model))
        .route("/dashboard/global-index", get(dashboard::global_index))
        .route("/drift/signature/:model_id", get(drift_api::signature))
        .route("/drift/change-points/:model_id", get(drift_api::change_points))
        .route("/drift/status", get(drift_api::status))
        .route("/drift/batch", get(drift_api::batch))
        .route("/drift/health", get(drift_api::health))
        .route("/drift/metrics", get(drift_api::metrics))
        .route("/drift/precompute", post(drift_api::precompute))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
