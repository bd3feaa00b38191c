//! Drift read endpoints: signatures, change points, and cache plumbing.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::{ok, ok_cached, ApiError, ApiResult, AppState};
use crate::drift::{self, signature::AlertStatus, CacheStatus};
use crate::models::ChangePointRow;

/// Read-through signature lookup; returns the cache disposition for the
/// `X-Cache` header.
fn signature_for(
    state: &AppState,
    model_id: i64,
) -> Result<(Option<drift::signature::DriftSignature>, CacheStatus), ApiError> {
    if let Some(cached) = state.drift_cache.get(model_id) {
        return Ok((Some(cached), CacheStatus::Hit));
    }
    let computed = drift::signature::compute(&state.store, model_id, Utc::now())?;
    if let Some(sig) = &computed {
        state.drift_cache.put(model_id, sig.clone());
        state
            .store
            .save_drift_signature(model_id, &serde_json::to_value(sig).unwrap_or_default())?;
    }
    Ok((computed, CacheStatus::Miss))
}

pub async fn signature(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let model = state
        .store
        .model(model_id)?
        .ok_or_else(|| ApiError::not_found(format!("unknown model {model_id}")))?;

    let (sig, cache_status) = signature_for(&state, model.id)?;
    let mut headers = HeaderMap::new();
    headers.insert("X-Cache", HeaderValue::from_static(cache_status.as_str()));

    let body = match sig {
        Some(sig) => ok_cached(
            json!({"available": true, "signature": sig}),
            cache_status == CacheStatus::Hit,
        ),
        None => ok_cached(
            json!({"available": false, "reason": "insufficient data"}),
            false,
        ),
    };
    Ok((headers, body))
}

#[derive(Debug, Deserialize)]
pub struct ChangePointsQuery {
    pub limit: Option<usize>,
}

pub async fn change_points(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
    Query(query): Query<ChangePointsQuery>,
) -> ApiResult<Vec<ChangePointRow>> {
    let limit = query.limit.unwrap_or(20).min(200);
    state
        .store
        .model(model_id)?
        .ok_or_else(|| ApiError::not_found(format!("unknown model {model_id}")))?;
    Ok(ok(state.store.change_points(model_id, limit)?))
}

pub async fn status(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let mut alerts = 0usize;
    let mut warnings = 0usize;
    let mut normal = 0usize;
    let mut uncached = 0usize;
    for model in state.store.ranked_models()? {
        match state.drift_cache.get(model.id) {
            Some(sig) => match sig.alert {
                AlertStatus::Alert => alerts += 1,
                AlertStatus::Warning => warnings += 1,
                AlertStatus::Normal => normal += 1,
            },
            None => uncached += 1,
        }
    }
    let recent = state.store.recent_change_points(10)?;
    Ok(ok(json!({
        "alerts": alerts,
        "warnings": warnings,
        "normal": normal,
        "uncached": uncached,
        "recentChangePoints": recent,
    })))
}

pub async fn batch(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let mut signatures = HashMap::new();
    let mut any_miss = false;
    for model in state.store.ranked_models()? {
        let (sig, cache_status) = signature_for(&state, model.id)?;
        if cache_status == CacheStatus::Miss {
            any_miss = true;
        }
        signatures.insert(model.id.to_string(), sig);
    }
    Ok(ok_cached(
        serde_json::to_value(signatures).unwrap_or_default(),
        !any_miss,
    ))
}

pub async fn health(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let (entries, fresh) = state.drift_cache.stats();
    Ok(ok(json!({
        "database": state.store.health()?,
        "cache": {"entries": entries, "fresh": fresh},
    })))
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let db = state.store.health()?;
    let (entries, fresh) = state.drift_cache.stats();
    Ok(ok(json!({
        "modelsMonitored": db.models,
        "changePointsTotal": db.change_points,
        "signaturesCached": entries,
        "signaturesFresh": fresh,
    })))
}

/// Internal warmer invoked by the scheduler's HTTP twin.
pub async fn precompute(State(state): State<AppState>) -> ApiResult<drift::PrecomputeSummary> {
    let store = state.store.clone();
    let cache = state.drift_cache.clone();
    let summary = tokio::task::spawn_blocking(move || {
        drift::precompute_all(&store, &cache, Utc::now())
    })
    .await
    .map_err(|e| ApiError::from(anyhow::anyhow!("precompute task: {e}")))??;
    Ok(ok(summary))
}
