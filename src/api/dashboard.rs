//! Dashboard read endpoints: rankings, per-model history, batch status.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ok, ApiError, ApiResult, AppState};
use crate::models::{ModelRecord, ScoreRow, Suite};
use crate::scoring::combined::{combined_score, period_aggregate, PeriodAggregate};
use crate::store::ScoreStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Latest,
    H24,
    D7,
    M1,
}

impl Period {
    fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        match raw.unwrap_or("latest") {
            "latest" => Ok(Period::Latest),
            "24h" => Ok(Period::H24),
            "7d" => Ok(Period::D7),
            "1m" => Ok(Period::M1),
            other => Err(ApiError::bad_request(format!("unknown period {other:?}"))),
        }
    }

    fn window(self) -> Option<Duration> {
        match self {
            Period::Latest => None,
            Period::H24 => Some(Duration::hours(24)),
            Period::D7 => Some(Duration::days(7)),
            Period::M1 => Some(Duration::days(30)),
        }
    }
}

const SORT_KEYS: &[&str] = &[
    "combined",
    "reasoning",
    "speed",
    "7axis",
    "tooling",
    "price",
    "trend",
    "stability",
    "change",
];

/// Operator-configured price table, USD per million output tokens. Matched
/// by substring; informational only, never validated against invoices.
const PRICING: &[(&str, f64)] = &[
    ("gpt-4o-mini", 0.6),
    ("gpt-4o", 10.0),
    ("claude-sonnet", 15.0),
    ("claude-3-5-haiku", 4.0),
    ("gemini-2.0-flash", 0.4),
    ("gemini-1.5-pro", 10.5),
    ("grok", 15.0),
    ("deepseek", 1.1),
    ("kimi", 2.4),
    ("glm", 2.0),
];

fn price_for(model_name: &str) -> Option<f64> {
    let lower = model_name.to_ascii_lowercase();
    PRICING
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, price)| *price)
}

#[derive(Debug, Deserialize)]
pub struct ScoresQuery {
    pub period: Option<String>,
    #[serde(rename = "sortBy")]
    pub sort_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RankedEntry {
    pub rank: usize,
    #[serde(rename = "modelId")]
    pub model_id: i64,
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub vendor: String,
    /// Combined suite score; absent means unavailable.
    pub combined: Option<f64>,
    pub hourly: Option<f64>,
    pub deep: Option<f64>,
    pub tooling: Option<f64>,
    pub period: Option<PeriodAggregate>,
    #[serde(rename = "confidenceLower")]
    pub confidence_lower: Option<f64>,
    #[serde(rename = "confidenceUpper")]
    pub confidence_upper: Option<f64>,
    /// Delta between the two newest hourly scores.
    pub change: Option<f64>,
    /// Efficiency axis of the latest hourly score, the `speed` sort key.
    pub speed: Option<f64>,
    pub price: Option<f64>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<DateTime<Utc>>,
}

fn build_entry(
    store: &ScoreStore,
    model: &ModelRecord,
    period: Period,
) -> anyhow::Result<RankedEntry> {
    let hourly = store.latest_valid_score(model.id, Suite::Hourly)?;
    let deep = store.latest_valid_score(model.id, Suite::Deep)?;
    let tooling = store.latest_valid_score(model.id, Suite::Tooling)?;

    let combined = combined_score(
        hourly.as_ref().map(|r| r.stupid_score),
        deep.as_ref().map(|r| r.stupid_score),
        tooling.as_ref().map(|r| r.stupid_score),
    );

    let period_agg = match period.window() {
        Some(window) => {
            let rows = store.valid_scores_since(model.id, Suite::Hourly, Utc::now() - window)?;
            let values: Vec<f64> = rows.iter().map(|r| r.stupid_score).collect();
            period_aggregate(&values)
        }
        None => None,
    };

    let recent = store.recent_valid_scores(model.id, Suite::Hourly, 2)?;
    let change = (recent.len() == 2).then(|| recent[0].stupid_score - recent[1].stupid_score);

    Ok(RankedEntry {
        rank: 0,
        model_id: model.id,
        name: model.name.clone(),
        display_name: model.display().to_string(),
        vendor: model.vendor.as_str().to_string(),
        combined,
        hourly: hourly.as_ref().map(|r| r.stupid_score),
        deep: deep.as_ref().map(|r| r.stupid_score),
        tooling: tooling.as_ref().map(|r| r.stupid_score),
        period: period_agg,
        confidence_lower: hourly.as_ref().and_then(|r| r.confidence_lower),
        confidence_upper: hourly.as_ref().and_then(|r| r.confidence_upper),
        change,
        speed: hourly.as_ref().map(|r| r.axes.efficiency),
        price: price_for(&model.name),
        last_updated: hourly.as_ref().map(|r| r.ts),
    })
}

fn sort_entries(entries: &mut [RankedEntry], sort_by: &str) {
    let value = |e: &RankedEntry| -> f64 {
        match sort_by {
            "combined" => e.combined.unwrap_or(f64::MIN),
            "reasoning" => e.deep.unwrap_or(f64::MIN),
            "tooling" => e.tooling.unwrap_or(f64::MIN),
            "7axis" => e.hourly.unwrap_or(f64::MIN),
            "speed" => e.speed.unwrap_or(f64::MIN),
            // Cheapest first: negate so the shared descending sort works.
            "price" => e.price.map(|p| -p).unwrap_or(f64::MIN),
            "trend" => e
                .period
                .map(|p| match p.trend {
                    crate::scoring::stats::Trend::Up => 1.0,
                    crate::scoring::stats::Trend::Stable => 0.0,
                    crate::scoring::stats::Trend::Down => -1.0,
                })
                .unwrap_or(f64::MIN),
            "stability" => e.period.map(|p| p.stability).unwrap_or(f64::MIN),
            "change" => e.change.map(f64::abs).unwrap_or(f64::MIN),
            _ => e.combined.unwrap_or(f64::MIN),
        }
    };
    entries.sort_by(|a, b| {
        value(b)
            .partial_cmp(&value(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
}

pub async fn scores(
    State(state): State<AppState>,
    Query(query): Query<ScoresQuery>,
) -> ApiResult<Vec<RankedEntry>> {
    let period = Period::parse(query.period.as_deref())?;
    let sort_by = query.sort_by.unwrap_or_else(|| "combined".to_string());
    if !SORT_KEYS.contains(&sort_by.as_str()) {
        return Err(ApiError::bad_request(format!("unknown sortBy {sort_by:?}")));
    }

    let mut entries = Vec::new();
    for model in state.store.ranked_models()? {
        entries.push(build_entry(&state.store, &model, period)?);
    }
    sort_entries(&mut entries, &sort_by);
    Ok(ok(entries))
}

#[derive(Debug, Serialize)]
pub struct HistoryPoint {
    pub ts: DateTime<Utc>,
    pub score: f64,
    #[serde(rename = "confidenceLower")]
    pub confidence_lower: Option<f64>,
    #[serde(rename = "confidenceUpper")]
    pub confidence_upper: Option<f64>,
    pub note: Option<String>,
}

fn history_points(rows: Vec<ScoreRow>) -> Vec<HistoryPoint> {
    rows.into_iter()
        .map(|r| HistoryPoint {
            ts: r.ts,
            score: r.stupid_score,
            confidence_lower: r.confidence_lower,
            confidence_upper: r.confidence_upper,
            note: r.note,
        })
        .collect()
}

fn fetch_history(
    store: &ScoreStore,
    model_id: i64,
    period: Period,
) -> anyhow::Result<Vec<HistoryPoint>> {
    let rows = match period.window() {
        Some(window) => store.valid_scores_since(model_id, Suite::Hourly, Utc::now() - window)?,
        None => store.recent_valid_scores(model_id, Suite::Hourly, 100)?,
    };
    Ok(history_points(rows))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub period: Option<String>,
}

pub async fn history(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<serde_json::Value> {
    let period = Period::parse(query.period.as_deref())?;
    let model = state
        .store
        .model(model_id)?
        .ok_or_else(|| ApiError::not_found(format!("unknown model {model_id}")))?;
    let points = fetch_history(&state.store, model.id, period)?;
    Ok(ok(json!({
        "modelId": model.id,
        "name": model.name,
        "displayName": model.display(),
        "history": points,
    })))
}

const BATCH_ID_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryBatchQuery {
    #[serde(rename = "modelIds")]
    pub model_ids: String,
    pub period: Option<String>,
}

pub async fn history_batch(
    State(state): State<AppState>,
    Query(query): Query<HistoryBatchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let period = Period::parse(query.period.as_deref())?;
    let ids: Vec<i64> = query
        .model_ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ApiError::bad_request(format!("bad model id {s:?}")))
        })
        .collect::<Result<_, _>>()?;
    if ids.is_empty() {
        return Err(ApiError::bad_request("modelIds is empty"));
    }
    if ids.len() > BATCH_ID_LIMIT {
        return Err(ApiError::bad_request(format!(
            "too many model ids ({} > {BATCH_ID_LIMIT})",
            ids.len()
        )));
    }

    // Fetch per-model series in parallel.
    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        let store = state.store.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            (id, fetch_history(&store, id, period))
        }));
    }
    let mut series: HashMap<i64, Vec<HistoryPoint>> = HashMap::new();
    for handle in handles {
        let (id, result) = handle
            .await
            .map_err(|e| ApiError::from(anyhow::anyhow!("history task: {e}")))?;
        series.insert(id, result?);
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=30, stale-while-revalidate=60"),
    );
    Ok((headers, ok(series)))
}

pub async fn status(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    Ok(ok(json!({
        "scheduler": state.scheduler.status(),
        "database": state.store.health()?,
    })))
}

pub async fn batch_status(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let latest = state.store.latest_batch_status(Suite::Hourly)?;
    Ok(ok(match latest {
        Some((ts, rows, sentinels)) => json!({
            "batchTimestamp": ts,
            "modelsScored": rows - sentinels,
            "sentinels": sentinels,
        }),
        None => json!({ "batchTimestamp": null, "modelsScored": 0, "sentinels": 0 }),
    }))
}

pub async fn best_model(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let mut entries = Vec::new();
    for model in state.store.ranked_models()? {
        entries.push(build_entry(&state.store, &model, Period::Latest)?);
    }
    sort_entries(&mut entries, "combined");
    match entries.into_iter().next().filter(|e| e.combined.is_some()) {
        Some(best) => Ok(ok(serde_json::to_value(best).unwrap_or_default())),
        None => Err(ApiError::not_found("no scored models yet")),
    }
}

pub async fn global_index(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let mut scores = Vec::new();
    for model in state.store.ranked_models()? {
        if let Some(row) = state.store.latest_valid_score(model.id, Suite::Hourly)? {
            scores.push(row.stupid_score);
        }
    }
    let index = if scores.is_empty() {
        None
    } else {
        Some(crate::scoring::stats::mean(&scores))
    };
    Ok(ok(json!({
        "globalIndex": index,
        "modelCount": scores.len(),
        "timestamp": Utc::now(),
    })))
}
