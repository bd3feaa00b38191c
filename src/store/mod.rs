//! SQLite-backed score store.
//!
//! Single writer behind a mutex, WAL for concurrent dashboard reads. The
//! score log is append-only: the newest row per `(model, suite)` is the
//! current value, ties broken by insertion order. Synthetic rows are
//! first-class rows that every baseline/aggregate read excludes.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde_json::Value;
use tracing::{info, warn};

use crate::catalogue;
use crate::models::{
    AxisVector, ChangePointRow, ChangeType, ModelRecord, NewScore, ScoreRow, Suite, Vendor,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS models (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    vendor TEXT NOT NULL,
    version TEXT,
    notes TEXT,
    created_at TEXT NOT NULL,
    display_name TEXT,
    show_in_rankings INTEGER NOT NULL DEFAULT 1,
    supports_tool_calling INTEGER NOT NULL DEFAULT 0,
    max_tools_per_call INTEGER,
    tool_call_reliability REAL,
    uses_reasoning_effort INTEGER NOT NULL DEFAULT 0,
    UNIQUE(name, vendor)
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    lang TEXT NOT NULL DEFAULT 'python',
    type TEXT NOT NULL,
    difficulty TEXT NOT NULL,
    schema_uri TEXT,
    hidden INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_id INTEGER NOT NULL REFERENCES models(id),
    task_id INTEGER REFERENCES tasks(id),
    ts TEXT NOT NULL,
    temp REAL NOT NULL,
    seed INTEGER NOT NULL,
    tokens_in INTEGER NOT NULL,
    tokens_out INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL,
    attempts INTEGER NOT NULL,
    passed INTEGER NOT NULL,
    artifacts TEXT,
    api_version TEXT,
    response_headers TEXT,
    model_fingerprint TEXT
);
CREATE INDEX IF NOT EXISTS idx_runs_model_ts ON runs(model_id, ts DESC);

CREATE TABLE IF NOT EXISTS metrics (
    run_id INTEGER PRIMARY KEY REFERENCES runs(id),
    correctness REAL,
    spec REAL,
    code_quality REAL,
    efficiency REAL,
    stability REAL,
    refusal REAL,
    recovery REAL
);

CREATE TABLE IF NOT EXISTS scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_id INTEGER NOT NULL REFERENCES models(id),
    ts TEXT NOT NULL,
    stupid_score REAL NOT NULL,
    axes TEXT NOT NULL,
    cusum REAL NOT NULL DEFAULT 0,
    note TEXT,
    suite TEXT NOT NULL DEFAULT 'hourly',
    confidence_lower REAL,
    confidence_upper REAL,
    standard_error REAL,
    sample_size INTEGER,
    model_variance REAL,
    synthetic INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_scores_model_suite ON scores(model_id, suite, ts DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_scores_ts ON scores(ts DESC);

CREATE TABLE IF NOT EXISTS change_points (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_id INTEGER NOT NULL REFERENCES models(id),
    detected_at TEXT NOT NULL,
    from_score REAL NOT NULL,
    to_score REAL NOT NULL,
    delta REAL NOT NULL,
    significance REAL NOT NULL,
    change_type TEXT NOT NULL,
    affected_axes TEXT NOT NULL,
    suspected_cause TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_change_points_model ON change_points(model_id, detected_at DESC);

CREATE TABLE IF NOT EXISTS model_drift_signatures (
    model_id INTEGER PRIMARY KEY REFERENCES models(id),
    computed_at TEXT NOT NULL,
    signature TEXT NOT NULL
);

-- Written by the tool-calling and incident subsystems; carried here for
-- contract compatibility.
CREATE TABLE IF NOT EXISTS failure_classifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_id INTEGER,
    ts TEXT,
    category TEXT,
    details TEXT
);

CREATE TABLE IF NOT EXISTS incidents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_id INTEGER,
    opened_at TEXT,
    kind TEXT,
    summary TEXT,
    resolved INTEGER NOT NULL DEFAULT 0
);
"#;

/// Default roster seeded on an empty database. Operators adjust rows (and
/// the `show_in_rankings` flag) directly afterwards.
const DEFAULT_MODELS: &[(&str, Vendor, &str)] = &[
    ("gpt-4o", Vendor::OpenAI, "GPT-4o"),
    ("gpt-4o-mini", Vendor::OpenAI, "GPT-4o mini"),
    ("claude-sonnet-4-20250514", Vendor::Anthropic, "Claude Sonnet 4"),
    ("claude-3-5-haiku-20241022", Vendor::Anthropic, "Claude 3.5 Haiku"),
    ("gemini-2.0-flash", Vendor::Google, "Gemini 2.0 Flash"),
    ("gemini-1.5-pro", Vendor::Google, "Gemini 1.5 Pro"),
    ("grok-3", Vendor::XAI, "Grok 3"),
    ("deepseek-chat", Vendor::DeepSeek, "DeepSeek Chat"),
    ("kimi-k2-0711-preview", Vendor::Kimi, "Kimi K2"),
    ("glm-4-plus", Vendor::GLM, "GLM-4 Plus"),
];

/// Per-task fields of a run row at insertion time.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub model_id: i64,
    pub task_slug: String,
    pub ts: DateTime<Utc>,
    pub temp: f64,
    pub seed: i64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub latency_ms: i64,
    pub attempts: i64,
    pub passed: bool,
    pub artifacts: Option<Value>,
    /// Axes recorded into the historic `metrics` columns.
    pub axes: AxisVector,
}

#[derive(Debug, Clone)]
pub struct NewChangePoint {
    pub model_id: i64,
    pub detected_at: DateTime<Utc>,
    pub from_score: f64,
    pub to_score: f64,
    pub significance: f64,
    pub change_type: ChangeType,
    pub affected_axes: Vec<String>,
    pub suspected_cause: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DbHealth {
    pub models: i64,
    pub scores: i64,
    pub runs: i64,
    pub change_points: i64,
}

#[derive(Clone)]
pub struct ScoreStore {
    conn: Arc<Mutex<Connection>>,
}

impl ScoreStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .with_context(|| format!("open database {:?}", path.as_ref()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("open in-memory database")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(SCHEMA_SQL).context("apply schema")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.seed_tasks()?;
        store.seed_default_models()?;
        Ok(store)
    }

    fn seed_tasks(&self) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO tasks (slug, lang, type, difficulty) VALUES (?1, 'python', ?2, ?3)",
        )?;
        for task in catalogue::catalogue() {
            stmt.execute(params![
                task.slug,
                task.kind.as_str(),
                task.difficulty.as_str()
            ])?;
        }
        Ok(())
    }

    fn seed_default_models(&self) -> Result<()> {
        let conn = self.conn.lock();
        let existing: i64 = conn.query_row("SELECT COUNT(*) FROM models", [], |r| r.get(0))?;
        if existing > 0 {
            return Ok(());
        }
        info!("seeding default model roster ({} models)", DEFAULT_MODELS.len());
        let mut stmt = conn.prepare(
            "INSERT INTO models (name, vendor, created_at, display_name, show_in_rankings)
             VALUES (?1, ?2, ?3, ?4, 1)",
        )?;
        let now = Utc::now().to_rfc3339();
        for (name, vendor, display) in DEFAULT_MODELS {
            stmt.execute(params![name, vendor.as_str(), now, display])?;
        }
        Ok(())
    }

    // ---- models ---------------------------------------------------------

    pub fn ranked_models(&self) -> Result<Vec<ModelRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, vendor, version, display_name, show_in_rankings,
                    supports_tool_calling, uses_reasoning_effort, created_at
             FROM models WHERE show_in_rankings = 1 ORDER BY vendor, name",
        )?;
        let rows = stmt.query_map([], row_to_model)?;
        collect_models(rows)
    }

    pub fn all_models(&self) -> Result<Vec<ModelRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, vendor, version, display_name, show_in_rankings,
                    supports_tool_calling, uses_reasoning_effort, created_at
             FROM models ORDER BY vendor, name",
        )?;
        let rows = stmt.query_map([], row_to_model)?;
        collect_models(rows)
    }

    pub fn model(&self, id: i64) -> Result<Option<ModelRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, vendor, version, display_name, show_in_rankings,
                    supports_tool_calling, uses_reasoning_effort, created_at
             FROM models WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_model)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn upsert_model(&self, name: &str, vendor: Vendor, display_name: Option<&str>) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO models (name, vendor, created_at, display_name)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name, vendor) DO UPDATE SET display_name = COALESCE(?4, display_name)",
            params![name, vendor.as_str(), Utc::now().to_rfc3339(), display_name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM models WHERE name = ?1 AND vendor = ?2",
            params![name, vendor.as_str()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    /// The only post-insert mutation any entity allows: the operator-set
    /// rankings whitelist flag.
    pub fn set_show_in_rankings(&self, model_id: i64, show: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE models SET show_in_rankings = ?2 WHERE id = ?1",
            params![model_id, show as i64],
        )?;
        Ok(())
    }

    // ---- scores ---------------------------------------------------------

    pub fn insert_score(&self, score: &NewScore) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO scores (model_id, ts, stupid_score, axes, cusum, note, suite,
                                 confidence_lower, confidence_upper, standard_error,
                                 sample_size, model_variance, synthetic)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                score.model_id,
                score.ts.to_rfc3339(),
                score.stupid_score,
                score.axes.to_json().to_string(),
                score.cusum,
                score.note,
                score.suite.as_str(),
                score.confidence_lower,
                score.confidence_upper,
                score.standard_error,
                score.sample_size,
                score.model_variance,
                score.synthetic as i64,
            ],
        )
        .context("insert score row")?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent real (non-sentinel, non-synthetic) score.
    pub fn latest_valid_score(&self, model_id: i64, suite: Suite) -> Result<Option<ScoreRow>> {
        Ok(self.recent_valid_scores(model_id, suite, 1)?.into_iter().next())
    }

    /// Most recent row of any kind, sentinels included.
    pub fn latest_row(&self, model_id: i64, suite: Suite) -> Result<Option<ScoreRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCORE_COLUMNS} FROM scores
             WHERE model_id = ?1 AND suite = ?2
             ORDER BY ts DESC, id DESC LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![model_id, suite.as_str()], row_to_score)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn has_any_row(&self, model_id: i64, suite: Suite) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scores WHERE model_id = ?1 AND suite = ?2",
            params![model_id, suite.as_str()],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Newest-first window of real scores.
    pub fn recent_valid_scores(
        &self,
        model_id: i64,
        suite: Suite,
        limit: usize,
    ) -> Result<Vec<ScoreRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCORE_COLUMNS} FROM scores
             WHERE model_id = ?1 AND suite = ?2 AND synthetic = 0
               AND stupid_score >= 0
             ORDER BY ts DESC, id DESC LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![model_id, suite.as_str(), limit as i64], row_to_score)?;
        collect_scores(rows)
    }

    /// Newest-first real scores since `since`.
    pub fn valid_scores_since(
        &self,
        model_id: i64,
        suite: Suite,
        since: DateTime<Utc>,
    ) -> Result<Vec<ScoreRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCORE_COLUMNS} FROM scores
             WHERE model_id = ?1 AND suite = ?2 AND synthetic = 0
               AND stupid_score >= 0 AND ts >= ?3
             ORDER BY ts DESC, id DESC"
        ))?;
        let rows = stmt.query_map(
            params![model_id, suite.as_str(), since.to_rfc3339()],
            row_to_score,
        )?;
        collect_scores(rows)
    }

    pub fn count_valid_scores(&self, model_id: i64, suite: Suite) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scores
             WHERE model_id = ?1 AND suite = ?2 AND synthetic = 0 AND stupid_score >= 0",
            params![model_id, suite.as_str()],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Timestamp of the newest batch for a suite, with how many rows it
    /// produced and how many of those are sentinels.
    pub fn latest_batch_status(&self, suite: Suite) -> Result<Option<(DateTime<Utc>, i64, i64)>> {
        let conn = self.conn.lock();
        let ts: Option<String> = conn
            .query_row(
                "SELECT ts FROM scores WHERE suite = ?1 ORDER BY ts DESC LIMIT 1",
                params![suite.as_str()],
                |r| r.get(0),
            )
            .ok();
        let Some(ts_raw) = ts else {
            return Ok(None);
        };
        let (rows, sentinels): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), SUM(CASE WHEN stupid_score < 0 THEN 1 ELSE 0 END)
             FROM scores WHERE suite = ?1 AND ts = ?2",
            params![suite.as_str(), ts_raw],
            |r| Ok((r.get(0)?, r.get::<_, Option<i64>>(1)?.unwrap_or(0))),
        )?;
        Ok(Some((parse_ts(ts_raw), rows, sentinels)))
    }

    // ---- runs -----------------------------------------------------------

    pub fn insert_run(&self, run: &NewRun) -> Result<i64> {
        let conn = self.conn.lock();
        let task_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM tasks WHERE slug = ?1",
                params![run.task_slug],
                |r| r.get(0),
            )
            .ok();
        conn.execute(
            "INSERT INTO runs (model_id, task_id, ts, temp, seed, tokens_in, tokens_out,
                               latency_ms, attempts, passed, artifacts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run.model_id,
                task_id,
                run.ts.to_rfc3339(),
                run.temp,
                run.seed,
                run.tokens_in,
                run.tokens_out,
                run.latency_ms,
                run.attempts,
                run.passed as i64,
                run.artifacts.as_ref().map(|v| v.to_string()),
            ],
        )
        .context("insert run row")?;
        let run_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO metrics (run_id, correctness, spec, code_quality, efficiency,
                                  stability, refusal, recovery)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                run.axes.correctness,
                run.axes.complexity,
                run.axes.code_quality,
                run.axes.efficiency,
                run.axes.stability,
                run.axes.edge_cases,
                run.axes.debugging,
            ],
        )
        .context("insert metrics row")?;
        Ok(run_id)
    }

    // ---- change points --------------------------------------------------

    /// True when a change point already exists for this model within the
    /// one-hour collision window around `ts`.
    pub fn change_point_exists_near(&self, model_id: i64, ts: DateTime<Utc>) -> Result<bool> {
        let window = Duration::hours(1);
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM change_points
             WHERE model_id = ?1 AND detected_at >= ?2 AND detected_at <= ?3",
            params![
                model_id,
                (ts - window).to_rfc3339(),
                (ts + window).to_rfc3339()
            ],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_change_point(&self, cp: &NewChangePoint) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO change_points (model_id, detected_at, from_score, to_score, delta,
                                        significance, change_type, affected_axes, suspected_cause)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                cp.model_id,
                cp.detected_at.to_rfc3339(),
                cp.from_score,
                cp.to_score,
                cp.to_score - cp.from_score,
                cp.significance,
                cp.change_type.as_str(),
                serde_json::to_string(&cp.affected_axes)?,
                cp.suspected_cause,
            ],
        )
        .context("insert change point")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn change_points(&self, model_id: i64, limit: usize) -> Result<Vec<ChangePointRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, model_id, detected_at, from_score, to_score, delta, significance,
                    change_type, affected_axes, suspected_cause
             FROM change_points WHERE model_id = ?1
             ORDER BY detected_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![model_id, limit as i64], row_to_change_point)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn recent_change_points(&self, limit: usize) -> Result<Vec<ChangePointRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, model_id, detected_at, from_score, to_score, delta, significance,
                    change_type, affected_axes, suspected_cause
             FROM change_points ORDER BY detected_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_change_point)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ---- drift signatures ----------------------------------------------

    pub fn save_drift_signature(&self, model_id: i64, signature: &Value) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO model_drift_signatures (model_id, computed_at, signature)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(model_id) DO UPDATE SET computed_at = ?2, signature = ?3",
            params![model_id, Utc::now().to_rfc3339(), signature.to_string()],
        )?;
        Ok(())
    }

    // ---- health ---------------------------------------------------------

    pub fn health(&self) -> Result<DbHealth> {
        let conn = self.conn.lock();
        let count = |table: &str| -> Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .context("count")
        };
        Ok(DbHealth {
            models: count("models")?,
            scores: count("scores")?,
            runs: count("runs")?,
            change_points: count("change_points")?,
        })
    }
}

const SCORE_COLUMNS: &str = "id, model_id, ts, stupid_score, axes, cusum, note, suite,
    confidence_lower, confidence_upper, standard_error, sample_size, model_variance, synthetic";

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("unparseable timestamp {raw:?}: {e}");
            Utc::now()
        })
}

fn row_to_model(row: &Row<'_>) -> rusqlite::Result<ModelRecord> {
    let vendor_raw: String = row.get(2)?;
    Ok(ModelRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        vendor: Vendor::parse(&vendor_raw).unwrap_or(Vendor::OpenAI),
        version: row.get(3)?,
        display_name: row.get(4)?,
        show_in_rankings: row.get::<_, i64>(5)? != 0,
        supports_tool_calling: row.get::<_, i64>(6)? != 0,
        uses_reasoning_effort: row.get::<_, i64>(7)? != 0,
        created_at: parse_ts(row.get(8)?),
    })
}

fn row_to_score(row: &Row<'_>) -> rusqlite::Result<ScoreRow> {
    let axes_raw: String = row.get(4)?;
    let axes = serde_json::from_str::<Value>(&axes_raw)
        .ok()
        .and_then(|v| AxisVector::from_json(&v).ok())
        .unwrap_or_else(AxisVector::placeholder);
    let suite_raw: String = row.get(7)?;
    Ok(ScoreRow {
        id: row.get(0)?,
        model_id: row.get(1)?,
        ts: parse_ts(row.get(2)?),
        stupid_score: row.get(3)?,
        axes,
        cusum: row.get(5)?,
        note: row.get(6)?,
        suite: Suite::parse(&suite_raw).unwrap_or(Suite::Hourly),
        confidence_lower: row.get(8)?,
        confidence_upper: row.get(9)?,
        standard_error: row.get(10)?,
        sample_size: row.get(11)?,
        model_variance: row.get(12)?,
        synthetic: row.get::<_, i64>(13)? != 0,
    })
}

fn row_to_change_point(row: &Row<'_>) -> rusqlite::Result<ChangePointRow> {
    let change_type_raw: String = row.get(7)?;
    let affected_raw: String = row.get(8)?;
    Ok(ChangePointRow {
        id: row.get(0)?,
        model_id: row.get(1)?,
        detected_at: parse_ts(row.get(2)?),
        from_score: row.get(3)?,
        to_score: row.get(4)?,
        delta: row.get(5)?,
        significance: row.get(6)?,
        change_type: ChangeType::parse(&change_type_raw).unwrap_or(ChangeType::Shift),
        affected_axes: serde_json::from_str(&affected_raw).unwrap_or_default(),
        suspected_cause: row.get(9)?,
    })
}

fn collect_models(
    rows: impl Iterator<Item = rusqlite::Result<ModelRecord>>,
) -> Result<Vec<ModelRecord>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn collect_scores(
    rows: impl Iterator<Item = rusqlite::Result<ScoreRow>>,
) -> Result<Vec<ScoreRow>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SENTINEL_ALL_TASKS_FAILED, SENTINEL_CANARY_FAILED};

    fn score_at(model_id: i64, ts: DateTime<Utc>, value: f64) -> NewScore {
        let mut axes = AxisVector::zero();
        axes.correctness = value / 100.0;
        NewScore {
            model_id,
            ts,
            suite: Suite::Hourly,
            stupid_score: value,
            axes,
            cusum: 0.0,
            note: None,
            confidence_lower: Some(value - 3.0),
            confidence_upper: Some(value + 3.0),
            standard_error: Some(1.5),
            sample_size: Some(7),
            model_variance: Some(2.0),
            synthetic: false,
        }
    }

    #[test]
    fn schema_and_seeds_apply() {
        let store = ScoreStore::open_in_memory().unwrap();
        let models = store.ranked_models().unwrap();
        assert!(!models.is_empty());
        let health = store.health().unwrap();
        assert_eq!(health.scores, 0);
        assert!(health.models > 0);
    }

    #[test]
    fn latest_prefers_greatest_ts_then_id() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        let ts = Utc::now();
        store.insert_score(&score_at(model, ts, 70.0)).unwrap();
        store.insert_score(&score_at(model, ts, 75.0)).unwrap();
        let latest = store.latest_valid_score(model, Suite::Hourly).unwrap().unwrap();
        assert_eq!(latest.stupid_score, 75.0);
    }

    #[test]
    fn sentinel_rows_excluded_from_valid_reads() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        let ts = Utc::now();
        store.insert_score(&score_at(model, ts, 80.0)).unwrap();
        store
            .insert_score(&NewScore::sentinel(
                model,
                ts + Duration::hours(1),
                Suite::Hourly,
                SENTINEL_ALL_TASKS_FAILED,
                "All benchmark tasks failed",
            ))
            .unwrap();
        let latest = store.latest_valid_score(model, Suite::Hourly).unwrap().unwrap();
        assert_eq!(latest.stupid_score, 80.0);
        let latest_any = store.latest_row(model, Suite::Hourly).unwrap().unwrap();
        assert_eq!(latest_any.stupid_score, SENTINEL_ALL_TASKS_FAILED);
        assert!(latest_any
            .axes
            .get("correctness")
            .is_some_and(|v| v == crate::models::AXIS_PLACEHOLDER));
    }

    #[test]
    fn synthetic_rows_excluded_from_valid_reads() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        let ts = Utc::now();
        store.insert_score(&score_at(model, ts, 60.0)).unwrap();
        let mut synthetic = score_at(model, ts + Duration::hours(1), 90.0);
        synthetic.synthetic = true;
        store.insert_score(&synthetic).unwrap();
        let latest = store.latest_valid_score(model, Suite::Hourly).unwrap().unwrap();
        assert_eq!(latest.stupid_score, 60.0);
        assert_eq!(store.count_valid_scores(model, Suite::Hourly).unwrap(), 1);
    }

    #[test]
    fn change_point_collision_window() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        let ts = Utc::now();
        let cp = NewChangePoint {
            model_id: model,
            detected_at: ts,
            from_score: 85.0,
            to_score: 60.0,
            significance: 3.0,
            change_type: ChangeType::Degradation,
            affected_axes: vec!["correctness".to_string()],
            suspected_cause: "likely model update".to_string(),
        };
        store.insert_change_point(&cp).unwrap();
        assert!(store.change_point_exists_near(model, ts).unwrap());
        assert!(store
            .change_point_exists_near(model, ts + Duration::minutes(30))
            .unwrap());
        assert!(!store
            .change_point_exists_near(model, ts + Duration::hours(2))
            .unwrap());
        let listed = store.change_points(model, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].delta, -25.0);
    }

    #[test]
    fn runs_and_metrics_round_trip() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        let mut axes = AxisVector::zero();
        axes.correctness = 1.0;
        axes.edge_cases = 0.9;
        let run_id = store
            .insert_run(&NewRun {
                model_id: model,
                task_slug: "two-sum-indices".to_string(),
                ts: Utc::now(),
                temp: 0.1,
                seed: 42,
                tokens_in: 120,
                tokens_out: 80,
                latency_ms: 300,
                attempts: 1,
                passed: true,
                artifacts: None,
                axes,
            })
            .unwrap();
        assert!(run_id > 0);
        assert_eq!(store.health().unwrap().runs, 1);
    }

    #[test]
    fn canary_sentinel_round_trips() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        store
            .insert_score(&NewScore::sentinel(
                model,
                Utc::now(),
                Suite::Hourly,
                SENTINEL_CANARY_FAILED,
                "canary failed: http 401",
            ))
            .unwrap();
        let row = store.latest_row(model, Suite::Hourly).unwrap().unwrap();
        assert!(row.is_sentinel());
        assert!(row.note.unwrap().contains("canary"));
    }
}
