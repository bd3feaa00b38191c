//! Core domain types shared across the engine: vendors, models, suites,
//! axis vectors, and the persisted score/run/change-point rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Sentinel stupid-score: provider has no credentials configured.
pub const SENTINEL_NO_PROVIDER: f64 = -999.0;
/// Sentinel stupid-score: every selected task failed.
pub const SENTINEL_ALL_TASKS_FAILED: f64 = -888.0;
/// Sentinel stupid-score: the adapter canary failed non-retryably.
pub const SENTINEL_CANARY_FAILED: f64 = -777.0;

/// Placeholder value written into every axis of a sentinel score row.
pub const AXIS_PLACEHOLDER: f64 = -1.0;

pub fn is_sentinel(score: f64) -> bool {
    score == SENTINEL_NO_PROVIDER
        || score == SENTINEL_ALL_TASKS_FAILED
        || score == SENTINEL_CANARY_FAILED
}

/// Benchmark suites. `hourly` is produced by this engine; `deep` and
/// `tooling` are written by sibling subsystems through the same contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suite {
    Hourly,
    Deep,
    Tooling,
}

impl Suite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Suite::Hourly => "hourly",
            Suite::Deep => "deep",
            Suite::Tooling => "tooling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Some(Suite::Hourly),
            "deep" => Some(Suite::Deep),
            "tooling" => Some(Suite::Tooling),
            _ => None,
        }
    }
}

/// Supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    OpenAI,
    Anthropic,
    Google,
    XAI,
    DeepSeek,
    Kimi,
    GLM,
}

pub const ALL_VENDORS: &[Vendor] = &[
    Vendor::OpenAI,
    Vendor::Anthropic,
    Vendor::Google,
    Vendor::XAI,
    Vendor::DeepSeek,
    Vendor::Kimi,
    Vendor::GLM,
];

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::OpenAI => "openai",
            Vendor::Anthropic => "anthropic",
            Vendor::Google => "google",
            Vendor::XAI => "xai",
            Vendor::DeepSeek => "deepseek",
            Vendor::Kimi => "kimi",
            Vendor::GLM => "glm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Vendor::OpenAI),
            "anthropic" => Some(Vendor::Anthropic),
            "google" | "gemini" => Some(Vendor::Google),
            "xai" | "x-ai" => Some(Vendor::XAI),
            "deepseek" => Some(Vendor::DeepSeek),
            "kimi" | "moonshot" => Some(Vendor::Kimi),
            "glm" | "zhipu" => Some(Vendor::GLM),
            _ => None,
        }
    }

    /// Environment prefixes checked, in order, for `<PREFIX>_API_KEY[_N]`.
    pub fn env_prefixes(&self) -> &'static [&'static str] {
        match self {
            Vendor::OpenAI => &["OPENAI"],
            Vendor::Anthropic => &["ANTHROPIC"],
            Vendor::Google => &["GEMINI", "GOOGLE"],
            Vendor::XAI => &["XAI"],
            Vendor::DeepSeek => &["DEEPSEEK"],
            Vendor::Kimi => &["KIMI"],
            Vendor::GLM => &["GLM"],
        }
    }
}

/// A benchmarked model as persisted in the `models` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: i64,
    pub name: String,
    pub vendor: Vendor,
    pub version: Option<String>,
    pub display_name: Option<String>,
    pub show_in_rankings: bool,
    pub supports_tool_calling: bool,
    pub uses_reasoning_effort: bool,
    pub created_at: DateTime<Utc>,
}

impl ModelRecord {
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Canonical axis keys, in weight-table order. The JSON axis map persisted
/// with every score uses exactly these nine keys.
pub const AXIS_KEYS: &[&str] = &[
    "correctness",
    "complexity",
    "codeQuality",
    "stability",
    "format",
    "efficiency",
    "edgeCases",
    "debugging",
    "safety",
];

/// Axis weights. Must sum to 1.0 (checked by a unit test and asserted when
/// the scoring formula runs).
pub const AXIS_WEIGHTS: &[(&str, f64)] = &[
    ("correctness", 0.30),
    ("complexity", 0.18),
    ("codeQuality", 0.12),
    ("stability", 0.12),
    ("format", 0.08),
    ("efficiency", 0.05),
    ("edgeCases", 0.05),
    ("debugging", 0.05),
    ("safety", 0.05),
];

/// One value per axis. Field names follow the historic `metrics` column
/// names where they differ (spec ↔ complexity, refusal ↔ edgeCases,
/// recovery ↔ debugging); JSON serialisation always uses the canonical keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisVector {
    pub correctness: f64,
    pub complexity: f64,
    pub code_quality: f64,
    pub stability: f64,
    pub format: f64,
    pub efficiency: f64,
    pub edge_cases: f64,
    pub debugging: f64,
    pub safety: f64,
}

impl AxisVector {
    pub fn zero() -> Self {
        Self {
            correctness: 0.0,
            complexity: 0.0,
            code_quality: 0.0,
            stability: 0.0,
            format: 0.0,
            efficiency: 0.0,
            edge_cases: 0.0,
            debugging: 0.0,
            safety: 0.0,
        }
    }

    /// All-axes placeholder written with sentinel scores.
    pub fn placeholder() -> Self {
        Self {
            correctness: AXIS_PLACEHOLDER,
            complexity: AXIS_PLACEHOLDER,
            code_quality: AXIS_PLACEHOLDER,
            stability: AXIS_PLACEHOLDER,
            format: AXIS_PLACEHOLDER,
            efficiency: AXIS_PLACEHOLDER,
            edge_cases: AXIS_PLACEHOLDER,
            debugging: AXIS_PLACEHOLDER,
            safety: AXIS_PLACEHOLDER,
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        match key {
            "correctness" => Some(self.correctness),
            "complexity" => Some(self.complexity),
            "codeQuality" => Some(self.code_quality),
            "stability" => Some(self.stability),
            "format" => Some(self.format),
            "efficiency" => Some(self.efficiency),
            "edgeCases" => Some(self.edge_cases),
            "debugging" => Some(self.debugging),
            "safety" => Some(self.safety),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: f64) {
        match key {
            "correctness" => self.correctness = value,
            "complexity" => self.complexity = value,
            "codeQuality" => self.code_quality = value,
            "stability" => self.stability = value,
            "format" => self.format = value,
            "efficiency" => self.efficiency = value,
            "edgeCases" => self.edge_cases = value,
            "debugging" => self.debugging = value,
            "safety" => self.safety = value,
            _ => {}
        }
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for key in AXIS_KEYS {
            map.insert(
                (*key).to_string(),
                json!(self.get(key).unwrap_or(AXIS_PLACEHOLDER)),
            );
        }
        Value::Object(map)
    }

    /// Parse a persisted axis map. Every canonical key must be present and
    /// numeric; anything less is a malformed row.
    pub fn from_json(value: &Value) -> anyhow::Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("axes payload is not an object"))?;
        let mut axes = AxisVector::zero();
        for key in AXIS_KEYS {
            let v = obj
                .get(*key)
                .and_then(Value::as_f64)
                .ok_or_else(|| anyhow::anyhow!("axis map missing key {key}"))?;
            axes.set(key, v);
        }
        Ok(axes)
    }
}

/// One row of the append-only score log.
#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub id: i64,
    pub model_id: i64,
    pub ts: DateTime<Utc>,
    pub suite: Suite,
    pub stupid_score: f64,
    pub axes: AxisVector,
    pub cusum: f64,
    pub note: Option<String>,
    pub confidence_lower: Option<f64>,
    pub confidence_upper: Option<f64>,
    pub standard_error: Option<f64>,
    pub sample_size: Option<i64>,
    pub model_variance: Option<f64>,
    pub synthetic: bool,
}

impl ScoreRow {
    pub fn is_sentinel(&self) -> bool {
        is_sentinel(self.stupid_score)
    }
}

/// Fields of a score row the orchestrator fills in before insertion.
#[derive(Debug, Clone)]
pub struct NewScore {
    pub model_id: i64,
    pub ts: DateTime<Utc>,
    pub suite: Suite,
    pub stupid_score: f64,
    pub axes: AxisVector,
    pub cusum: f64,
    pub note: Option<String>,
    pub confidence_lower: Option<f64>,
    pub confidence_upper: Option<f64>,
    pub standard_error: Option<f64>,
    pub sample_size: Option<i64>,
    pub model_variance: Option<f64>,
    pub synthetic: bool,
}

impl NewScore {
    /// A sentinel row: placeholder axes, no interval, not synthetic.
    pub fn sentinel(
        model_id: i64,
        ts: DateTime<Utc>,
        suite: Suite,
        score: f64,
        note: impl Into<String>,
    ) -> Self {
        debug_assert!(is_sentinel(score));
        Self {
            model_id,
            ts,
            suite,
            stupid_score: score,
            axes: AxisVector::placeholder(),
            cusum: 0.0,
            note: Some(note.into()),
            confidence_lower: None,
            confidence_upper: None,
            standard_error: None,
            sample_size: None,
            model_variance: None,
            synthetic: false,
        }
    }
}

/// Per-task, per-batch run aggregate kept for auditing and trend analysis.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: i64,
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Improvement,
    Degradation,
    Shift,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Improvement => "improvement",
            ChangeType::Degradation => "degradation",
            ChangeType::Shift => "shift",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "improvement" => Some(ChangeType::Improvement),
            "degradation" => Some(ChangeType::Degradation),
            "shift" => Some(ChangeType::Shift),
            _ => None,
        }
    }
}

/// A detected behavioural change-point.
#[derive(Debug, Clone, Serialize)]
pub struct ChangePointRow {
    pub id: i64,
    pub model_id: i64,
    pub detected_at: DateTime<Utc>,
    pub from_score: f64,
    pub to_score: f64,
    pub delta: f64,
    pub significance: f64,
    pub change_type: ChangeType,
    pub affected_axes: Vec<String>,
    pub suspected_cause: String,
}
