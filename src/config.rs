//! Typed process configuration, read once at startup.
//!
//! All environment access happens here; the rest of the engine receives a
//! `Config` value. Credentials are read separately by the key pool so they
//! never transit through logs or serialized config.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Linear calibration applied to final (non-sentinel) scores:
/// `y = clamp(scale * x + lift, min, max)`.
#[derive(Debug, Clone, Copy)]
pub struct ScoreCalibration {
    pub scale: f64,
    pub lift: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for ScoreCalibration {
    fn default() -> Self {
        Self {
            scale: 1.0,
            lift: 0.0,
            min: 0.0,
            max: 100.0,
        }
    }
}

impl ScoreCalibration {
    /// Sentinel scores pass through uncalibrated.
    pub fn apply(&self, score: f64) -> f64 {
        if score < 0.0 {
            return score;
        }
        (self.scale * score + self.lift).clamp(self.min, self.max)
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub calibration: ScoreCalibration,
    /// Pinned batch timestamp for deterministic runs; normally unset.
    pub batch_timestamp_override: Option<DateTime<Utc>>,
    /// When false, the pre-sweep canary is skipped entirely.
    pub canary_enabled: bool,
    /// Trials per (model, task) in the hourly suite.
    pub trials_per_task: usize,
    /// Tasks selected per sweep.
    pub tasks_per_sweep: usize,
    /// Interpreter used for sandboxed evaluation.
    pub sandbox_python: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./modelmeter.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let calibration = ScoreCalibration {
            scale: env_f64("SCORE_SCALE", 1.0),
            lift: env_f64("SCORE_LIFT", 0.0),
            min: env_f64("SCORE_MIN", 0.0),
            max: env_f64("SCORE_MAX", 100.0),
        };

        let batch_timestamp_override = match std::env::var("BATCH_TIMESTAMP") {
            Ok(raw) if !raw.trim().is_empty() => match DateTime::parse_from_rfc3339(raw.trim()) {
                Ok(ts) => Some(ts.with_timezone(&Utc)),
                Err(e) => {
                    warn!("ignoring unparseable BATCH_TIMESTAMP {raw:?}: {e}");
                    None
                }
            },
            _ => None,
        };

        let canary_enabled = std::env::var("CANARY_MODE")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "off" | "0" | "false"))
            .unwrap_or(true);

        let sandbox_python =
            std::env::var("SANDBOX_PYTHON").unwrap_or_else(|_| "python3".to_string());

        Ok(Self {
            database_path,
            port,
            calibration,
            batch_timestamp_override,
            canary_enabled,
            trials_per_task: 5,
            tasks_per_sweep: 7,
            sandbox_python,
        })
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                warn!("ignoring unparseable {key}={raw:?}, using {default}");
                default
            }
        },
        Err(_) => default,
    }
}
