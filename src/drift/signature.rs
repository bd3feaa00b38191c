//! Drift signatures: regime classification, per-axis trends, diagnosis.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{ScoreRow, Suite, AXIS_KEYS};
use crate::scoring::stats::{self, Trend};
use crate::store::ScoreStore;

/// Regimes a model's recent behaviour can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Stable,
    Degraded,
    Recovering,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Normal,
    Warning,
    Alert,
}

#[derive(Debug, Clone, Serialize)]
pub struct AxisTrendEntry {
    pub axis: String,
    pub current: f64,
    pub trend: Trend,
    /// Change between the recent and older comparison windows, in
    /// percentage points of the 0..1 axis scale.
    pub change_pp: f64,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftSignature {
    pub model_id: i64,
    pub timestamp: DateTime<Utc>,
    pub current_score: f64,
    pub baseline_28d: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub regime: Regime,
    pub variance_24h: f64,
    pub cusum: f64,
    pub axes: Vec<AxisTrendEntry>,
    pub alert: AlertStatus,
    pub diagnosis: String,
    pub recommendation: String,
    pub sample_count: usize,
}

/// Minimum history before a signature is meaningful.
const MIN_SAMPLES: usize = 4;
/// Points of score drop beyond the CI that force the DEGRADED regime.
const DEGRADED_FLOOR: f64 = 8.0;
/// 24h standard deviation above which the series counts as volatile.
const VOLATILE_STD: f64 = 8.0;
/// Axis trend threshold, percentage points.
const AXIS_TREND_PP: f64 = 5.0;

/// Compute the signature for one model from the score log. Returns `Ok(None)`
/// when there is not enough history; no signature row is written in that
/// case.
pub fn compute(
    store: &ScoreStore,
    model_id: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<DriftSignature>> {
    let window = store.valid_scores_since(model_id, Suite::Hourly, now - Duration::days(28))?;
    if window.len() < MIN_SAMPLES {
        return Ok(None);
    }

    // Newest-first from the store; chronological for the detectors.
    let mut chronological: Vec<&ScoreRow> = window.iter().collect();
    chronological.reverse();
    let series: Vec<f64> = chronological.iter().map(|r| r.stupid_score).collect();

    let current = *series.last().expect("non-empty");
    let baseline = stats::mean(&series);

    let last_24h: Vec<f64> = chronological
        .iter()
        .filter(|r| r.ts >= now - Duration::days(1))
        .map(|r| r.stupid_score)
        .collect();
    let variance_24h = stats::std_dev(&last_24h);

    let confidence = stats::confidence_interval(&series);
    let cusum = stats::downward_cusum(&series);

    let regime = classify_regime(current, baseline, confidence.width(), variance_24h);
    let alert = classify_alert(regime, cusum, variance_24h);

    let axes = axis_trends(&chronological);
    let (diagnosis, recommendation) = diagnose(regime, &axes, current, baseline);

    Ok(Some(DriftSignature {
        model_id,
        timestamp: now,
        current_score: current,
        baseline_28d: baseline,
        confidence_lower: confidence.lower,
        confidence_upper: confidence.upper,
        regime,
        variance_24h,
        cusum,
        axes,
        alert,
        diagnosis,
        recommendation,
        sample_count: series.len(),
    }))
}

fn classify_regime(current: f64, baseline: f64, ci_width: f64, variance_24h: f64) -> Regime {
    if baseline - current > ci_width.max(DEGRADED_FLOOR) {
        Regime::Degraded
    } else if current - baseline > 5.0 && variance_24h < VOLATILE_STD {
        Regime::Recovering
    } else if variance_24h > VOLATILE_STD {
        Regime::Volatile
    } else {
        Regime::Stable
    }
}

fn classify_alert(regime: Regime, cusum: f64, variance_24h: f64) -> AlertStatus {
    if regime == Regime::Degraded || cusum > 0.10 {
        AlertStatus::Alert
    } else if regime == Regime::Volatile || cusum > 0.05 || variance_24h > VOLATILE_STD {
        AlertStatus::Warning
    } else {
        AlertStatus::Normal
    }
}

/// Per-axis 3-vs-older-3 trend comparison.
fn axis_trends(chronological: &[&ScoreRow]) -> Vec<AxisTrendEntry> {
    let mut out = Vec::with_capacity(AXIS_KEYS.len());
    let n = chronological.len();
    for key in AXIS_KEYS {
        let values: Vec<f64> = chronological
            .iter()
            .filter_map(|r| r.axes.get(key))
            .collect();
        let current = values.last().copied().unwrap_or(0.0);

        let (trend, change_pp) = if n >= 6 {
            let recent = stats::mean(&values[n - 3..]);
            let older = stats::mean(&values[n - 6..n - 3]);
            let pp = (recent - older) * 100.0;
            (
                stats::trend_between(recent * 100.0, older * 100.0, AXIS_TREND_PP),
                pp,
            )
        } else {
            (Trend::Stable, 0.0)
        };

        let status = match trend {
            Trend::Down => "degrading",
            Trend::Up => "improving",
            Trend::Stable => "ok",
        };
        out.push(AxisTrendEntry {
            axis: (*key).to_string(),
            current,
            trend,
            change_pp,
            status,
        });
    }
    out
}

fn axis_entry<'a>(axes: &'a [AxisTrendEntry], key: &str) -> Option<&'a AxisTrendEntry> {
    axes.iter().find(|a| a.axis == key)
}

/// Prioritised diagnosis rules; the first match wins.
fn diagnose(
    regime: Regime,
    axes: &[AxisTrendEntry],
    current: f64,
    baseline: f64,
) -> (String, String) {
    let safety = axis_entry(axes, "safety");
    let correctness = axis_entry(axes, "correctness");
    let format = axis_entry(axes, "format");
    let complexity = axis_entry(axes, "complexity");

    if let Some(s) = safety {
        if s.current < 0.5 || s.change_pp < -10.0 {
            return (
                "safety over-refusal".to_string(),
                "Recent safety tuning appears to be rejecting benign coding tasks; review refusal behaviour.".to_string(),
            );
        }
    }
    if let Some(c) = correctness {
        if c.change_pp < -10.0 || c.current < 0.5 {
            return (
                "correctness degradation".to_string(),
                "Solutions are failing test cases more often; investigate a silent model update or routing change.".to_string(),
            );
        }
    }
    let format_drop = format.map(|f| f.change_pp < -10.0).unwrap_or(false);
    let complexity_drop = complexity.map(|c| c.change_pp < -10.0).unwrap_or(false);
    if format_drop || complexity_drop {
        return (
            "instruction adherence issues".to_string(),
            "Responses drift from the requested output shape; check prompt handling and output formatting.".to_string(),
        );
    }
    if regime == Regime::Volatile {
        return (
            "volatile performance".to_string(),
            "Scores swing widely between sweeps; treat short-term rankings with caution.".to_string(),
        );
    }
    if regime == Regime::Degraded || current + 5.0 < baseline {
        return (
            "general decline".to_string(),
            "Overall score is below the 28-day baseline; monitor the next sweeps closely.".to_string(),
        );
    }
    (
        "healthy".to_string(),
        "No corrective action needed.".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AxisVector, NewScore};

    fn seed_series(store: &ScoreStore, model_id: i64, now: DateTime<Utc>, scores: &[f64]) {
        for (i, &value) in scores.iter().enumerate() {
            let age = scores.len() - i;
            let mut axes = AxisVector::zero();
            axes.correctness = (value / 100.0).clamp(0.0, 1.0);
            axes.safety = 1.0;
            axes.format = 1.0;
            axes.complexity = 0.6;
            store
                .insert_score(&NewScore {
                    model_id,
                    ts: now - Duration::hours(age as i64),
                    suite: Suite::Hourly,
                    stupid_score: value,
                    axes,
                    cusum: 0.0,
                    note: None,
                    confidence_lower: None,
                    confidence_upper: None,
                    standard_error: None,
                    sample_size: Some(7),
                    model_variance: None,
                    synthetic: false,
                })
                .unwrap();
        }
    }

    fn test_model(store: &ScoreStore) -> i64 {
        store.ranked_models().unwrap()[0].id
    }

    #[test]
    fn insufficient_history_yields_none() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = test_model(&store);
        seed_series(&store, model, Utc::now(), &[80.0, 81.0]);
        assert!(compute(&store, model, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn stable_series_is_stable_and_normal() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = test_model(&store);
        let now = Utc::now();
        seed_series(&store, model, now, &[82.0, 81.5, 82.2, 81.9, 82.1, 82.0, 81.8, 82.0]);
        let sig = compute(&store, model, now).unwrap().unwrap();
        assert_eq!(sig.regime, Regime::Stable);
        assert_eq!(sig.alert, AlertStatus::Normal);
        assert_eq!(sig.diagnosis, "healthy");
        assert_eq!(sig.axes.len(), AXIS_KEYS.len());
    }

    #[test]
    fn collapse_is_degraded_alert() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = test_model(&store);
        let now = Utc::now();
        seed_series(
            &store,
            model,
            now,
            &[90.0, 90.0, 90.0, 90.0, 90.0, 88.0, 70.0, 68.0, 66.0, 65.0, 60.0, 55.0],
        );
        let sig = compute(&store, model, now).unwrap().unwrap();
        assert_eq!(sig.regime, Regime::Degraded);
        assert_eq!(sig.alert, AlertStatus::Alert);
        assert!(sig.cusum > 0.05);
        let correctness = sig.axes.iter().find(|a| a.axis == "correctness").unwrap();
        assert_eq!(correctness.trend, Trend::Down);
        assert_eq!(sig.diagnosis, "general decline");
    }

    #[test]
    fn signature_is_deterministic_for_unchanged_store() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = test_model(&store);
        let now = Utc::now();
        seed_series(&store, model, now, &[80.0, 79.0, 81.0, 80.5, 80.2, 79.8]);
        let a = serde_json::to_value(compute(&store, model, now).unwrap().unwrap()).unwrap();
        let b = serde_json::to_value(compute(&store, model, now).unwrap().unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
