//! Change-point detection over the recent score log.
//!
//! A 5-score window slides over the last 7 days; adjacent window pairs
//! become a change point when the mean shift is large, the confidence
//! intervals are disjoint, and the shift dwarfs the interval widths.
//! Detection is idempotent within a one-hour collision window.

use chrono::{DateTime, Duration, Utc};

use crate::models::{ChangeType, ScoreRow, Suite, AXIS_KEYS};
use crate::scoring::stats;
use crate::store::{NewChangePoint, ScoreStore};

const WINDOW: usize = 5;
/// Minimum absolute mean shift, points.
const MIN_SHIFT: f64 = 8.0;
/// Per-axis absolute change that marks the axis as affected.
const AXIS_SHIFT: f64 = 0.10;

/// Detect and persist new change points for one model. Returns the number
/// of rows inserted; re-running without new data inserts nothing.
pub fn detect(store: &ScoreStore, model_id: i64, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let recent = store.valid_scores_since(model_id, Suite::Hourly, now - Duration::days(7))?;
    if recent.len() < WINDOW * 2 {
        return Ok(0);
    }
    let mut chronological: Vec<&ScoreRow> = recent.iter().collect();
    chronological.reverse();

    let mut inserted = 0;
    for start in 0..=(chronological.len() - WINDOW * 2) {
        let before = &chronological[start..start + WINDOW];
        let after = &chronological[start + WINDOW..start + WINDOW * 2];
        if let Some(candidate) = evaluate_pair(model_id, before, after) {
            if store.change_point_exists_near(model_id, candidate.detected_at)? {
                continue;
            }
            store.insert_change_point(&candidate)?;
            inserted += 1;
        }
    }
    Ok(inserted)
}

fn evaluate_pair(
    model_id: i64,
    before: &[&ScoreRow],
    after: &[&ScoreRow],
) -> Option<NewChangePoint> {
    let before_scores: Vec<f64> = before.iter().map(|r| r.stupid_score).collect();
    let after_scores: Vec<f64> = after.iter().map(|r| r.stupid_score).collect();

    let from = stats::mean(&before_scores);
    let to = stats::mean(&after_scores);
    let delta = to - from;
    if delta.abs() <= MIN_SHIFT {
        return None;
    }

    let ci_before = stats::confidence_interval(&before_scores);
    let ci_after = stats::confidence_interval(&after_scores);
    let overlapping = ci_before.upper >= ci_after.lower && ci_after.upper >= ci_before.lower;
    if overlapping {
        return None;
    }
    let mean_width = (ci_before.width() + ci_after.width()) / 2.0;
    if delta.abs() <= 2.0 * mean_width {
        return None;
    }

    let affected_axes = affected_axes(before, after);
    let change_type = classify(delta, &affected_axes);
    let suspected_cause = suspect_cause(&affected_axes);

    Some(NewChangePoint {
        model_id,
        detected_at: after.first().map(|r| r.ts).unwrap_or_else(Utc::now),
        from_score: from,
        to_score: to,
        significance: if mean_width > 1e-9 {
            delta.abs() / mean_width
        } else {
            delta.abs()
        },
        change_type,
        affected_axes,
        suspected_cause,
    })
}

fn affected_axes(before: &[&ScoreRow], after: &[&ScoreRow]) -> Vec<String> {
    let mut affected = Vec::new();
    for key in AXIS_KEYS {
        let b: Vec<f64> = before.iter().filter_map(|r| r.axes.get(key)).collect();
        let a: Vec<f64> = after.iter().filter_map(|r| r.axes.get(key)).collect();
        if b.is_empty() || a.is_empty() {
            continue;
        }
        if (stats::mean(&a) - stats::mean(&b)).abs() > AXIS_SHIFT {
            affected.push((*key).to_string());
        }
    }
    affected
}

fn classify(delta: f64, affected: &[String]) -> ChangeType {
    let format_only = affected.iter().all(|a| a == "format" || a == "codeQuality")
        && !affected.is_empty();
    if format_only {
        ChangeType::Shift
    } else if delta > 0.0 {
        ChangeType::Improvement
    } else {
        ChangeType::Degradation
    }
}

/// Infer a likely cause from the affected-axis pattern.
fn suspect_cause(affected: &[String]) -> String {
    let has = |k: &str| affected.iter().any(|a| a == k);
    if has("safety") {
        "safety tuning".to_string()
    } else if has("correctness") && (has("complexity") || has("debugging")) {
        "model update".to_string()
    } else if has("efficiency") || has("stability") {
        "performance issue".to_string()
    } else if has("format") || has("codeQuality") {
        "output format change".to_string()
    } else if has("correctness") {
        "model update".to_string()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AxisVector, NewScore};

    fn insert(store: &ScoreStore, model_id: i64, ts: DateTime<Utc>, score: f64, correctness: f64) {
        let mut axes = AxisVector::zero();
        axes.correctness = correctness;
        axes.complexity = correctness * 0.6;
        axes.safety = 1.0;
        axes.format = 1.0;
        store
            .insert_score(&NewScore {
                model_id,
                ts,
                suite: Suite::Hourly,
                stupid_score: score,
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

    fn seed_step_change(store: &ScoreStore, model_id: i64, now: DateTime<Utc>) {
        // Ten hourly scores: five near 90, then five near 62.
        let series = [90.0, 90.5, 89.5, 90.2, 89.8, 62.0, 61.5, 62.5, 61.8, 62.2];
        for (i, &score) in series.iter().enumerate() {
            let age = series.len() - i;
            insert(store, model_id, now - Duration::hours(age as i64), score, score / 100.0);
        }
    }

    #[test]
    fn step_change_detected_once() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        let now = Utc::now();
        seed_step_change(&store, model, now);

        let first = detect(&store, model, now).unwrap();
        assert_eq!(first, 1);
        let points = store.change_points(model, 10).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].change_type, ChangeType::Degradation);
        assert!(points[0].affected_axes.iter().any(|a| a == "correctness"));
        assert!(points[0].delta < -20.0);

        // Idempotent: nothing new without new data.
        let second = detect(&store, model, now).unwrap();
        assert_eq!(second, 0);
        assert_eq!(store.change_points(model, 10).unwrap().len(), 1);
    }

    #[test]
    fn flat_series_yields_nothing() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        let now = Utc::now();
        for i in 0..12 {
            insert(&store, model, now - Duration::hours(12 - i), 80.0 + (i % 2) as f64, 0.8);
        }
        assert_eq!(detect(&store, model, now).unwrap(), 0);
    }

    #[test]
    fn noisy_shift_with_overlapping_intervals_rejected() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        let now = Utc::now();
        // Means differ by ~9 but the windows are extremely noisy.
        let series = [95.0, 60.0, 92.0, 65.0, 90.0, 85.0, 55.0, 80.0, 52.0, 78.0];
        for (i, &score) in series.iter().enumerate() {
            let age = series.len() - i;
            insert(&store, model, now - Duration::hours(age as i64), score, score / 100.0);
        }
        assert_eq!(detect(&store, model, now).unwrap(), 0);
    }

    #[test]
    fn improvement_classified_positively() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        let now = Utc::now();
        let series = [60.0, 60.5, 59.5, 60.2, 59.8, 82.0, 81.5, 82.5, 81.8, 82.2];
        for (i, &score) in series.iter().enumerate() {
            let age = series.len() - i;
            insert(&store, model, now - Duration::hours(age as i64), score, score / 100.0);
        }
        detect(&store, model, now).unwrap();
        let points = store.change_points(model, 10).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].change_type, ChangeType::Improvement);
    }
}
