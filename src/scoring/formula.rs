//! The score formula: axis means in, one 0..100 figure out.
//!
//! Pure in its inputs; the orchestrator feeds it the aggregated axis
//! vector, the optional historical baseline, and the sweep bookkeeping.

use crate::config::ScoreCalibration;
use crate::models::{AxisVector, AXIS_WEIGHTS};

/// Gentle decay exponent applied to every axis before weighting.
const AXIS_DECAY: f64 = 1.4;
/// Curve exponent applied to the weighted base.
const CURVE: f64 = 1.2;
/// Cohort centre used by the Bayesian shrink under low task counts.
const COHORT_CENTRE: f64 = 70.0;

/// Per-axis means and (floored) standard deviations of the historical
/// baseline window.
#[derive(Debug, Clone)]
pub struct AxisBaseline {
    pub mean: AxisVector,
    pub std: AxisVector,
    pub samples: usize,
}

#[derive(Debug, Clone)]
pub struct ScoreInputs<'a> {
    pub axes: &'a AxisVector,
    pub baseline: Option<&'a AxisBaseline>,
    /// Tasks that produced a usable per-task record.
    pub successful_tasks: usize,
    /// `successful / selected` for the sweep.
    pub task_success_rate: f64,
    /// Fewer than 10 historical samples: the -2 penalty applies.
    pub calibrating: bool,
}

/// Compute the final calibrated score. Deterministic for fixed inputs.
pub fn calculate_score(inputs: &ScoreInputs<'_>, calibration: &ScoreCalibration) -> f64 {
    let weight_sum: f64 = AXIS_WEIGHTS.iter().map(|(_, w)| w).sum();
    assert!(
        (weight_sum - 1.0).abs() < 1e-9,
        "axis weights sum to {weight_sum}, expected 1.0"
    );

    let axes = inputs.axes;

    // Weighted base with gentle decay and axis-specific nudges.
    let mut base = 0.0;
    for (key, weight) in AXIS_WEIGHTS {
        let a = axes.get(key).unwrap_or(0.0).clamp(0.0, 1.0);
        let mut p = a.powf(AXIS_DECAY);
        match *key {
            "correctness" if a < 0.95 => p *= 0.85,
            "codeQuality" if a < 0.6 => p *= 0.95,
            _ => {}
        }
        base += weight * p;
    }
    let mut score = (base.clamp(0.0, 1.0)).powf(CURVE) * 100.0;

    // Variance adjustment against the baseline, bounded to [-4, +3].
    if let Some(baseline) = inputs.baseline {
        let mut adjustment = 0.0;
        for (key, weight) in AXIS_WEIGHTS {
            let a = axes.get(key).unwrap_or(0.0);
            let mu = baseline.mean.get(key).unwrap_or(0.0);
            let sigma = baseline.std.get(key).unwrap_or(1e-6).max(1e-6);
            let z = ((a - mu) / sigma).clamp(-3.0, 3.0);
            adjustment += weight * z;
        }
        score += adjustment.clamp(-4.0, 3.0);
    }

    // Hard quality gates.
    let correctness = axes.correctness;
    if correctness < 0.90 {
        score -= 5.0;
    }
    if correctness < 0.70 {
        score -= 6.0;
    }
    if correctness < 0.50 {
        score -= 8.0;
    }
    let quality = axes.code_quality;
    if quality < 0.60 {
        score -= 6.0;
    }
    if quality < 0.40 {
        score -= 12.0;
    }
    if axes.complexity < 0.30 {
        score -= 8.0;
    }

    // Sweep-level penalties.
    score -= 6.0 * (1.0 - inputs.task_success_rate.clamp(0.0, 1.0));
    if inputs.calibrating {
        score -= 2.0;
    }

    // Bayesian shrink toward the cohort centre under thin evidence.
    if inputs.successful_tasks < 5 {
        let n = inputs.successful_tasks as f64;
        let lambda = n / (n + 1.0);
        score = lambda * score + (1.0 - lambda) * COHORT_CENTRE;
    }

    calibration.apply(score.clamp(0.0, 100.0))
}
