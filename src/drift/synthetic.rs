//! Synthetic-score fallback.
//!
//! Some upstream error paths ask for a replacement value rather than a gap.
//! A synthetic row is only generated when enough real history exists; it is
//! a seeded jitter around the historical mean, tagged `synthetic` so every
//! baseline read excludes it.

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::models::{AxisVector, NewScore, Suite, AXIS_KEYS};
use crate::scoring::stats;
use crate::store::ScoreStore;

/// Real rows required before a synthetic value may be fabricated.
const MIN_HISTORY: usize = 10;
/// Jitter bound, in standard deviations.
const JITTER_SIGMA: f64 = 1.5;

/// Build a synthetic score row for `(model, suite)`, or `None` when the
/// history is too thin. `seed` must come from the batch seed so retries
/// within a sweep reproduce the same row.
pub fn synthesize(
    store: &ScoreStore,
    model_id: i64,
    suite: Suite,
    ts: DateTime<Utc>,
    seed: u64,
) -> anyhow::Result<Option<NewScore>> {
    let history = store.recent_valid_scores(model_id, suite, 50)?;
    if history.len() < MIN_HISTORY {
        return Ok(None);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ model_id as u64);

    let scores: Vec<f64> = history.iter().map(|r| r.stupid_score).collect();
    let score_mean = stats::mean(&scores);
    let score_std = stats::std_dev(&scores).max(0.5);
    let stupid_score =
        (score_mean + rng.gen_range(-JITTER_SIGMA..=JITTER_SIGMA) * score_std).clamp(0.0, 100.0);

    let mut axes = AxisVector::zero();
    for key in AXIS_KEYS {
        let values: Vec<f64> = history.iter().filter_map(|r| r.axes.get(key)).collect();
        let mean = stats::mean(&values);
        let std = stats::std_dev(&values).max(0.01);
        let jittered =
            (mean + rng.gen_range(-JITTER_SIGMA..=JITTER_SIGMA) * std).clamp(0.0, 1.0);
        axes.set(key, jittered);
    }

    Ok(Some(NewScore {
        model_id,
        ts,
        suite,
        stupid_score,
        axes,
        cusum: 0.0,
        note: Some("synthetic fallback".to_string()),
        confidence_lower: Some(stupid_score - score_std),
        confidence_upper: Some(stupid_score + score_std),
        standard_error: Some(score_std / (history.len() as f64).sqrt()),
        sample_size: Some(history.len() as i64),
        model_variance: Some(score_std * score_std),
        synthetic: true,
    }))
}
