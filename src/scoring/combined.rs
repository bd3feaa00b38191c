//! Combined scores and period aggregates, computed from the score log on
//! the read side.

use crate::scoring::stats::{self, Trend};

/// Suite weights for the combined ranking score.
const HOURLY_WEIGHT: f64 = 0.5;
const DEEP_WEIGHT: f64 = 0.25;
const TOOLING_WEIGHT: f64 = 0.25;
/// Neutral value substituted for a missing suite.
const MISSING_SUBSTITUTE: f64 = 50.0;

/// Combined score across the three suites. `None` when every suite is
/// missing. A missing suite substitutes 50 and draws a coverage penalty:
/// 10% for one missing suite, 20% for two.
pub fn combined_score(hourly: Option<f64>, deep: Option<f64>, tooling: Option<f64>) -> Option<f64> {
    let missing = [hourly, deep, tooling].iter().filter(|s| s.is_none()).count();
    if missing == 3 {
        return None;
    }
    let weighted = hourly.unwrap_or(MISSING_SUBSTITUTE) * HOURLY_WEIGHT
        + deep.unwrap_or(MISSING_SUBSTITUTE) * DEEP_WEIGHT
        + tooling.unwrap_or(MISSING_SUBSTITUTE) * TOOLING_WEIGHT;
    let penalty = match missing {
        0 => 1.0,
        1 => 0.9,
        _ => 0.8,
    };
    Some((weighted * penalty).round())
}

/// Aggregate of a period's scores: mean, trend between the window's newest
/// and oldest values, and a stability figure from the spread.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PeriodAggregate {
    pub mean: f64,
    pub trend: Trend,
    pub stability: f64,
    pub samples: usize,
}

/// Aggregate a newest-first window of non-sentinel scores. `None` for an
/// empty window.
pub fn period_aggregate(newest_first: &[f64]) -> Option<PeriodAggregate> {
    if newest_first.is_empty() {
        return None;
    }
    let newest = newest_first[0];
    let oldest = *newest_first.last().expect("non-empty");
    Some(PeriodAggregate {
        mean: stats::mean(newest_first),
        trend: stats::trend_between(newest, oldest, 5.0),
        stability: stats::stability_from_std(stats::std_dev(newest_first)),
        samples: newest_first.len(),
    })
}
