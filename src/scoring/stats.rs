//! Descriptive statistics, confidence intervals, and drift detectors used
//! by the orchestrator and the read side.

use statrs::distribution::{ContinuousCDF, StudentsT};

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1); zero below two samples.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values
        .iter()
        .map(|&x| {
            let diff = x - m;
            diff * diff
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// 95% confidence interval around the sample mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Confidence {
    pub lower: f64,
    pub upper: f64,
    pub standard_error: f64,
}

impl Confidence {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Student-t interval for n >= 2. A single sample emits a conservative
/// +/- 5 interval; an empty sample emits zero.
pub fn confidence_interval(values: &[f64]) -> Confidence {
    match values.len() {
        0 => Confidence {
            lower: 0.0,
            upper: 0.0,
            standard_error: 0.0,
        },
        1 => Confidence {
            lower: values[0] - 5.0,
            upper: values[0] + 5.0,
            standard_error: 5.0,
        },
        n => {
            let m = mean(values);
            let se = std_dev(values) / (n as f64).sqrt();
            let t = StudentsT::new(0.0, 1.0, (n - 1) as f64)
                .map(|dist| dist.inverse_cdf(0.975))
                .unwrap_or(1.96);
            Confidence {
                lower: m - t * se,
                upper: m + t * se,
                standard_error: se,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
        }
    }
}

/// Up/down/stable on a +/- `threshold` point comparison.
pub fn trend_between(newest: f64, oldest: f64, threshold: f64) -> Trend {
    let delta = newest - oldest;
    if delta > threshold {
        Trend::Up
    } else if delta < -threshold {
        Trend::Down
    } else {
        Trend::Stable
    }
}

/// Piecewise mapping of score standard deviation into a 0..95 stability
/// figure for the dashboard.
pub fn stability_from_std(sd: f64) -> f64 {
    match sd {
        s if s <= 1.0 => 95.0,
        s if s <= 2.0 => 90.0,
        s if s <= 3.0 => 85.0,
        s if s <= 5.0 => 75.0,
        s if s <= 8.0 => 60.0,
        s if s <= 12.0 => 45.0,
        s if s <= 18.0 => 30.0,
        s if s <= 25.0 => 15.0,
        _ => 0.0,
    }
}

/// Page-Hinkley test for a downward mean shift over a score series
/// (chronological order, 0..100 scale). Scores are normalised to 0..1
/// before accumulation.
pub fn page_hinkley_triggered(scores: &[f64], delta: f64, lambda: f64) -> bool {
    if scores.len() < 2 {
        return false;
    }
    let mut running_sum = 0.0;
    let mut m = 0.0;
    let mut m_min: f64 = 0.0;
    for (i, &score) in scores.iter().enumerate() {
        let x = score / 100.0;
        running_sum += x;
        let running_mean = running_sum / (i + 1) as f64;
        m += running_mean - x - delta;
        m_min = m_min.min(m);
        if m - m_min > lambda {
            return true;
        }
    }
    false
}

/// One-sided downward CUSUM on the normalised score series, with a small
/// slack so ordinary jitter does not accumulate. Result is comparable to
/// the 0.05 / 0.10 alerting thresholds.
pub fn downward_cusum(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let slack = 0.02;
    let baseline = mean(scores) / 100.0;
    let mut s: f64 = 0.0;
    let mut peak: f64 = 0.0;
    for &score in scores {
        let x = score / 100.0;
        s = (s + (baseline - x) - slack).max(0.0);
        peak = peak.max(s);
    }
    peak
}
