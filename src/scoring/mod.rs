//! Scoring: the final-score formula and the shared statistics toolbox.

pub mod combined;
pub mod formula;
pub mod stats;

pub use formula::{calculate_score, AxisBaseline, ScoreInputs};
pub use stats::{confidence_interval, Confidence, Trend};
