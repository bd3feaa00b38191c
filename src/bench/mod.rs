//! Benchmark execution: prompt assembly, trials, overload tracking, and the
//! sweep orchestrator.

pub mod engine;
pub mod overload;
pub mod prompts;
pub mod trials;

pub use engine::{BatchContext, Engine, SweepSummary};
pub use overload::OverloadTracker;
