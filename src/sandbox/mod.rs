//! Sandboxed evaluation of model-generated code.
//!
//! Pipeline: extract candidate code from the raw response, statically check
//! for the expected symbol, execute inside a resource-limited Python
//! subprocess, and reduce the verdict to axis scores. No failure mode in
//! here raises; a broken submission is a zero-correctness axis record.

pub mod axes;
pub mod extract;
pub mod harness;
pub mod runner;

use axes::EvalAxes;
use extract::Extracted;
use runner::{SandboxOutcome, SandboxRunner};

use crate::catalogue::TaskDef;

/// One trial's evaluation result.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub axes: EvalAxes,
    pub outcome: SandboxOutcome,
    /// Extracted code, when extraction produced anything.
    pub code: Option<String>,
}

pub struct Evaluator {
    runner: SandboxRunner,
}

impl Evaluator {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            runner: SandboxRunner::new(python),
        }
    }

    /// Extract, execute, and score one raw model response. `symbol` is the
    /// expected top-level definition; during sweeps this is the batch alias
    /// rather than the task's canonical symbol.
    pub async fn evaluate(&self, task: &TaskDef, raw_response: &str, symbol: &str) -> Evaluation {
        let extracted: Option<Extracted> = extract::extract_code(raw_response, symbol);

        let outcome = match &extracted {
            Some(e) => self.runner.run(task, &e.code, symbol).await,
            None => SandboxOutcome {
                compiled: false,
                symbol_present: false,
                passed: 0,
                total: 0,
                error: Some("no code extracted".to_string()),
            },
        };

        let axes = axes::score_submission(task, extracted.as_ref(), &outcome);
        Evaluation {
            axes,
            outcome,
            code: extracted.map(|e| e.code),
        }
    }
}
