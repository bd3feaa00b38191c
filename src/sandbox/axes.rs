//! Axis scoring of a single evaluated submission.

use super::extract::{Extracted, ResponseShape};
use super::runner::SandboxOutcome;
use crate::catalogue::{TaskDef, TaskKind};

/// Axes the evaluator itself produces. Efficiency is assigned by the
/// orchestrator from throughput; stability is computed across trials.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalAxes {
    pub correctness: f64,
    pub complexity: f64,
    pub code_quality: f64,
    pub edge_cases: f64,
    pub debugging: f64,
    pub format: f64,
    pub safety: f64,
}

/// Dynamic-execution and network primitives that tank the safety axis and
/// forfeit the clean-code signal.
const UNSAFE_MARKERS: &[&str] = &[
    "eval(",
    "exec(",
    "__import__",
    "compile(",
    "subprocess",
    "socket",
    "urllib",
    "requests.",
    "os.system",
];

fn has_unsafe_marker(code: &str) -> bool {
    UNSAFE_MARKERS.iter().any(|m| code.contains(m))
}

fn format_score(extracted: Option<&Extracted>) -> f64 {
    match extracted.map(|e| e.shape) {
        Some(ResponseShape::PlainCode) | Some(ResponseShape::CleanFenced) => 1.0,
        Some(ResponseShape::FencedWithProse) => 0.8,
        Some(ResponseShape::Unstructured) | None => 0.3,
    }
}

/// Bounded sum of lightweight quality signals over the extracted code.
fn code_quality_score(code: &str, compiled: bool) -> f64 {
    let mut score: f64 = 0.0;

    let len = code.len();
    if (10..=2500).contains(&len) {
        score += 0.25;
    }
    if !has_unsafe_marker(code) {
        score += 0.2;
    }
    if compiled {
        score += 0.2;
    }
    // Type hints on a def signature.
    if code.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("def ") && (t.contains("->") || t.contains(": "))
    }) {
        score += 0.1;
    }
    // A docstring or a comment with some substance.
    let has_comment = code.contains("\"\"\"")
        || code.contains("'''")
        || code
            .lines()
            .any(|l| l.trim_start().starts_with('#') && l.trim().len() > 5);
    if has_comment {
        score += 0.15;
    }
    if code.contains("return ") || code.contains("yield ") {
        score += 0.1;
    }

    if len > 6000 {
        score -= 0.1;
    }
    if code.contains("global ") {
        score -= 0.05;
    }
    if code.contains("lambda") {
        score -= 0.05;
    }

    score.clamp(0.0, 1.0)
}

/// Collapse one trial's raw response, extraction, and sandbox verdict into
/// the evaluator-owned axes.
pub fn score_submission(
    task: &TaskDef,
    extracted: Option<&Extracted>,
    outcome: &SandboxOutcome,
) -> EvalAxes {
    let correctness = outcome.correctness();
    let parsed_ok = outcome.compiled && outcome.symbol_present;

    let complexity = if parsed_ok {
        task.difficulty.complexity_value()
    } else {
        0.0
    };

    let code = extracted.map(|e| e.code.as_str()).unwrap_or_default();
    let code_quality = if code.is_empty() {
        0.0
    } else {
        code_quality_score(code, outcome.compiled)
    };

    let near_perfect_bonus = if correctness >= 0.95 { 1.0 } else { 0.0 };
    let edge_cases = 0.8 * correctness + 0.2 * near_perfect_bonus;

    let debugging = if task.kind == TaskKind::Debug {
        correctness
    } else {
        (correctness + 0.05).min(1.0)
    };

    let safety = if !code.is_empty() && has_unsafe_marker(code) {
        0.2
    } else {
        1.0
    };

    EvalAxes {
        correctness,
        complexity,
        code_quality,
        edge_cases,
        debugging,
        format: format_score(extracted),
        safety,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::task_by_slug;
    use crate::sandbox::extract::extract_code;

    fn outcome(compiled: bool, symbol: bool, passed: u32, total: u32) -> SandboxOutcome {
        SandboxOutcome {
            compiled,
            symbol_present: symbol,
            passed,
            total,
            error: None,
        }
    }

    #[test]
    fn perfect_submission_scores_high() {
        let task = task_by_slug("two-sum-indices").unwrap();
        let raw = "```python\ndef two_sum(nums, target):\n    # hash map of complements\n    seen = {}\n    for i, v in enumerate(nums):\n        if target - v in seen:\n            return [seen[target - v], i]\n        seen[v] = i\n    return []\n```";
        let extracted = extract_code(raw, task.expected_symbol);
        let axes = score_submission(task, extracted.as_ref(), &outcome(true, true, 9, 9));
        assert_eq!(axes.correctness, 1.0);
        assert_eq!(axes.complexity, 0.3);
        assert!(axes.code_quality >= 0.8, "quality {}", axes.code_quality);
        assert_eq!(axes.format, 1.0);
        assert_eq!(axes.safety, 1.0);
        assert!((axes.edge_cases - 1.0).abs() < 1e-9);
    }

    #[test]
    fn failed_parse_zeroes_complexity() {
        let task = task_by_slug("dijkstra-shortest-path").unwrap();
        let axes = score_submission(task, None, &outcome(false, false, 0, 9));
        assert_eq!(axes.correctness, 0.0);
        assert_eq!(axes.complexity, 0.0);
        assert_eq!(axes.format, 0.3);
    }

    #[test]
    fn unsafe_code_tanks_safety() {
        let task = task_by_slug("two-sum-indices").unwrap();
        let raw = "def two_sum(nums, target):\n    return eval('[0, 1]')\n";
        let extracted = extract_code(raw, task.expected_symbol);
        let axes = score_submission(task, extracted.as_ref(), &outcome(true, true, 9, 9));
        assert_eq!(axes.safety, 0.2);
    }

    #[test]
    fn debug_task_uses_raw_correctness() {
        let task = task_by_slug("fix-binary-search").unwrap();
        let axes = score_submission(task, None, &outcome(true, true, 8, 10));
        assert!((axes.debugging - 0.8).abs() < 1e-9);

        let other = task_by_slug("two-sum-indices").unwrap();
        let axes = score_submission(other, None, &outcome(true, true, 8, 10));
        assert!((axes.debugging - 0.85).abs() < 1e-9);
    }

    #[test]
    fn edge_cases_bonus_only_near_perfect() {
        let task = task_by_slug("two-sum-indices").unwrap();
        let nearly = score_submission(task, None, &outcome(true, true, 19, 20));
        assert!((nearly.edge_cases - (0.8 * 0.95 + 0.2)).abs() < 1e-9);
        let half = score_submission(task, None, &outcome(true, true, 10, 20));
        assert!((half.edge_cases - 0.4).abs() < 1e-9);
    }
}
