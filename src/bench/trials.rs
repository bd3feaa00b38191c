//! Per-(model, task) trial execution and collapse.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::prompts;
use crate::catalogue::TaskDef;
use crate::models::{AxisVector, ModelRecord};
use crate::providers::{
    assert_fair_request, backoff, keypool::KeyPool, ChatMessage, ChatRequest, ProviderAdapter,
    FAIR_MAX_TOKENS, FAIR_TEMPERATURE,
};
use crate::sandbox::Evaluator;
use crate::scoring::stats;

/// Shortest extracted-code length considered a usable answer.
const MIN_CODE_CHARS: usize = 10;
/// Extra attempts with a different system-message variant when a response
/// carries no usable code.
const EMPTY_RESPONSE_RETRIES: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct TrialConfig {
    pub trials: usize,
    pub max_tokens: u32,
    /// Phase-2 retry: raised token cap and the completeness suffix.
    pub relaxed: bool,
}

impl TrialConfig {
    pub fn standard(trials: usize) -> Self {
        Self {
            trials,
            max_tokens: FAIR_MAX_TOKENS,
            relaxed: false,
        }
    }
}

/// Collapsed per-task aggregate over successful trials.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub slug: &'static str,
    /// Median axes; efficiency is filled in by the orchestrator, stability
    /// holds the within-task figure until cross-task recomputation.
    pub axes: AxisVector,
    pub within_stability: f64,
    pub latency_ms: f64,
    pub tokens_in: f64,
    pub tokens_out: f64,
    pub attempts: i64,
    pub successful_trials: usize,
}

/// Outcome of running one task, plus overload bookkeeping for the skip
/// list.
#[derive(Debug)]
pub struct TaskRun {
    pub record: Option<TaskRecord>,
    pub overload_failures: u32,
}

#[derive(Clone)]
struct Trial {
    axes: crate::sandbox::axes::EvalAxes,
    latency_ms: f64,
    tokens_in: f64,
    tokens_out: f64,
}

/// Run all trials for one `(model, task)` pair and collapse them.
pub async fn run_task(
    adapter: &Arc<dyn ProviderAdapter>,
    keys: &KeyPool,
    evaluator: &Evaluator,
    model: &ModelRecord,
    task: &'static TaskDef,
    batch_ts: &str,
    cfg: &TrialConfig,
) -> TaskRun {
    let alias = prompts::symbol_alias(batch_ts, task);
    let mut task_prompt = prompts::aliased_prompt(task, &alias);
    if cfg.relaxed {
        task_prompt.push_str("\n\n");
        task_prompt.push_str(prompts::RETRY_SUFFIX);
    }
    let user_prompt = prompts::unified_prompt(batch_ts, task, &task_prompt);

    let mut trials: Vec<Trial> = Vec::with_capacity(cfg.trials);
    let mut attempts: i64 = 0;
    let mut overload_failures: u32 = 0;

    for trial_index in 0..cfg.trials {
        let Some(key) = keys.key_for_trial(model.vendor, trial_index) else {
            warn!("{}: no key for trial {trial_index}", model.name);
            break;
        };

        let mut completed = None;
        for variant in 0..=EMPTY_RESPONSE_RETRIES {
            let request = ChatRequest {
                model: model.name.clone(),
                messages: vec![
                    ChatMessage::system(prompts::SYSTEM_VARIANTS[variant]),
                    ChatMessage::user(user_prompt.clone()),
                ],
                temperature: FAIR_TEMPERATURE,
                max_tokens: cfg.max_tokens,
            };
            assert_fair_request(&request, cfg.relaxed);

            attempts += 1;
            let started = Instant::now();
            let label = format!("{}/{}", model.name, task.slug);
            // The key stays fixed across backoff attempts within a trial.
            let result =
                backoff::with_backoff(&label, |_| adapter.chat(key, &request)).await;
            let latency_ms = started.elapsed().as_millis() as f64;

            match result {
                Ok(response) => {
                    let usable = crate::sandbox::extract::extract_code(&response.text, &alias)
                        .map(|e| e.code.len() >= MIN_CODE_CHARS)
                        .unwrap_or(false);
                    if !usable {
                        if variant < EMPTY_RESPONSE_RETRIES {
                            debug!(
                                "{label}: no usable code, retrying with variant {}",
                                variant + 1
                            );
                            continue;
                        }
                        debug!("{label}: no usable code after retries, trial failed");
                        break;
                    }
                    let evaluation = evaluator.evaluate(task, &response.text, &alias).await;
                    completed = Some(Trial {
                        axes: evaluation.axes,
                        latency_ms,
                        tokens_in: f64::from(response.tokens_in),
                        tokens_out: f64::from(response.tokens_out),
                    });
                    break;
                }
                Err(err) => {
                    if err.is_overload() {
                        overload_failures += 1;
                    }
                    debug!("{label}: trial {trial_index} failed: {err}");
                    break;
                }
            }
        }

        if let Some(trial) = completed {
            trials.push(trial);
        }
    }

    TaskRun {
        record: collapse(task, trials, attempts),
        overload_failures,
    }
}

fn collapse(task: &'static TaskDef, trials: Vec<Trial>, attempts: i64) -> Option<TaskRecord> {
    if trials.is_empty() {
        return None;
    }

    let collect = |f: fn(&Trial) -> f64| -> Vec<f64> { trials.iter().map(f).collect() };

    let correctness_values = collect(|t| t.axes.correctness);
    let within_stability = if trials.len() >= 2 {
        (1.0 - stats::std_dev(&correctness_values) / 0.3).clamp(0.0, 1.0)
    } else {
        0.5
    };

    let mut axes = AxisVector::zero();
    axes.correctness = stats::median(&correctness_values);
    axes.complexity = stats::median(&collect(|t| t.axes.complexity));
    axes.code_quality = stats::median(&collect(|t| t.axes.code_quality));
    axes.edge_cases = stats::median(&collect(|t| t.axes.edge_cases));
    axes.debugging = stats::median(&collect(|t| t.axes.debugging));
    axes.format = stats::median(&collect(|t| t.axes.format));
    axes.safety = stats::median(&collect(|t| t.axes.safety));
    axes.stability = within_stability;

    Some(TaskRecord {
        slug: task.slug,
        axes,
        within_stability,
        latency_ms: stats::median(&collect(|t| t.latency_ms)),
        tokens_in: stats::median(&collect(|t| t.tokens_in)),
        tokens_out: stats::median(&collect(|t| t.tokens_out)),
        attempts,
        successful_trials: trials.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::axes::EvalAxes;

    fn trial(correctness: f64, latency: f64) -> Trial {
        Trial {
            axes: EvalAxes {
                correctness,
                complexity: 0.6,
                code_quality: 0.7,
                edge_cases: 0.8 * correctness,
                debugging: correctness,
                format: 1.0,
                safety: 1.0,
            },
            latency_ms: latency,
            tokens_in: 100.0,
            tokens_out: 80.0,
        }
    }

    fn task() -> &'static TaskDef {
        crate::catalogue::task_by_slug("two-sum-indices").unwrap()
    }

    #[test]
    fn collapse_takes_medians() {
        let trials = vec![trial(1.0, 200.0), trial(0.8, 400.0), trial(1.0, 300.0)];
        let record = collapse(task(), trials, 3).unwrap();
        assert_eq!(record.axes.correctness, 1.0);
        assert_eq!(record.latency_ms, 300.0);
        assert_eq!(record.successful_trials, 3);
        assert!(record.within_stability < 1.0);
    }

    #[test]
    fn collapse_of_nothing_is_none() {
        assert!(collapse(task(), Vec::new(), 5).is_none());
    }

    #[test]
    fn single_trial_defaults_stability() {
        let record = collapse(task(), vec![trial(1.0, 100.0)], 1).unwrap();
        assert_eq!(record.within_stability, 0.5);
    }

    #[test]
    fn unstable_correctness_lowers_stability() {
        let steady = collapse(task(), vec![trial(0.9, 1.0); 5], 5).unwrap();
        let wild = collapse(
            task(),
            vec![trial(1.0, 1.0), trial(0.2, 1.0), trial(0.9, 1.0), trial(0.1, 1.0), trial(1.0, 1.0)],
            5,
        )
        .unwrap();
        assert!(steady.within_stability > wild.within_stability);
        assert_eq!(steady.within_stability, 1.0);
        assert_eq!(wild.within_stability, 0.0);
    }
}
