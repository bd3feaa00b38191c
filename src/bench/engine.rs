//! Benchmark orchestrator.
//!
//! A sweep scores every whitelisted model for one suite at one batch
//! timestamp: providers fan out in parallel, models inside a provider run
//! sequentially, and per-model failures never abort the sweep.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tracing::{error, info, warn};

use super::overload::OverloadTracker;
use super::prompts;
use super::trials::{self, TaskRecord, TrialConfig};
use crate::catalogue::{self, TaskDef};
use crate::config::{Config, ScoreCalibration};
use crate::models::{
    AxisVector, ModelRecord, NewScore, Suite, Vendor, AXIS_WEIGHTS, SENTINEL_ALL_TASKS_FAILED,
    SENTINEL_CANARY_FAILED, SENTINEL_NO_PROVIDER,
};
use crate::providers::{
    backoff, ChatMessage, ChatRequest, ProviderAdapter, ProviderError, ProviderRegistry,
    FAIR_MAX_TOKENS, FAIR_TEMPERATURE, RELAXED_MAX_TOKENS,
};
use crate::sandbox::Evaluator;
use crate::scoring::{self, formula::AxisBaseline, stats};
use crate::store::{NewRun, ScoreStore};

/// Historical window feeding the per-model baseline.
const BASELINE_WINDOW: usize = 50;
/// Below this many historical samples the model counts as calibrating.
const CALIBRATING_THRESHOLD: usize = 10;
/// Scores fed into the Page-Hinkley drift check.
const DRIFT_WINDOW: usize = 12;
const PAGE_HINKLEY_DELTA: f64 = 0.005;
const PAGE_HINKLEY_LAMBDA: f64 = 0.5;

/// Per-sweep shared context. The batch timestamp is the single source of
/// determinism; it is never re-read from the clock mid-sweep.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub ts: DateTime<Utc>,
    pub ts_str: String,
    pub seed: u64,
}

impl BatchContext {
    pub fn new(ts: DateTime<Utc>) -> Self {
        let ts = ts.with_nanosecond(0).unwrap_or(ts);
        let ts_str = ts.to_rfc3339_opts(SecondsFormat::Secs, true);
        let seed = prompts::batch_seed(&ts_str);
        Self { ts, ts_str, seed }
    }

    /// Deterministically select this batch's tasks from the catalogue.
    pub fn select_tasks(&self, count: usize) -> Vec<&'static TaskDef> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut tasks: Vec<&'static TaskDef> = catalogue::catalogue().iter().collect();
        tasks.shuffle(&mut rng);
        tasks.truncate(count);
        tasks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelOutcome {
    Scored,
    SentinelWritten,
    Skipped,
    /// Canary failed retryably; eligible for the sweep-level second pass.
    CanaryRetryable,
}

#[derive(Debug, Clone, Default)]
pub struct SweepSummary {
    pub batch_ts: String,
    pub scored: usize,
    pub sentinels: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Engine {
    store: ScoreStore,
    registry: ProviderRegistry,
    evaluator: Evaluator,
    overload: OverloadTracker,
    calibration: ScoreCalibration,
    trials_per_task: usize,
    tasks_per_sweep: usize,
    batch_override: Option<DateTime<Utc>>,
    canary_enabled: bool,
}

impl Engine {
    pub fn new(
        store: ScoreStore,
        registry: ProviderRegistry,
        evaluator: Evaluator,
        config: &Config,
    ) -> Self {
        Self {
            store,
            registry,
            evaluator,
            overload: OverloadTracker::new(),
            calibration: config.calibration,
            trials_per_task: config.trials_per_task,
            tasks_per_sweep: config.tasks_per_sweep,
            batch_override: config.batch_timestamp_override,
            canary_enabled: config.canary_enabled,
        }
    }

    pub fn store(&self) -> &ScoreStore {
        &self.store
    }

    /// Run one full sweep of the hourly suite.
    pub async fn run_sweep(self: &Arc<Self>) -> Result<SweepSummary> {
        let batch = BatchContext::new(self.batch_override.unwrap_or_else(Utc::now));
        info!("sweep {} starting", batch.ts_str);

        let models = self.store.ranked_models()?;
        if models.is_empty() {
            info!("sweep {}: no whitelisted models, nothing to do", batch.ts_str);
            return Ok(SweepSummary {
                batch_ts: batch.ts_str,
                ..Default::default()
            });
        }

        let mut by_vendor: HashMap<Vendor, Vec<ModelRecord>> = HashMap::new();
        for model in models {
            by_vendor.entry(model.vendor).or_default().push(model);
        }

        // One task per provider; models inside a provider run sequentially
        // to respect per-vendor rate limits.
        let mut handles = Vec::new();
        for (vendor, vendor_models) in by_vendor {
            let engine = Arc::clone(self);
            let batch = batch.clone();
            handles.push(tokio::spawn(async move {
                let mut summary = SweepSummary::default();
                let mut retry_queue = Vec::new();
                for model in vendor_models {
                    match engine.benchmark_model(&model, &batch, false).await {
                        Ok(ModelOutcome::Scored) => summary.scored += 1,
                        Ok(ModelOutcome::SentinelWritten) => summary.sentinels += 1,
                        Ok(ModelOutcome::Skipped) => summary.skipped += 1,
                        Ok(ModelOutcome::CanaryRetryable) => retry_queue.push(model),
                        Err(e) => {
                            error!("{vendor:?}: benchmark error: {e:#}");
                            summary.failed += 1;
                        }
                    }
                }
                (summary, retry_queue)
            }));
        }

        let mut summary = SweepSummary {
            batch_ts: batch.ts_str.clone(),
            ..Default::default()
        };
        let mut retry_models = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((partial, retries)) => {
                    summary.scored += partial.scored;
                    summary.sentinels += partial.sentinels;
                    summary.skipped += partial.skipped;
                    summary.failed += partial.failed;
                    retry_models.extend(retries);
                }
                Err(e) => {
                    error!("provider task panicked: {e}");
                    summary.failed += 1;
                }
            }
        }

        // Second pass for models whose canary failed transiently.
        for model in retry_models {
            match self.benchmark_model(&model, &batch, true).await {
                Ok(ModelOutcome::Scored) => summary.scored += 1,
                Ok(ModelOutcome::SentinelWritten) => summary.sentinels += 1,
                Ok(ModelOutcome::Skipped) => summary.skipped += 1,
                Ok(ModelOutcome::CanaryRetryable) => {
                    warn!("{}: canary still failing after relaxed retry", model.name);
                    summary.failed += 1;
                }
                Err(e) => {
                    error!("{}: benchmark error on retry: {e:#}", model.name);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "sweep {} done: {} scored, {} sentinels, {} skipped, {} failed",
            summary.batch_ts, summary.scored, summary.sentinels, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    async fn benchmark_model(
        &self,
        model: &ModelRecord,
        batch: &BatchContext,
        relaxed_canary: bool,
    ) -> Result<ModelOutcome> {
        let Some(adapter) = self.registry.adapter(model.vendor) else {
            // Provider not configured: persist the sentinel only on the very
            // first sweep, otherwise leave the last valid score intact.
            if !self.store.has_any_row(model.id, Suite::Hourly)? {
                self.store.insert_score(&NewScore::sentinel(
                    model.id,
                    batch.ts,
                    Suite::Hourly,
                    SENTINEL_NO_PROVIDER,
                    format!("provider {} not configured", model.vendor.as_str()),
                ))?;
                return Ok(ModelOutcome::SentinelWritten);
            }
            info!(
                "{}: provider {} not configured, keeping last score",
                model.name,
                model.vendor.as_str()
            );
            return Ok(ModelOutcome::Skipped);
        };

        if let Some((until, reason)) = self.overload.skip_status(&model.name, batch.ts) {
            info!("{}: in overload skip window until {until} ({reason})", model.name);
            return Ok(ModelOutcome::Skipped);
        }

        if self.canary_enabled {
            match self.run_canary(&adapter, model, relaxed_canary).await {
                Ok(()) => {}
                Err(err) if err.is_retryable() => {
                    warn!("{}: canary retryable failure: {err}", model.name);
                    return Ok(ModelOutcome::CanaryRetryable);
                }
                Err(err) => {
                    warn!("{}: canary failed: {err}", model.name);
                    self.store.insert_score(&NewScore::sentinel(
                        model.id,
                        batch.ts,
                        Suite::Hourly,
                        SENTINEL_CANARY_FAILED,
                        format!("canary failed: {err}"),
                    ))?;
                    return Ok(ModelOutcome::SentinelWritten);
                }
            }
        }

        let selected = batch.select_tasks(self.tasks_per_sweep);
        let selected_count = selected.len();

        // Phase 1.
        let mut records: Vec<TaskRecord> = Vec::new();
        let mut failed_tasks: Vec<&'static TaskDef> = Vec::new();
        let standard = TrialConfig::standard(self.trials_per_task);
        for task in selected {
            let run = trials::run_task(
                &adapter,
                self.registry.keys(),
                &self.evaluator,
                model,
                task,
                &batch.ts_str,
                &standard,
            )
            .await;
            self.note_overloads(&model.name, run.overload_failures, batch.ts);
            match run.record {
                Some(record) => records.push(record),
                None => failed_tasks.push(task),
            }
        }

        // Phase 2: one relaxed retry per failed task.
        if !failed_tasks.is_empty() {
            let relaxed = TrialConfig {
                trials: 2,
                max_tokens: (FAIR_MAX_TOKENS * 4).min(RELAXED_MAX_TOKENS),
                relaxed: true,
            };
            let mut still_failed = Vec::new();
            for task in failed_tasks {
                let run = trials::run_task(
                    &adapter,
                    self.registry.keys(),
                    &self.evaluator,
                    model,
                    task,
                    &batch.ts_str,
                    &relaxed,
                )
                .await;
                self.note_overloads(&model.name, run.overload_failures, batch.ts);
                match run.record {
                    Some(record) => records.push(record),
                    None => still_failed.push(task.slug),
                }
            }
            if !still_failed.is_empty() {
                info!("{}: tasks still failing: {:?}", model.name, still_failed);
            }
        }

        if records.is_empty() {
            self.store.insert_score(&NewScore::sentinel(
                model.id,
                batch.ts,
                Suite::Hourly,
                SENTINEL_ALL_TASKS_FAILED,
                "All benchmark tasks failed",
            ))?;
            return Ok(ModelOutcome::SentinelWritten);
        }

        self.persist_model_score(model, batch, records, selected_count)?;
        self.overload.clear(&model.name);
        Ok(ModelOutcome::Scored)
    }

    fn note_overloads(&self, model_name: &str, failures: u32, now: DateTime<Utc>) {
        for _ in 0..failures {
            self.overload.record_overload(model_name, "provider overloaded", now);
        }
    }

    /// Tiny adapter-validation call. Fairness rules do not apply here; the
    /// canary is adapter validation, not a benchmark trial.
    async fn run_canary(
        &self,
        adapter: &Arc<dyn ProviderAdapter>,
        model: &ModelRecord,
        relaxed: bool,
    ) -> Result<(), ProviderError> {
        let key = self
            .registry
            .keys()
            .key_for_trial(model.vendor, 0)
            .ok_or_else(|| ProviderError::Fatal {
                status: None,
                message: "no api key".to_string(),
            })?;
        let request = ChatRequest {
            model: model.name.clone(),
            messages: vec![ChatMessage::user("Reply with the single word OK.")],
            temperature: FAIR_TEMPERATURE,
            max_tokens: if relaxed { 64 } else { 16 },
        };
        let label = format!("canary/{}", model.name);
        backoff::with_backoff(&label, |_| adapter.chat(key, &request))
            .await
            .map(|_| ())
    }

    fn persist_model_score(
        &self,
        model: &ModelRecord,
        batch: &BatchContext,
        mut records: Vec<TaskRecord>,
        selected_count: usize,
    ) -> Result<()> {
        // Efficiency from throughput, bounded away from the extremes.
        for record in &mut records {
            let throughput = record.tokens_out / record.latency_ms.max(1.0);
            let raw = ((throughput + 1e-6).log10() + 3.0).clamp(0.0, 3.0) / 3.0;
            record.axes.efficiency = raw.clamp(0.1, 0.9);
        }

        // Cross-task aggregation.
        let mut axes = AxisVector::zero();
        for key in crate::models::AXIS_KEYS {
            let values: Vec<f64> = records
                .iter()
                .filter_map(|r| r.axes.get(key))
                .collect();
            axes.set(key, stats::mean(&values));
        }
        let cross_correctness: Vec<f64> = records.iter().map(|r| r.axes.correctness).collect();
        let within_mean = stats::mean(
            &records.iter().map(|r| r.within_stability).collect::<Vec<f64>>(),
        );
        axes.stability = 0.7 * (1.0 - stats::std_dev(&cross_correctness) / 0.25).clamp(0.0, 1.0)
            + 0.3 * within_mean.clamp(0.3, 0.95);

        // Baseline over recent history.
        let history = self
            .store
            .recent_valid_scores(model.id, Suite::Hourly, BASELINE_WINDOW)?;
        let calibrating = history.len() < CALIBRATING_THRESHOLD;
        let baseline = if calibrating {
            None
        } else {
            Some(axis_baseline(&history))
        };

        let successful_tasks = records.len();
        let task_success_rate = successful_tasks as f64 / selected_count.max(1) as f64;
        let inputs = scoring::ScoreInputs {
            axes: &axes,
            baseline: baseline.as_ref(),
            successful_tasks,
            task_success_rate,
            calibrating,
        };
        let final_score = scoring::calculate_score(&inputs, &self.calibration);

        // Confidence interval from the per-task score distribution.
        let task_scores: Vec<f64> = records.iter().map(|r| weighted_score(&r.axes)).collect();
        let confidence = stats::confidence_interval(&task_scores);
        let model_variance = {
            let sd = stats::std_dev(&task_scores);
            sd * sd
        };

        // Drift bookkeeping over the recent series plus this score.
        let mut series: Vec<f64> = history
            .iter()
            .take(DRIFT_WINDOW - 1)
            .map(|r| r.stupid_score)
            .collect();
        series.reverse();
        series.push(final_score);
        let cusum = stats::downward_cusum(&series);
        let drifting =
            stats::page_hinkley_triggered(&series, PAGE_HINKLEY_DELTA, PAGE_HINKLEY_LAMBDA);
        if drifting {
            warn!(
                "{}: Page-Hinkley drift signal over last {} scores",
                model.name,
                series.len()
            );
        }

        let mut note_parts = Vec::new();
        if calibrating {
            note_parts.push(format!(
                "calibrating ({}/{CALIBRATING_THRESHOLD} samples)",
                history.len()
            ));
        }
        note_parts.push(format!("tasks {successful_tasks}/{selected_count}"));
        if drifting {
            note_parts.push("drift suspected".to_string());
        }

        self.store.insert_score(&NewScore {
            model_id: model.id,
            ts: batch.ts,
            suite: Suite::Hourly,
            stupid_score: final_score,
            axes,
            cusum,
            note: Some(note_parts.join("; ")),
            confidence_lower: Some(confidence.lower),
            confidence_upper: Some(confidence.upper),
            standard_error: Some(confidence.standard_error),
            sample_size: Some(successful_tasks as i64),
            model_variance: Some(model_variance),
            synthetic: false,
        })?;

        for record in &records {
            if let Err(e) = self.store.insert_run(&NewRun {
                model_id: model.id,
                task_slug: record.slug.to_string(),
                ts: batch.ts,
                temp: FAIR_TEMPERATURE,
                seed: batch.seed as i64,
                tokens_in: record.tokens_in as i64,
                tokens_out: record.tokens_out as i64,
                latency_ms: record.latency_ms as i64,
                attempts: record.attempts,
                passed: record.axes.correctness >= 0.999,
                artifacts: Some(json!({
                    "successful_trials": record.successful_trials,
                    "within_stability": record.within_stability,
                })),
                axes: record.axes,
            }) {
                // A lost run row is an audit gap, not a sweep failure.
                warn!("{}: run insert failed for {}: {e:#}", model.name, record.slug);
            }
        }

        info!(
            "{}: scored {final_score:.1} ({successful_tasks}/{selected_count} tasks, calibrating={calibrating})",
            model.name
        );
        Ok(())
    }
}

/// Weighted axis sum on the 0..100 scale, used for per-task confidence.
fn weighted_score(axes: &AxisVector) -> f64 {
    AXIS_WEIGHTS
        .iter()
        .map(|(key, w)| w * axes.get(key).unwrap_or(0.0))
        .sum::<f64>()
        * 100.0
}

fn axis_baseline(history: &[crate::models::ScoreRow]) -> AxisBaseline {
    let mut mean = AxisVector::zero();
    let mut std = AxisVector::zero();
    for key in crate::models::AXIS_KEYS {
        let values: Vec<f64> = history.iter().filter_map(|r| r.axes.get(key)).collect();
        mean.set(key, stats::mean(&values));
        std.set(key, stats::std_dev(&values).max(1e-6));
    }
    AxisBaseline {
        mean,
        std,
        samples: history.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_selection_is_deterministic_per_batch() {
        let ts = "2026-08-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let a = BatchContext::new(ts);
        let b = BatchContext::new(ts);
        let slugs = |ctx: &BatchContext| -> Vec<&str> {
            ctx.select_tasks(7).iter().map(|t| t.slug).collect()
        };
        assert_eq!(slugs(&a), slugs(&b));
        assert_eq!(slugs(&a).len(), 7);

        let other = BatchContext::new(ts + chrono::Duration::hours(1));
        // Different batches reshuffle (almost surely a different order).
        assert_ne!(slugs(&a), slugs(&other));
    }

    #[test]
    fn weighted_score_of_perfect_axes_is_100() {
        let mut axes = AxisVector::zero();
        for key in crate::models::AXIS_KEYS {
            axes.set(key, 1.0);
        }
        assert!((weighted_score(&axes) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn batch_context_strips_subsecond_precision() {
        let ts = "2026-08-01T10:00:00.123456Z".parse::<DateTime<Utc>>().unwrap();
        let batch = BatchContext::new(ts);
        assert_eq!(batch.ts_str, "2026-08-01T10:00:00Z");
    }
}
