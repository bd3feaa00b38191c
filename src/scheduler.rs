//! Scheduled duties: the hourly benchmark sweep at the top of the hour and
//! drift-signature precomputation at five past. Both loops stop on the
//! shutdown signal; an in-flight sweep drains to completion first.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bench::Engine;
use crate::drift::{self, DriftCache};

/// Minute offset of the drift precompute duty.
const DRIFT_MINUTE: i64 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub next_scheduled_run: Option<DateTime<Utc>>,
    pub minutes_until_next: Option<i64>,
    pub last_batch: Option<String>,
}

#[derive(Default)]
struct State {
    is_running: bool,
    next_run: Option<DateTime<Utc>>,
    last_batch: Option<String>,
}

pub struct Scheduler {
    engine: Arc<Engine>,
    drift_cache: Arc<DriftCache>,
    state: Arc<Mutex<State>>,
}

/// Next exact top of the hour strictly after `now`.
fn next_top_of_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(ChronoDuration::hours(1))
        .unwrap_or(now)
        + ChronoDuration::hours(1)
}

/// Next `:05` strictly after `now`.
fn next_drift_slot(now: DateTime<Utc>) -> DateTime<Utc> {
    let hour = now.duration_trunc(ChronoDuration::hours(1)).unwrap_or(now);
    let slot = hour + ChronoDuration::minutes(DRIFT_MINUTE);
    if slot > now {
        slot
    } else {
        slot + ChronoDuration::hours(1)
    }
}

async fn sleep_until(target: DateTime<Utc>) {
    let wait = (target - Utc::now()).to_std().unwrap_or_default();
    tokio::time::sleep(wait).await;
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, drift_cache: Arc<DriftCache>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            drift_cache,
            state: Arc::new(Mutex::new(State::default())),
        })
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock();
        let minutes = state
            .next_run
            .map(|next| ((next - Utc::now()).num_seconds().max(0) + 59) / 60);
        SchedulerStatus {
            is_running: state.is_running,
            next_scheduled_run: state.next_run,
            minutes_until_next: minutes,
            last_batch: state.last_batch.clone(),
        }
    }

    /// Spawn the sweep and drift loops. Each drains its current duty before
    /// honouring shutdown.
    pub fn spawn(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_sweep_loop(shutdown.subscribe()),
            self.spawn_drift_loop(shutdown.subscribe()),
        ]
    }

    fn spawn_sweep_loop(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            info!("sweep scheduler started");
            loop {
                let next = next_top_of_hour(Utc::now());
                scheduler.state.lock().next_run = Some(next);
                tokio::select! {
                    _ = sleep_until(next) => {
                        scheduler.state.lock().is_running = true;
                        match scheduler.engine.run_sweep().await {
                            Ok(summary) => {
                                scheduler.state.lock().last_batch = Some(summary.batch_ts);
                            }
                            Err(e) => error!("scheduled sweep failed: {e:#}"),
                        }
                        scheduler.state.lock().is_running = false;
                    }
                    _ = shutdown.recv() => {
                        info!("sweep scheduler stopping");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_drift_loop(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            info!("drift precompute scheduler started");
            loop {
                let next = next_drift_slot(Utc::now());
                tokio::select! {
                    _ = sleep_until(next) => {
                        let store = scheduler.engine.store().clone();
                        let cache = Arc::clone(&scheduler.drift_cache);
                        match drift::precompute_all(&store, &cache, Utc::now()) {
                            Ok(summary) => info!(
                                "drift precompute: {} signatures, {} skipped, {} change points",
                                summary.signatures, summary.skipped, summary.change_points
                            ),
                            Err(e) => error!("drift precompute failed: {e:#}"),
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("drift scheduler stopping");
                        break;
                    }
                }
            }
        })
    }
}
