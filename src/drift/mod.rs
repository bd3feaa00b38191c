//! Drift analysis over the score log: signatures, change points, and the
//! synthetic-score fallback.

pub mod change_points;
pub mod signature;
pub mod synthetic;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use chrono::{DateTime, Utc};

use crate::store::ScoreStore;
use signature::DriftSignature;

/// Base TTL of a cached signature.
const BASE_TTL_SECS: u64 = 3600;
/// Per-model smear added to the TTL so hourly precompute does not stampede.
const SMEAR_MODULUS: u64 = 300;

/// Read-through signature cache with per-key TTL. Writes are idempotent;
/// a stale entry is simply recomputed by the next reader.
#[derive(Default)]
pub struct DriftCache {
    entries: Mutex<HashMap<i64, CachedSignature>>,
}

struct CachedSignature {
    signature: DriftSignature,
    expires_at: Instant,
}

/// Cache lookup disposition, surfaced as the `X-Cache` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

fn ttl_for(model_id: i64) -> Duration {
    Duration::from_secs(BASE_TTL_SECS + (model_id as u64) % SMEAR_MODULUS)
}

impl DriftCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model_id: i64) -> Option<DriftSignature> {
        let entries = self.entries.lock();
        entries
            .get(&model_id)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.signature.clone())
    }

    pub fn put(&self, model_id: i64, signature: DriftSignature) {
        let mut entries = self.entries.lock();
        entries.insert(
            model_id,
            CachedSignature {
                signature,
                expires_at: Instant::now() + ttl_for(model_id),
            },
        );
        debug!("drift cache: stored signature for model {model_id}");
    }

    pub fn invalidate(&self, model_id: i64) {
        self.entries.lock().remove(&model_id);
    }

    /// Cached entry count and how many of those are still fresh.
    pub fn stats(&self) -> (usize, usize) {
        let entries = self.entries.lock();
        let now = Instant::now();
        let fresh = entries.values().filter(|e| e.expires_at > now).count();
        (entries.len(), fresh)
    }
}

/// Outcome of a precompute pass over the whitelisted models.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PrecomputeSummary {
    pub signatures: usize,
    pub skipped: usize,
    pub change_points: usize,
}

/// Refresh the signature cache and persist newly detected change points for
/// every whitelisted model. Models with too little history are skipped.
pub fn precompute_all(
    store: &ScoreStore,
    cache: &DriftCache,
    now: DateTime<Utc>,
) -> anyhow::Result<PrecomputeSummary> {
    let mut summary = PrecomputeSummary::default();
    for model in store.ranked_models()? {
        match signature::compute(store, model.id, now) {
            Ok(Some(sig)) => {
                store.save_drift_signature(model.id, &serde_json::to_value(&sig)?)?;
                cache.put(model.id, sig);
                summary.signatures += 1;
            }
            Ok(None) => summary.skipped += 1,
            Err(e) => {
                tracing::warn!("{}: drift signature failed: {e:#}", model.name);
                summary.skipped += 1;
            }
        }
        match change_points::detect(store, model.id, now) {
            Ok(inserted) => summary.change_points += inserted,
            Err(e) => tracing::warn!("{}: change-point detection failed: {e:#}", model.name),
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewScore;
    use crate::models::{AxisVector, Suite};
    use crate::store::ScoreStore;
    use chrono::Utc;

    fn sample_signature(store: &ScoreStore, model_id: i64) -> DriftSignature {
        let now = Utc::now();
        for i in 0..6 {
            let mut axes = AxisVector::zero();
            axes.correctness = 0.8;
            store
                .insert_score(&NewScore {
                    model_id,
                    ts: now - chrono::Duration::hours(6 - i),
                    suite: Suite::Hourly,
                    stupid_score: 80.0,
                    axes,
                    cusum: 0.0,
                    note: None,
                    confidence_lower: None,
                    confidence_upper: None,
                    standard_error: None,
                    sample_size: Some(7),
                    model_variance: None,
                    synthetic: false,
                })
                .unwrap();
        }
        signature::compute(store, model_id, now).unwrap().unwrap()
    }

    #[test]
    fn cache_round_trip() {
        let store = ScoreStore::open_in_memory().unwrap();
        let model = store.ranked_models().unwrap()[0].id;
        let cache = DriftCache::new();
        assert!(cache.get(model).is_none());
        let sig = sample_signature(&store, model);
        cache.put(model, sig.clone());
        let cached = cache.get(model).unwrap();
        assert_eq!(cached.current_score, sig.current_score);
        let (total, fresh) = cache.stats();
        assert_eq!((total, fresh), (1, 1));
        cache.invalidate(model);
        assert!(cache.get(model).is_none());
    }

    #[test]
    fn ttl_smear_depends_on_model_id() {
        assert_ne!(ttl_for(1), ttl_for(2));
        assert!(ttl_for(0) >= Duration::from_secs(BASE_TTL_SECS));
    }
}
