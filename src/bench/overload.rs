//! Persistent-overload skip list.
//!
//! Only rate-limit/overload failures (429, 503, "overloaded") count. Three
//! consecutive hits put the model on an exponentially growing skip window;
//! any successful run clears it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

const TRIGGER_FAILURES: u32 = 3;
const MAX_SKIP_MINUTES: i64 = 60;

#[derive(Debug, Clone)]
struct Entry {
    consecutive_failures: u32,
    skip_until: Option<DateTime<Utc>>,
    reason: String,
}

/// Process-wide tracker keyed by model name.
#[derive(Default)]
pub struct OverloadTracker {
    entries: Mutex<HashMap<String, Entry>>,
}

impl OverloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an overload-class failure. Returns the skip deadline if the
    /// model just entered (or extended) its skip window.
    pub fn record_overload(
        &self,
        model: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(model.to_string()).or_insert(Entry {
            consecutive_failures: 0,
            skip_until: None,
            reason: String::new(),
        });
        entry.consecutive_failures += 1;
        entry.reason = reason.to_string();

        if entry.consecutive_failures >= TRIGGER_FAILURES {
            // 3 failures -> 10 min, doubling per further failure, 60 min cap.
            let exponent = entry.consecutive_failures.saturating_sub(2).min(16);
            let minutes = (5i64 << exponent).min(MAX_SKIP_MINUTES);
            let until = now + Duration::minutes(minutes);
            entry.skip_until = Some(until);
            warn!(
                "{model}: {} consecutive overloads, skipping for {minutes} min ({reason})",
                entry.consecutive_failures
            );
            Some(until)
        } else {
            None
        }
    }

    /// Reason and deadline when the model is inside its skip window.
    pub fn skip_status(&self, model: &str, now: DateTime<Utc>) -> Option<(DateTime<Utc>, String)> {
        let entries = self.entries.lock();
        let entry = entries.get(model)?;
        match entry.skip_until {
            Some(until) if until > now => Some((until, entry.reason.clone())),
            _ => None,
        }
    }

    /// A successful run clears the tracker for this model.
    pub fn clear(&self, model: &str) {
        if self.entries.lock().remove(model).is_some() {
            info!("{model}: overload tracker cleared");
        }
    }

    pub fn tracked_models(&self) -> Vec<(String, u32)> {
        self.entries
            .lock()
            .iter()
            .map(|(name, e)| (name.clone(), e.consecutive_failures))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_failures_do_not_skip() {
        let tracker = OverloadTracker::new();
        let now = Utc::now();
        assert!(tracker.record_overload("m", "429", now).is_none());
        assert!(tracker.record_overload("m", "429", now).is_none());
        assert!(tracker.skip_status("m", now).is_none());
    }

    #[test]
    fn third_failure_skips_ten_minutes() {
        let tracker = OverloadTracker::new();
        let now = Utc::now();
        tracker.record_overload("m", "429", now);
        tracker.record_overload("m", "429", now);
        let until = tracker.record_overload("m", "overloaded", now).unwrap();
        assert_eq!(until - now, Duration::minutes(10));
        let (deadline, reason) = tracker.skip_status("m", now).unwrap();
        assert_eq!(deadline, until);
        assert_eq!(reason, "overloaded");
        // Window expires on its own.
        assert!(tracker.skip_status("m", now + Duration::minutes(11)).is_none());
    }

    #[test]
    fn window_doubles_then_caps() {
        let tracker = OverloadTracker::new();
        let now = Utc::now();
        for _ in 0..3 {
            tracker.record_overload("m", "503", now);
        }
        let fourth = tracker.record_overload("m", "503", now).unwrap();
        assert_eq!(fourth - now, Duration::minutes(20));
        let fifth = tracker.record_overload("m", "503", now).unwrap();
        assert_eq!(fifth - now, Duration::minutes(40));
        let sixth = tracker.record_overload("m", "503", now).unwrap();
        assert_eq!(sixth - now, Duration::minutes(60));
        let seventh = tracker.record_overload("m", "503", now).unwrap();
        assert_eq!(seventh - now, Duration::minutes(60));
    }

    #[test]
    fn success_clears() {
        let tracker = OverloadTracker::new();
        let now = Utc::now();
        for _ in 0..4 {
            tracker.record_overload("m", "429", now);
        }
        assert!(tracker.skip_status("m", now).is_some());
        tracker.clear("m");
        assert!(tracker.skip_status("m", now).is_none());
        // Counting restarts from zero.
        assert!(tracker.record_overload("m", "429", now).is_none());
    }
}
