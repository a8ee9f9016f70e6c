//! Sweep throttling
//!
//! Expired-document sweeps run inline whenever a collection handle is
//! fetched, debounced per tenant database. This is not a scheduler: nothing
//! sweeps a database nobody is touching.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Per-key debounce deciding when a sweep is due.
///
/// A sweep runs on the first fetch for a key, whenever the configured
/// interval is zero or negative, and once the interval has elapsed since the
/// last run. The run timestamp is only stamped when the sweep is due.
#[derive(Debug, Default)]
pub struct SweepTracker {
    last_run: DashMap<String, DateTime<Utc>>,
}

impl SweepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return true when a sweep should execute for `key`, recording `now` as
    /// the latest run if so.
    pub fn should_run(&self, key: &str, now: DateTime<Utc>, interval_seconds: i64) -> bool {
        let interval = Duration::seconds(interval_seconds.max(0));
        if interval <= Duration::zero() {
            self.last_run.insert(key.to_string(), now);
            return true;
        }

        match self.last_run.get(key).map(|entry| *entry.value()) {
            None => {
                self.last_run.insert(key.to_string(), now);
                true
            }
            Some(last) if now - last >= interval => {
                self.last_run.insert(key.to_string(), now);
                true
            }
            Some(_) => false,
        }
    }

    /// Drop all recorded run timestamps
    pub fn clear(&self) {
        self.last_run.clear();
    }
}
