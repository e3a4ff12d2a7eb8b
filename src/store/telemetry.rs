//! Estimated build time from misses followed by puts.
//!
//! The first miss of a key starts a clock; a later put of the same key adds
//! the elapsed time to a running total. Once the total passes
//! [`NOTIFY_THRESHOLD`] a notification is logged and the total restarts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::info;

pub(crate) const NOTIFY_THRESHOLD: Duration = Duration::from_secs(20);

#[derive(Debug, Default)]
struct MissState {
    first_miss: HashMap<String, Instant>,
    estimated_build_time: Duration,
}

#[derive(Debug)]
pub(crate) struct MissTelemetry {
    enabled: bool,
    state: Mutex<MissState>,
}

impl MissTelemetry {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Mutex::new(MissState::default()),
        }
    }

    pub(crate) fn record_miss(&self, key: &str) {
        self.record_miss_at(key, Instant::now());
    }

    /// Returns the accumulated build time when it triggered a notification.
    pub(crate) fn record_put(&self, key: &str, root: &Path) -> Option<Duration> {
        self.record_put_at(key, root, Instant::now())
    }

    fn record_miss_at(&self, key: &str, at: Instant) {
        if !self.enabled {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            state.first_miss.entry(key.to_string()).or_insert(at);
        }
    }

    fn record_put_at(&self, key: &str, root: &Path, at: Instant) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        let mut state = self.state.lock().ok()?;
        let missed_at = state.first_miss.remove(key)?;
        state.estimated_build_time += at.saturating_duration_since(missed_at);
        if state.estimated_build_time <= NOTIFY_THRESHOLD {
            return None;
        }

        let total = std::mem::take(&mut state.estimated_build_time);
        info!(
            root = %root.display(),
            estimated_build_secs = total.as_secs_f64(),
            "time spent building data that missed the cache exceeds the notification threshold"
        );
        Some(total)
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.state.lock().map(|state| state.first_miss.len()).unwrap_or(0)
    }
}
