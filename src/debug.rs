//! Debug hooks that make the store report misses on purpose.
//!
//! A simulated miss applies to both reads and writes of a key, so a key
//! that missed once keeps missing for the lifetime of the options and is
//! never written.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use globset::{Glob, GlobSet, GlobSetBuilder};
use rand::Rng;

use crate::error::{StoreError, StoreResult};

/// Predicate deciding whether a key should miss.
pub type MissPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Options for simulating cache misses.
#[derive(Default)]
pub struct DebugOptions {
    /// Percentage of keys (0-100) that miss at random.
    miss_rate: u32,
    /// Buckets whose keys always miss.
    miss_buckets: Option<GlobSet>,
    /// Custom predicate over the key text.
    predicate: Option<MissPredicate>,
    /// Keys that already missed.
    missed: Mutex<HashSet<String>>,
}

impl DebugOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Miss `rate` percent of keys at random.
    pub fn with_miss_rate(mut self, rate: u32) -> Self {
        self.miss_rate = rate.min(100);
        self
    }

    /// Miss every key in a bucket matching one of the glob `patterns`.
    pub fn with_miss_buckets<I, S>(mut self, patterns: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern.as_ref()).map_err(|e| {
                StoreError::Configuration(format!("invalid bucket pattern '{}': {e}", pattern.as_ref()))
            })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| StoreError::Configuration(format!("invalid bucket patterns: {e}")))?;
        self.miss_buckets = Some(set);
        Ok(self)
    }

    pub fn with_predicate(mut self, predicate: MissPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// True when nothing would ever be simulated.
    pub fn is_inert(&self) -> bool {
        self.miss_rate == 0 && self.miss_buckets.is_none() && self.predicate.is_none()
    }

    /// Decide whether `key` should miss. Decisions to miss are remembered.
    pub fn should_simulate_miss(&self, key: &str, bucket: Option<&str>) -> bool {
        if self.is_inert() {
            return false;
        }
        let Ok(mut missed) = self.missed.lock() else {
            return false;
        };
        if missed.contains(key) {
            return true;
        }

        let bucket_match = match (&self.miss_buckets, bucket) {
            (Some(set), Some(bucket)) => set.is_match(bucket),
            _ => false,
        };
        let miss = bucket_match
            || self.predicate.as_ref().map_or(false, |predicate| predicate(key))
            || (self.miss_rate > 0 && rand::thread_rng().gen_range(0..100) < self.miss_rate);

        if miss {
            missed.insert(key.to_string());
        }
        miss
    }
}

impl fmt::Debug for DebugOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugOptions")
            .field("miss_rate", &self.miss_rate)
            .field("miss_buckets", &self.miss_buckets.is_some())
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
