//! Recognized store options and their defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DAY: u64 = 24 * 60 * 60;

/// Options for one filesystem cache store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StoreParams {
    /// Store root directory.
    pub path: Option<PathBuf>,

    /// Disable all writes.
    pub read_only: bool,

    /// Refresh modification times on every read.
    pub touch: bool,

    /// Allow removals flagged as transient.
    pub purge_transient: bool,

    /// Days without access before the janitor deletes a file (default: 15).
    pub unused_file_age: u32,

    /// Attachment budget for packages of records with several values, in KiB (default: 256).
    #[serde(rename = "MaxRecordSizeKB")]
    pub max_record_size_kb: u64,

    /// Inline budget for single-value packages, in KiB (default: 1024).
    #[serde(rename = "MaxValueSizeKB")]
    pub max_value_size_kb: u64,

    /// Delete the whole store at construction (ignored when read-only).
    pub flush: bool,

    /// Run one unthrottled janitor pass before construction returns.
    pub clean: bool,

    /// Run the janitor (default: true).
    pub delete_unused: bool,

    /// Janitor file checks per second (unset: unlimited).
    pub max_file_checks_per_sec: Option<u32>,

    /// Directories the janitor scans per root per pass (unset: unlimited).
    pub folders_to_clean: Option<u32>,

    /// Latency in milliseconds at or above which the store is slow (default: 50).
    pub consider_slow_at: f64,

    /// Latency in milliseconds at or below which the store is fast (default: 10).
    pub consider_fast_at: f64,

    /// Skip the startup speed test and assume a local disk.
    pub skip_speed_test: bool,

    /// The store is a pass-through shared cache; disables miss telemetry.
    pub shared: bool,

    /// File that receives every relative path read or written.
    pub access_log: Option<PathBuf>,

    /// Seconds the janitor waits after construction (default: 60).
    pub time_to_wait_after_init: u64,

    /// Seconds between janitor passes (default: 3600). Above a year the
    /// janitor runs once.
    pub scan_frequency: u64,
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            touch: false,
            purge_transient: false,
            unused_file_age: 15,
            max_record_size_kb: 256,
            max_value_size_kb: 1024,
            flush: false,
            clean: false,
            delete_unused: true,
            max_file_checks_per_sec: None,
            folders_to_clean: None,
            consider_slow_at: 50.0,
            consider_fast_at: 10.0,
            skip_speed_test: false,
            shared: false,
            access_log: None,
            time_to_wait_after_init: 60,
            scan_frequency: 60 * 60,
        }
    }
}

impl StoreParams {
    pub fn unused_file_age(&self) -> Duration {
        Duration::from_secs(u64::from(self.unused_file_age) * DAY)
    }

    pub fn max_record_size(&self) -> u64 {
        self.max_record_size_kb.saturating_mul(1024)
    }

    pub fn max_value_size(&self) -> u64 {
        self.max_value_size_kb.saturating_mul(1024)
    }

    pub fn time_to_wait_after_init(&self) -> Duration {
        Duration::from_secs(self.time_to_wait_after_init)
    }

    pub fn scan_frequency(&self) -> Duration {
        Duration::from_secs(self.scan_frequency)
    }

    /// Builder-style setter for the store root.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Disable the speed test and the janitor, for tests and one-shot tools.
    pub fn quiet(mut self) -> Self {
        self.skip_speed_test = true;
        self.delete_unused = false;
        self
    }
}
