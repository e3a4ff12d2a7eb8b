//! Background maintainer that evicts files nobody has used recently.
//!
//! One thread per store. Each pass walks the store's shard directories in a
//! shuffled order (see [`scan`]) and deletes files whose modification time is
//! older than [`JanitorParams::max_file_age`]. Between passes the thread
//! sleeps for [`JanitorParams::scan_frequency`]; a boost or shutdown wakes it
//! early. Scan state never leaves the janitor thread; foreground callers only
//! see the flags and events in [`Control`].

mod event;
mod random;
mod scan;

pub use event::Event;
pub use random::{RandomOrder, RandomStream};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::StoreParams;
use crate::fs::FileSystem;

use scan::Scanner;

/// Scan frequencies above this run a single pass and stop.
const RUN_ONCE_THRESHOLD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Janitor tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JanitorParams {
    /// Files not modified for longer than this are deleted.
    pub max_file_age: Duration,
    /// File and directory checks per second; 0 or `u32::MAX` is unlimited.
    pub max_scan_rate: u32,
    /// Leaf directories scanned per root per pass.
    pub max_directory_scan_count: u32,
    /// Time between the starts of two passes.
    pub scan_frequency: Duration,
    /// Delay before the first pass.
    pub time_to_wait_after_init: Duration,
}

impl Default for JanitorParams {
    fn default() -> Self {
        Self {
            max_file_age: Duration::from_secs(15 * 24 * 60 * 60),
            max_scan_rate: u32::MAX,
            max_directory_scan_count: u32::MAX,
            scan_frequency: Duration::from_secs(60 * 60),
            time_to_wait_after_init: Duration::from_secs(60),
        }
    }
}

impl JanitorParams {
    pub fn from_store_params(params: &StoreParams) -> Self {
        Self {
            max_file_age: params.unused_file_age(),
            max_scan_rate: params.max_file_checks_per_sec.unwrap_or(u32::MAX),
            max_directory_scan_count: params.folders_to_clean.unwrap_or(u32::MAX),
            scan_frequency: params.scan_frequency(),
            time_to_wait_after_init: params.time_to_wait_after_init(),
        }
    }

    /// True when the janitor should stop after its first pass.
    pub fn runs_once(&self) -> bool {
        self.scan_frequency > RUN_ONCE_THRESHOLD
    }
}

/// Outcome of one janitor pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_millis", rename = "duration_ms")]
    pub duration: Duration,
    pub scanned_directories: u64,
    pub checked_files: u64,
    pub deleted_files: u64,
    pub deleted_bytes: u64,
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

impl ScanSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration: Duration::ZERO,
            scanned_directories: 0,
            checked_files: 0,
            deleted_files: 0,
            deleted_bytes: 0,
        }
    }
}

/// State shared between the janitor thread and its owner.
#[derive(Debug)]
struct Control {
    exit: AtomicBool,
    idle: AtomicBool,
    ignore_scan_rate: AtomicBool,
    /// A boost not yet picked up by a pass. Guards the idle transitions.
    boost_pending: Mutex<bool>,
    /// Signaled while no pass is running.
    idle_event: Event,
    /// Interrupts every janitor sleep.
    wake: Event,
    last_scan: Mutex<Option<ScanSummary>>,
}

impl Control {
    fn new() -> Self {
        Self {
            exit: AtomicBool::new(false),
            idle: AtomicBool::new(false),
            ignore_scan_rate: AtomicBool::new(false),
            boost_pending: Mutex::new(false),
            idle_event: Event::manual_reset(),
            wake: Event::auto_reset(),
            last_scan: Mutex::new(None),
        }
    }

    fn exiting(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    fn boost_pending(&self) -> MutexGuard<'_, bool> {
        self.boost_pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lift the rate limit now and for the next pass to start.
    fn request_boost(&self) {
        let mut pending = self.boost_pending();
        *pending = true;
        self.ignore_scan_rate.store(true, Ordering::Release);
        self.set_idle(false);
    }

    fn begin_pass(&self) {
        let mut pending = self.boost_pending();
        if std::mem::take(&mut *pending) {
            self.ignore_scan_rate.store(true, Ordering::Release);
        }
        self.set_idle(false);
    }

    /// Returns false when a boost arrived during the pass; the janitor
    /// then stays busy and starts the boosted pass right away.
    fn finish_pass(&self) -> bool {
        let pending = self.boost_pending();
        if *pending {
            return false;
        }
        self.ignore_scan_rate.store(false, Ordering::Release);
        self.set_idle(true);
        true
    }

    fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::Release);
        if idle {
            self.idle_event.trigger();
        } else {
            self.idle_event.reset();
        }
    }
}

/// Handle to a running janitor thread. Dropping it stops and joins the
/// thread.
#[derive(Debug)]
pub struct Janitor {
    control: Arc<Control>,
    thread: Option<JoinHandle<()>>,
}

impl Janitor {
    /// Spawn the janitor for the store at `root`.
    pub fn start(fs: Arc<dyn FileSystem>, root: PathBuf, params: JanitorParams) -> std::io::Result<Self> {
        let control = Arc::new(Control::new());
        let thread = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name("ddc-janitor".to_string())
                .spawn(move || run(fs.as_ref(), root, &params, &control))?
        };
        Ok(Self {
            control,
            thread: Some(thread),
        })
    }

    /// Run one unthrottled pass on the calling thread.
    pub fn run_once(fs: &dyn FileSystem, root: &std::path::Path, params: &JanitorParams) -> ScanSummary {
        let control = Control::new();
        control.ignore_scan_rate.store(true, Ordering::Release);
        let mut stream = RandomStream::from_entropy();
        Scanner::new(fs, root, params, &control).scan(&mut stream)
    }

    pub fn is_idle(&self) -> bool {
        self.control.idle.load(Ordering::Acquire)
    }

    /// Block until no pass is running.
    pub fn wait_for_idle(&self) {
        self.control.idle_event.wait();
    }

    /// Block until no pass is running or `timeout` elapses. Returns true if
    /// the janitor is idle.
    pub fn wait_for_idle_timeout(&self, timeout: Duration) -> bool {
        self.control.idle_event.wait_timeout(timeout)
    }

    /// Lift the rate limit for the current or next pass and wake the thread
    /// if it is sleeping. A following [`Janitor::wait_for_idle`] waits for
    /// that pass to finish.
    pub fn boost_priority(&self) {
        if self.control.exiting() || self.thread.as_ref().map_or(true, JoinHandle::is_finished) {
            return;
        }
        self.control.request_boost();
        self.control.wake.trigger();
    }

    /// Summary of the most recent completed pass.
    pub fn last_scan(&self) -> Option<ScanSummary> {
        self.control
            .last_scan
            .lock()
            .map(|summary| summary.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Ask the thread to stop and wait for it.
    pub fn shutdown(&mut self) {
        self.control.exit.store(true, Ordering::Release);
        self.control.wake.trigger();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("janitor thread panicked");
            }
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(fs: &dyn FileSystem, root: PathBuf, params: &JanitorParams, control: &Control) {
    debug!(root = %root.display(), ?params, "janitor started");
    let mut stream = RandomStream::from_entropy();

    if !control.exiting() {
        control.wake.wait_timeout(params.time_to_wait_after_init);
    }

    while !control.exiting() {
        control.begin_pass();
        let started = Instant::now();

        let summary = Scanner::new(fs, &root, params, control).scan(&mut stream);
        info!(
            root = %root.display(),
            deleted_files = summary.deleted_files,
            deleted_bytes = summary.deleted_bytes,
            checked_files = summary.checked_files,
            scanned_directories = summary.scanned_directories,
            elapsed_ms = summary.duration.as_millis() as u64,
            "janitor pass complete"
        );
        match control.last_scan.lock() {
            Ok(mut last) => *last = Some(summary),
            Err(poisoned) => *poisoned.into_inner() = Some(summary),
        }

        let settled = control.finish_pass();

        if control.exiting() || params.runs_once() {
            break;
        }
        if !settled {
            // The boost's wake is consumed by the pass it asked for.
            control.wake.reset();
            continue;
        }

        // A boost or shutdown cuts the wait short.
        if let Some(remaining) = params.scan_frequency.checked_sub(started.elapsed()) {
            control.wake.wait_timeout(remaining);
        }
    }

    control.set_idle(true);
    debug!(root = %root.display(), "janitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use std::path::Path;
    use std::time::SystemTime;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn quick_params() -> JanitorParams {
        JanitorParams {
            time_to_wait_after_init: Duration::from_secs(3600),
            scan_frequency: Duration::from_secs(3600),
            ..JanitorParams::default()
        }
    }

    #[test]
    fn test_params_from_store_params() {
        let store = StoreParams {
            unused_file_age: 3,
            max_file_checks_per_sec: Some(500),
            folders_to_clean: None,
            ..StoreParams::default()
        };
        let params = JanitorParams::from_store_params(&store);
        assert_eq!(params.max_file_age, 3 * DAY);
        assert_eq!(params.max_scan_rate, 500);
        assert_eq!(params.max_directory_scan_count, u32::MAX);
        assert!(!params.runs_once());

        let yearly = JanitorParams {
            scan_frequency: RUN_ONCE_THRESHOLD + Duration::from_secs(1),
            ..params
        };
        assert!(yearly.runs_once());
    }

    #[test]
    fn test_boost_runs_pass_during_init_delay() {
        let fs = Arc::new(MemoryFileSystem::new());
        let stale = Path::new("/store/Content/12/34/old.ddc");
        fs.write(stale, b"old").unwrap();
        fs.set_modified(stale, SystemTime::now() - 30 * DAY).unwrap();

        let janitor = Janitor::start(fs.clone(), PathBuf::from("/store"), quick_params()).unwrap();
        janitor.boost_priority();
        assert!(janitor.wait_for_idle_timeout(Duration::from_secs(30)));

        assert!(!fs.exists(stale));
        let summary = janitor.last_scan().unwrap();
        assert_eq!(summary.deleted_files, 1);
        assert_eq!(summary.deleted_bytes, 3);
        assert!(janitor.is_idle());
    }

    #[test]
    fn test_boost_during_pass_carries_into_next_pass() {
        let control = Control::new();

        control.begin_pass();
        assert!(!control.ignore_scan_rate.load(Ordering::Acquire));
        control.request_boost();
        assert!(control.ignore_scan_rate.load(Ordering::Acquire));

        // The boosted pass is still owed, so the janitor stays busy.
        assert!(!control.finish_pass());
        assert!(control.ignore_scan_rate.load(Ordering::Acquire));
        assert!(!control.idle.load(Ordering::Acquire));

        control.begin_pass();
        assert!(control.ignore_scan_rate.load(Ordering::Acquire));
        assert!(control.finish_pass());
        assert!(!control.ignore_scan_rate.load(Ordering::Acquire));
        assert!(control.idle.load(Ordering::Acquire));
    }

    #[test]
    fn test_drop_stops_sleeping_thread() {
        let fs = Arc::new(MemoryFileSystem::new());
        let started = Instant::now();
        let janitor = Janitor::start(fs, PathBuf::from("/store"), quick_params()).unwrap();
        drop(janitor);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_runs_once_then_exits() {
        let fs = Arc::new(MemoryFileSystem::new());
        let params = JanitorParams {
            time_to_wait_after_init: Duration::ZERO,
            scan_frequency: RUN_ONCE_THRESHOLD * 2,
            ..JanitorParams::default()
        };
        let mut janitor = Janitor::start(fs, PathBuf::from("/store"), params).unwrap();
        assert!(janitor.wait_for_idle_timeout(Duration::from_secs(30)));
        janitor.shutdown();
        assert!(janitor.last_scan().is_some());
        assert!(janitor.is_idle());
    }

    #[test]
    fn test_run_once_on_calling_thread() {
        let fs = MemoryFileSystem::new();
        let stale = Path::new("/store/Buckets/Meshes/aa/bb/old.ddc");
        fs.write(stale, b"12345").unwrap();
        fs.set_modified(stale, SystemTime::now() - 20 * DAY).unwrap();

        let summary = Janitor::run_once(&fs, Path::new("/store"), &JanitorParams::default());

        assert_eq!(summary.deleted_files, 1);
        assert_eq!(summary.deleted_bytes, 5);
        assert!(!fs.exists(stale));
    }
}
