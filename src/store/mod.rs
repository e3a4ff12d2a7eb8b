//! The filesystem cache store.
//!
//! [`RecordStore`] ties the pieces together:
//! - paths come from [`crate::paths`]
//! - every file goes through [`AtomicFileStore`]
//! - requests are gated by [`CachePolicy`] flags for the store's speed class
//! - a [`Janitor`] evicts unused files in the background
//!
//! Runtime failures never escape an operation: they are logged and reported
//! as a miss or as [`PutStatus::NotCached`].

mod chunks;
mod legacy;
mod records;
mod request;
mod telemetry;
mod values;

pub use chunks::{ChunkRequest, ChunkResponse};
pub use records::RecordFetch;
pub use request::{
    CacheStore, GetRequest, GetResponse, GetValueRequest, GetValueResponse, PutRequest, PutResponse,
    PutValueRequest, PutValueResponse, RequestOwner, Status,
};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use ddc_policy::CachePolicy;
use ddc_record::{CacheKey, CompressedBuffer, ContentHash, Package};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::access_log::AccessLogWriter;
use crate::atomic::{AtomicFileStore, FileAccess};
use crate::config::StoreParams;
use crate::debug::DebugOptions;
use crate::error::{StoreError, StoreResult};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::janitor::{Janitor, JanitorParams, ScanSummary};
use crate::paths;
use crate::speed::{SpeedClass, SpeedStats, SpeedTest};

use telemetry::MissTelemetry;

/// Longest absolute path the platform accepts.
#[cfg(unix)]
const MAX_PATH_LEN: usize = libc::PATH_MAX as usize;
#[cfg(not(unix))]
const MAX_PATH_LEN: usize = 260;

/// Outcome of a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PutStatus {
    /// The data is in the store, written now or already present.
    Cached,
    /// The policy did not allow storing.
    Skipped,
    /// The store could not or would not write the data.
    NotCached,
}

impl PutStatus {
    pub fn is_cached(self) -> bool {
        self == Self::Cached
    }
}

/// A content-addressed build artifact cache rooted at one directory.
#[derive(Debug)]
pub struct RecordStore {
    files: AtomicFileStore,
    disabled: bool,
    purge_transient: bool,
    max_record_size: u64,
    max_value_size: u64,
    speed_stats: SpeedStats,
    speed_class: SpeedClass,
    debug_options: RwLock<DebugOptions>,
    telemetry: MissTelemetry,
    access_log: Option<AccessLogWriter>,
    janitor: Option<Janitor>,
}

impl RecordStore {
    /// Open the store at `params.path` on the local filesystem.
    pub fn open(params: StoreParams) -> StoreResult<Self> {
        let root = params
            .path
            .clone()
            .ok_or_else(|| StoreError::Configuration("no store path configured".to_string()))?;
        Self::new(root, params, Arc::new(LocalFileSystem::new()))
    }

    /// Construct a store.
    ///
    /// Checks the root against the platform path limit, optionally flushes
    /// it, measures its speed, and starts the janitor when the store is
    /// writable. Only a root that is too long is an error; a store that can
    /// neither read nor write is returned disabled.
    pub fn new(root: impl Into<PathBuf>, params: StoreParams, fs: Arc<dyn FileSystem>) -> StoreResult<Self> {
        let root = absolute_root(root.into())?;
        check_path_length(&root)?;

        let mut read_only = params.read_only;
        let mut touch = params.touch;

        if !read_only && params.flush {
            info!(root = %root.display(), "flushing store");
            match fs.remove_dir_all(&root) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(root = %root.display(), error = %e, "failed to flush store"),
            }
        }

        let measured = if params.skip_speed_test {
            info!(root = %root.display(), "skipping speed test, assuming local performance");
            Some(SpeedStats::assumed_local())
        } else {
            SpeedTest::new(Arc::clone(&fs), &root, read_only).run()
        };

        let (disabled, speed_stats, speed_class) = match measured {
            Some(stats) => {
                read_only |= !stats.write_passed();
                let class = SpeedClass::classify(stats.latency_ms, params.consider_fast_at, params.consider_slow_at);
                info!(
                    root = %root.display(),
                    latency_ms = stats.latency_ms,
                    read_mbs = stats.read_mbs,
                    write_mbs = stats.write_mbs,
                    speed_class = ?class,
                    "store performance measured"
                );
                (false, stats, class)
            }
            None => {
                warn!(root = %root.display(), "no read or write access, store disabled");
                let stats = SpeedStats {
                    latency_ms: 0.0,
                    read_mbs: 0.0,
                    write_mbs: 0.0,
                };
                (true, stats, SpeedClass::Unknown)
            }
        };

        if touch && !disabled && !read_only && !touch_allowed(speed_class) {
            warn!(root = %root.display(), "store appears slow, touch disabled");
            touch = false;
        }
        if touch && !read_only {
            info!(root = %root.display(), "files will be touched on access");
        }

        let access = FileAccess {
            read_only: read_only || disabled,
            touch,
            unused_file_age: params.unused_file_age(),
        };
        let files = AtomicFileStore::new(Arc::clone(&fs), root.clone(), access);

        let janitor = if !disabled && !read_only && (params.clean || params.delete_unused) {
            start_janitor(fs, &root, &params)
        } else {
            None
        };

        let access_log = match (&params.access_log, disabled) {
            (Some(log_path), false) => match AccessLogWriter::open(log_path, &root) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    warn!(root = %root.display(), path = %log_path.display(), error = %e, "failed to open access log");
                    None
                }
            },
            _ => None,
        };

        Ok(Self {
            files,
            disabled,
            purge_transient: params.purge_transient,
            max_record_size: params.max_record_size(),
            max_value_size: params.max_value_size(),
            speed_stats,
            speed_class,
            debug_options: RwLock::new(DebugOptions::new()),
            telemetry: MissTelemetry::new(!params.shared),
            access_log,
            janitor,
        })
    }

    pub fn root(&self) -> &Path {
        self.files.root()
    }

    pub fn is_usable(&self) -> bool {
        !self.disabled
    }

    pub fn is_writable(&self) -> bool {
        !self.disabled && !self.files.access().read_only
    }

    pub fn speed_stats(&self) -> SpeedStats {
        self.speed_stats
    }

    pub fn speed_class(&self) -> SpeedClass {
        self.speed_class
    }

    /// The policy flags this store can serve.
    pub fn capabilities(&self) -> CachePolicy {
        let mut flags = CachePolicy::NONE;
        if self.is_usable() {
            flags |= self.query_flag();
        }
        if self.is_writable() {
            flags |= self.store_flag();
        }
        flags
    }

    pub fn janitor(&self) -> Option<&Janitor> {
        self.janitor.as_ref()
    }

    /// Summary of the janitor's most recent pass.
    pub fn last_scan(&self) -> Option<ScanSummary> {
        self.janitor.as_ref().and_then(Janitor::last_scan)
    }

    /// Replace the debug options. Returns true; every option is supported.
    pub fn apply_debug_options(&self, options: DebugOptions) -> bool {
        match self.debug_options.write() {
            Ok(mut current) => *current = options,
            Err(poisoned) => *poisoned.into_inner() = options,
        }
        true
    }

    /// True when a record exists for `key`. Refreshes its modification time
    /// under the touch rules and records a miss for build-time telemetry.
    pub fn exists(&self, key: &CacheKey) -> bool {
        if !self.is_usable() {
            debug!(root = %self.root().display(), %key, "skipped exists check, store unavailable");
            return false;
        }
        if self.simulate_miss(key) {
            debug!(root = %self.root().display(), %key, "simulated miss for exists check");
            return false;
        }

        let path = self.files.resolve(&paths::record_path(key));
        let exists = self.files.file_exists(&path);
        if exists {
            self.log_record_access(key, &path);
        } else {
            self.telemetry.record_miss(&key.to_string());
        }
        debug!(root = %self.root().display(), %key, exists, "exists check");
        exists
    }

    /// Delete the record for `key`. Transient removals only happen when
    /// `PurgeTransient` is set.
    pub fn remove(&self, key: &CacheKey, transient: bool) {
        if !self.is_writable() || (transient && !self.purge_transient) {
            return;
        }
        let path = self.files.resolve(&paths::record_path(key));
        if self.files.delete(&path) {
            debug!(root = %self.root().display(), %key, transient, "removed record");
        }
    }

    fn query_flag(&self) -> CachePolicy {
        if self.speed_class.is_local() {
            CachePolicy::QUERY_LOCAL
        } else {
            CachePolicy::QUERY_REMOTE
        }
    }

    fn store_flag(&self) -> CachePolicy {
        if self.speed_class.is_local() {
            CachePolicy::STORE_LOCAL
        } else {
            CachePolicy::STORE_REMOTE
        }
    }

    fn simulate_miss(&self, key: &CacheKey) -> bool {
        self.simulate_miss_text(&key.to_string(), Some(key.bucket.as_str()))
    }

    fn simulate_miss_text(&self, key: &str, bucket: Option<&str>) -> bool {
        match self.debug_options.read() {
            Ok(options) => options.should_simulate_miss(key, bucket),
            Err(poisoned) => poisoned.into_inner().should_simulate_miss(key, bucket),
        }
    }

    /// Load and decode a package file. Missing, corrupt and malformed files
    /// all come back as `None`; bad files are deleted when writable.
    fn load_package(&self, path: &Path, name: &str) -> Option<Package> {
        let bytes = match self.files.load(path, name) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(root = %self.root().display(), name, error = %e, "failed to read package");
                return None;
            }
        };
        match Package::try_load(&bytes) {
            Ok(package) => Some(package),
            Err(e) => {
                info!(root = %self.root().display(), name, path = %path.display(), error = %e, "invalid package treated as a miss");
                self.discard(path);
                None
            }
        }
    }

    fn save_package(&self, path: &Path, name: &str, package: &Package, replace_existing: bool) -> StoreResult<u64> {
        self.files.save(
            path,
            name,
            |out| {
                out.extend_from_slice(&package.save()?);
                Ok(())
            },
            replace_existing,
        )
    }

    /// Delete a file that failed to decode, unless the store is read-only.
    fn discard(&self, path: &Path) {
        if !self.files.access().read_only {
            self.files.delete(path);
        }
    }

    fn content_file(&self, raw_hash: &ContentHash) -> PathBuf {
        self.files.resolve(&paths::content_path(raw_hash))
    }

    fn content_exists(&self, raw_hash: &ContentHash) -> bool {
        self.files.file_exists(&self.content_file(raw_hash))
    }

    /// Write a content blob unless it is already present.
    fn put_content(&self, name: &str, content: &CompressedBuffer) -> StoreResult<u64> {
        let raw_hash = content.raw_hash();
        let path = self.content_file(&raw_hash);
        let mut written = 0;
        if !self.files.file_exists(&path) {
            written = self.files.save(
                &path,
                name,
                |out| {
                    out.extend_from_slice(content.as_bytes());
                    Ok(())
                },
                false,
            )?;
        }
        if let Some(log) = &self.access_log {
            log.append_content(&raw_hash, &path);
        }
        Ok(written)
    }

    /// Load a content blob. Undecodable blobs are deleted when writable.
    fn load_content(&self, path: &Path, name: &str) -> Option<CompressedBuffer> {
        let bytes = match self.files.load(path, name) {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!(root = %self.root().display(), name, error = %e, "failed to read content");
                return None;
            }
        };
        match CompressedBuffer::from_bytes(bytes) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                info!(root = %self.root().display(), name, path = %path.display(), error = %e, "invalid content treated as a miss");
                self.discard(path);
                None
            }
        }
    }

    fn log_record_access(&self, key: &CacheKey, path: &Path) {
        if let Some(log) = &self.access_log {
            log.append_record(key, path);
        }
    }

    fn log_content_access(&self, raw_hash: &ContentHash, path: &Path) {
        if let Some(log) = &self.access_log {
            log.append_content(raw_hash, path);
        }
    }
}

/// Touch stays on only for stores measured faster than slow.
fn touch_allowed(class: SpeedClass) -> bool {
    class < SpeedClass::Slow
}

fn absolute_root(root: PathBuf) -> StoreResult<PathBuf> {
    if root.as_os_str().is_empty() {
        return Err(StoreError::Configuration("store path is empty".to_string()));
    }
    if root.is_absolute() {
        return Ok(root);
    }
    let cwd = std::env::current_dir().map_err(|e| StoreError::io(&root, e))?;
    Ok(cwd.join(root))
}

fn check_path_length(root: &Path) -> StoreResult<()> {
    let root_len = root.as_os_str().len();
    // One separator between the root and the relative path.
    if root_len + 1 + paths::MAX_RELATIVE_PATH_LENGTH >= MAX_PATH_LEN {
        return Err(StoreError::Configuration(format!(
            "store path {} is too long: {root_len} characters leave no room for cache files under the {MAX_PATH_LEN} character limit",
            root.display()
        )));
    }
    Ok(())
}

fn start_janitor(fs: Arc<dyn FileSystem>, root: &Path, params: &StoreParams) -> Option<Janitor> {
    let mut janitor_params = JanitorParams::from_store_params(params);
    if !params.delete_unused {
        janitor_params.max_scan_rate = u32::MAX;
        janitor_params.max_directory_scan_count = u32::MAX;
        janitor_params.scan_frequency = std::time::Duration::MAX;
    }
    if params.clean {
        janitor_params.time_to_wait_after_init = std::time::Duration::ZERO;
    }

    let janitor = match Janitor::start(fs, root.to_path_buf(), janitor_params) {
        Ok(janitor) => janitor,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "failed to start janitor");
            return None;
        }
    };
    if params.clean {
        info!(root = %root.display(), "cleaning store before first use");
        janitor.boost_priority();
        janitor.wait_for_idle();
    }
    Some(janitor)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use ddc_record::{Bucket, Payload, Record, RecordBuilder, Value, ValueId};

    pub(crate) fn quiet_params() -> StoreParams {
        StoreParams::default().quiet()
    }

    pub(crate) fn memory_store(params: StoreParams) -> (Arc<MemoryFileSystem>, RecordStore) {
        let fs = Arc::new(MemoryFileSystem::new());
        let store = RecordStore::new("/store", params, fs.clone()).unwrap();
        (fs, store)
    }

    pub(crate) fn key(bucket: &str, seed: &str) -> CacheKey {
        CacheKey::new(Bucket::new(bucket).unwrap(), ContentHash::of(seed.as_bytes()))
    }

    pub(crate) fn record_with(key: &CacheKey, payloads: &[(&str, &[u8])]) -> Record {
        let mut builder = RecordBuilder::new(key.clone());
        let mut payloads = payloads.iter();
        if let Some((name, data)) = payloads.next() {
            builder
                .set_value(Payload::new(ValueId::from_name(name), Value::from_raw(data)))
                .unwrap();
        }
        for (name, data) in payloads {
            builder
                .add_attachment(Payload::new(ValueId::from_name(name), Value::from_raw(data)))
                .unwrap();
        }
        builder.build()
    }

    #[test]
    fn test_path_length_limit() {
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        let long_root = format!("/{}", "d".repeat(MAX_PATH_LEN));
        let err = RecordStore::new(long_root, quiet_params(), fs).unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_empty_root_is_rejected() {
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        assert!(matches!(
            RecordStore::new("", quiet_params(), fs),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_skipped_speed_test_is_local_and_writable() {
        let (_fs, store) = memory_store(quiet_params());
        assert!(store.is_usable());
        assert!(store.is_writable());
        assert_eq!(store.speed_class(), SpeedClass::Local);
        assert_eq!(store.capabilities(), CachePolicy::LOCAL);
        assert!(store.janitor().is_none());
    }

    #[test]
    fn test_read_only_capabilities() {
        let (_fs, store) = memory_store(quiet_params().with_read_only(true));
        assert!(store.is_usable());
        assert!(!store.is_writable());
        assert_eq!(store.capabilities(), CachePolicy::QUERY_LOCAL);
    }

    #[test]
    fn test_flush_wipes_root() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.write(Path::new("/store/Content/00/00/old.ddc"), b"x").unwrap();
        let params = StoreParams {
            flush: true,
            ..quiet_params()
        };
        let _store = RecordStore::new("/store", params, fs.clone()).unwrap();
        assert!(fs.file_paths().is_empty());
    }

    #[test]
    fn test_flush_ignored_when_read_only() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.write(Path::new("/store/Content/00/00/old.ddc"), b"x").unwrap();
        let params = StoreParams {
            flush: true,
            ..quiet_params().with_read_only(true)
        };
        let _store = RecordStore::new("/store", params, fs.clone()).unwrap();
        assert_eq!(fs.file_paths().len(), 1);
    }

    #[test]
    fn test_touch_only_on_faster_than_slow_stores() {
        assert!(touch_allowed(SpeedClass::Local));
        assert!(touch_allowed(SpeedClass::Fast));
        assert!(touch_allowed(SpeedClass::Ok));
        assert!(!touch_allowed(SpeedClass::Slow));
        assert!(!touch_allowed(SpeedClass::Unknown));
    }

    #[test]
    fn test_speed_test_on_memory_filesystem() {
        let fs = Arc::new(MemoryFileSystem::new());
        let params = StoreParams {
            skip_speed_test: false,
            delete_unused: false,
            ..StoreParams::default()
        };
        let store = RecordStore::new("/store", params, fs).unwrap();
        assert!(store.is_usable());
        assert!(store.is_writable());
        assert!(store.speed_stats().read_passed());
        assert!(store.speed_stats().write_passed());
    }

    #[test]
    fn test_exists_and_remove() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Textures", "a");
        assert!(!store.exists(&key));

        let record = record_with(&key, &[("data", b"bytes")]);
        assert_eq!(
            store.put_record("test", &record, &CachePolicy::DEFAULT.into(), false),
            PutStatus::Cached
        );
        assert!(store.exists(&key));

        store.remove(&key, true);
        assert!(store.exists(&key), "transient removal needs PurgeTransient");
        store.remove(&key, false);
        assert!(!store.exists(&key));
    }

    #[test]
    fn test_purge_transient_allows_transient_removal() {
        let params = StoreParams {
            purge_transient: true,
            ..quiet_params()
        };
        let (_fs, store) = memory_store(params);
        let key = key("Textures", "b");
        let record = record_with(&key, &[("data", b"bytes")]);
        store.put_record("test", &record, &CachePolicy::DEFAULT.into(), false);
        store.remove(&key, true);
        assert!(!store.exists(&key));
    }

    #[test]
    fn test_debug_options_simulate_miss_for_bucket() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Shaders", "c");
        let record = record_with(&key, &[("data", b"bytes")]);
        store.apply_debug_options(DebugOptions::new().with_miss_buckets(["Shad*"]).unwrap());

        assert_eq!(
            store.put_record("test", &record, &CachePolicy::DEFAULT.into(), false),
            PutStatus::NotCached
        );
        assert!(!store.exists(&key));

        store.apply_debug_options(DebugOptions::new());
        assert_eq!(
            store.put_record("test", &record, &CachePolicy::DEFAULT.into(), false),
            PutStatus::Cached
        );
        assert!(store.exists(&key));
    }

    #[test]
    fn test_access_log_records_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        let log_path = dir.path().join("access.log");
        let params = StoreParams {
            access_log: Some(log_path.clone()),
            ..quiet_params()
        };
        let (_fs, store) = memory_store(params);
        let key = key("Meshes", "d");
        let record = record_with(&key, &[("data", b"bytes")]);
        store.put_record("test", &record, &CachePolicy::DEFAULT.into(), false);
        assert!(store.exists(&key));
        drop(store);

        let log = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines, vec![paths::record_path(&key)]);
    }
}
