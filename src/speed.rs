//! Startup speed test.
//!
//! Measures per-file latency with stats over a fixed set of test files,
//! then read throughput over the same files and, when the store is
//! writable, write throughput into a scratch folder that is removed in the
//! background afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::fs::FileSystem;

/// Sizes of the test files in KiB. Most cache files fall in this range.
const TEST_FILE_SIZES_KB: [u64; 6] = [4, 8, 16, 64, 128, 256];

/// Sibling folders holding one copy of each test file.
const TEST_FOLDER_COUNT: usize = 2;

/// Directory under the root holding the test files.
pub const TEST_DATA_DIR: &str = "TestData";

/// Latency below which a store is classified local.
const LOCAL_LATENCY_MS: f64 = 1.0;

/// Speed class of a store, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SpeedClass {
    Local,
    Fast,
    Ok,
    Slow,
    Unknown,
}

impl SpeedClass {
    /// Classify a per-file latency against the fast and slow thresholds.
    pub fn classify(latency_ms: f64, consider_fast_at_ms: f64, consider_slow_at_ms: f64) -> Self {
        if latency_ms < LOCAL_LATENCY_MS {
            Self::Local
        } else if latency_ms <= consider_fast_at_ms {
            Self::Fast
        } else if latency_ms >= consider_slow_at_ms {
            Self::Slow
        } else {
            Self::Ok
        }
    }

    /// Local stores answer local queries; every other class answers remote ones.
    pub fn is_local(self) -> bool {
        self == Self::Local
    }
}

/// Measured performance of a store.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SpeedStats {
    /// Average time to stat one file.
    pub latency_ms: f64,
    /// Read throughput in MiB/s; zero when reads failed.
    pub read_mbs: f64,
    /// Write throughput in MiB/s; zero when writes failed or were skipped.
    pub write_mbs: f64,
}

impl SpeedStats {
    /// Stats assumed when the test is skipped.
    pub fn assumed_local() -> Self {
        Self {
            latency_ms: 0.0,
            read_mbs: 999.0,
            write_mbs: 999.0,
        }
    }

    pub fn read_passed(&self) -> bool {
        self.read_mbs > 0.0
    }

    pub fn write_passed(&self) -> bool {
        self.write_mbs > 0.0
    }
}

/// One-shot speed test of a store root.
#[derive(Debug)]
pub struct SpeedTest {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    read_only: bool,
}

impl SpeedTest {
    pub fn new(fs: Arc<dyn FileSystem>, root: &Path, read_only: bool) -> Self {
        Self {
            fs,
            root: root.to_path_buf(),
            read_only,
        }
    }

    /// Path and size of every test file, interleaving folders so consecutive
    /// accesses never hit the same directory.
    fn test_files(&self, base: &Path) -> Vec<(PathBuf, u64)> {
        let mut files = Vec::with_capacity(TEST_FILE_SIZES_KB.len() * TEST_FOLDER_COUNT);
        for size_kb in TEST_FILE_SIZES_KB {
            for folder in 0..TEST_FOLDER_COUNT {
                let path = base
                    .join(folder.to_string())
                    .join(format!("TestData_{size_kb}kb.dat"));
                files.push((path, size_kb * 1024));
            }
        }
        files
    }

    /// Run the test. Returns `None` when neither reads nor writes work.
    pub fn run(&self) -> Option<SpeedStats> {
        let started = Instant::now();
        let test_dir = self.root.join(TEST_DATA_DIR);
        let files = self.test_files(&test_dir);

        let missing: Vec<&(PathBuf, u64)> = files
            .iter()
            .filter(|(path, size)| self.fs.stat(path).map(|stat| stat.size) != Some(*size))
            .collect();
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0 / files.len() as f64;
        debug!(root = %self.root.display(), latency_ms, "stat test complete");

        let mut write_passed = !self.read_only;
        if !self.read_only {
            for (path, size) in missing {
                if let Err(e) = self.fs.write(path, &test_bytes(*size)) {
                    // Another process may have created it at the same time.
                    if !self.fs.exists(path) {
                        warn!(path = %path.display(), error = %e, "failed to create speed test file; store will be read-only");
                        write_passed = false;
                        break;
                    }
                }
            }
        }

        let read_started = Instant::now();
        let mut read_bytes = 0u64;
        let mut read_passed = true;
        for (path, _) in &files {
            match self.fs.read(path) {
                Ok(data) => read_bytes += data.len() as u64,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read speed test file; store will be disabled");
                    read_passed = false;
                    break;
                }
            }
        }
        let read_secs = read_started.elapsed().as_secs_f64();

        let mut written_bytes = 0u64;
        let mut write_secs = 0.0;
        if read_passed && !self.read_only {
            let scratch = test_dir.join(uuid::Uuid::new_v4().simple().to_string());
            let write_started = Instant::now();
            for (path, size) in self.test_files(&scratch) {
                if let Err(e) = self.fs.write(&path, &test_bytes(size)) {
                    warn!(path = %path.display(), error = %e, "failed to write speed test file; store will be read-only");
                    write_passed = false;
                    break;
                }
                written_bytes += size;
            }
            write_secs = write_started.elapsed().as_secs_f64();
            self.remove_in_background(scratch);
        } else {
            write_passed = false;
        }

        let stats = SpeedStats {
            latency_ms,
            read_mbs: if read_passed { throughput_mbs(read_bytes, read_secs) } else { 0.0 },
            write_mbs: if write_passed { throughput_mbs(written_bytes, write_secs) } else { 0.0 },
        };
        info!(
            root = %self.root.display(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "speed test complete"
        );
        (stats.read_passed() || stats.write_passed()).then_some(stats)
    }

    /// Removing the scratch folder can be slow on network drives.
    fn remove_in_background(&self, scratch: PathBuf) {
        let fs = Arc::clone(&self.fs);
        let spawned = thread::Builder::new()
            .name("ddc-speed-test-cleanup".to_string())
            .spawn(move || {
                if let Err(e) = fs.remove_dir_all(&scratch) {
                    debug!(path = %scratch.display(), error = %e, "failed to remove speed test folder");
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn speed test cleanup");
        }
    }
}

fn test_bytes(size: u64) -> Vec<u8> {
    let mut data = vec![0u8; size as usize];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

fn throughput_mbs(bytes: u64, secs: f64) -> f64 {
    if bytes == 0 {
        return 0.0;
    }
    bytes as f64 / secs.max(1e-9) / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use std::time::Duration;

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(SpeedClass::classify(0.5, 10.0, 50.0), SpeedClass::Local);
        assert_eq!(SpeedClass::classify(1.0, 10.0, 50.0), SpeedClass::Fast);
        assert_eq!(SpeedClass::classify(10.0, 10.0, 50.0), SpeedClass::Fast);
        assert_eq!(SpeedClass::classify(20.0, 10.0, 50.0), SpeedClass::Ok);
        assert_eq!(SpeedClass::classify(50.0, 10.0, 50.0), SpeedClass::Slow);
    }

    #[test]
    fn test_speed_class_order() {
        assert!(SpeedClass::Local < SpeedClass::Fast);
        assert!(SpeedClass::Fast < SpeedClass::Ok);
        assert!(SpeedClass::Ok < SpeedClass::Slow);
        assert!(SpeedClass::Slow < SpeedClass::Unknown);
    }

    #[test]
    fn test_writable_store_creates_test_files() {
        let fs = Arc::new(MemoryFileSystem::new());
        let stats = SpeedTest::new(fs.clone(), Path::new("/cache"), false).run().unwrap();
        assert!(stats.read_passed());
        assert!(stats.write_passed());

        let test_file = Path::new("/cache/TestData/1/TestData_256kb.dat");
        assert_eq!(fs.stat(test_file).unwrap().size, 256 * 1024);
        assert_eq!(fs.stat(Path::new("/cache/TestData/0/TestData_4kb.dat")).unwrap().size, 4096);
    }

    #[test]
    fn test_scratch_folder_is_removed() {
        let fs = Arc::new(MemoryFileSystem::new());
        SpeedTest::new(fs.clone(), Path::new("/cache"), false).run().unwrap();

        let only_fixed_folders = || {
            fs.read_dir(Path::new("/cache/TestData"))
                .map(|entries| entries.len() == TEST_FOLDER_COUNT)
                .unwrap_or(false)
        };
        for _ in 0..100 {
            if only_fixed_folders() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(only_fixed_folders());
    }

    #[test]
    fn test_read_only_store_without_test_files_is_unusable() {
        let fs = Arc::new(MemoryFileSystem::new());
        assert!(SpeedTest::new(fs.clone(), Path::new("/cache"), true).run().is_none());
        assert!(fs.file_paths().is_empty());
    }

    #[test]
    fn test_read_only_store_with_test_files_reads_only() {
        let fs = Arc::new(MemoryFileSystem::new());
        SpeedTest::new(fs.clone(), Path::new("/cache"), false).run().unwrap();

        let stats = SpeedTest::new(fs, Path::new("/cache"), true).run().unwrap();
        assert!(stats.read_passed());
        assert!(!stats.write_passed());
    }
}
