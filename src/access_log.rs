//! Append-only log of the cache files a process touched.
//!
//! One relative path per line. Each legacy key, content hash and record key
//! is logged at most once per writer, and only paths under the store root
//! are written.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ddc_record::{CacheKey, ContentHash};
use tracing::warn;

#[derive(Debug)]
struct AccessLogState {
    writer: LineWriter<fs::File>,
    legacy_keys: HashSet<String>,
    content_hashes: HashSet<ContentHash>,
    record_keys: HashSet<CacheKey>,
}

/// Thread-safe access log writer.
#[derive(Debug)]
pub struct AccessLogWriter {
    root: PathBuf,
    log_path: PathBuf,
    state: Mutex<AccessLogState>,
}

impl AccessLogWriter {
    /// Open `log_path` for appending; paths are logged relative to `root`.
    pub fn open(log_path: &Path, root: &Path) -> io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(log_path)?;
        Ok(Self {
            root: root.to_path_buf(),
            log_path: log_path.to_path_buf(),
            state: Mutex::new(AccessLogState {
                writer: LineWriter::new(file),
                legacy_keys: HashSet::new(),
                content_hashes: HashSet::new(),
                record_keys: HashSet::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    pub fn append_legacy(&self, key: &str, path: &Path) {
        self.append(path, |state| state.legacy_keys.insert(key.to_ascii_uppercase()));
    }

    pub fn append_content(&self, hash: &ContentHash, path: &Path) {
        self.append(path, |state| state.content_hashes.insert(*hash));
    }

    pub fn append_record(&self, key: &CacheKey, path: &Path) {
        self.append(path, |state| state.record_keys.insert(key.clone()));
    }

    /// Writes `path` when `first_seen` reports the key as new.
    fn append<F>(&self, path: &Path, first_seen: F)
    where
        F: FnOnce(&mut AccessLogState) -> bool,
    {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return;
        };
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if !first_seen(&mut *state) {
            return;
        }
        let line = relative.to_string_lossy().replace('\\', "/");
        if let Err(e) = writeln!(state.writer, "{line}") {
            warn!(log = %self.log_path.display(), error = %e, "failed to write access log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddc_record::Bucket;
    use tempfile::TempDir;

    #[test]
    fn test_logs_each_key_once() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let log = AccessLogWriter::open(&dir.path().join("logs/access.log"), &root).unwrap();

        let key = CacheKey::new(Bucket::new("B").unwrap(), ContentHash::of(b"k"));
        let record = root.join("Buckets/B/aa/bb/file.ddc");
        log.append_record(&key, &record);
        log.append_record(&key, &record);
        log.append_legacy("abc", &root.join("1/2/3/ABC.ddc"));
        log.append_legacy("ABC", &root.join("1/2/3/ABC.ddc"));
        let hash = ContentHash::of(b"c");
        log.append_content(&hash, &root.join("Content/cc/dd/file.ddc"));

        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            text,
            "Buckets/B/aa/bb/file.ddc\n1/2/3/ABC.ddc\nContent/cc/dd/file.ddc\n"
        );
    }

    #[test]
    fn test_paths_outside_root_are_skipped() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let log = AccessLogWriter::open(&dir.path().join("access.log"), &root).unwrap();
        log.append_content(&ContentHash::of(b"x"), &dir.path().join("elsewhere/file.ddc"));
        assert_eq!(fs::read_to_string(log.path()).unwrap(), "");
    }
}
