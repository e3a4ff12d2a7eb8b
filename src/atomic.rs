//! Crash-safe reads and writes of hash-suffixed files.
//!
//! Every file is stored as `payload ++ sha256(payload)`. Writers build the
//! whole file in a sibling `Temp.<uuid>` file and move it into place with a
//! non-replacing rename, so a reader sees either the complete file or
//! nothing. Readers verify the trailing hash and delete files that fail.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ddc_record::ContentHash;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::fs::FileSystem;

/// Prefix of in-flight temp files.
pub const TEMP_FILE_PREFIX: &str = "Temp.";

/// Size of the trailing hash.
pub const HASH_SUFFIX_SIZE: usize = ContentHash::SIZE;

/// Access rules shared by every file operation of one store.
#[derive(Debug, Clone, Copy)]
pub struct FileAccess {
    pub read_only: bool,
    /// Refresh modification times on every successful existence check.
    pub touch: bool,
    /// Age after which the janitor considers a file unused.
    pub unused_file_age: Duration,
}

/// Reads and writes hash-suffixed files under one root.
#[derive(Debug, Clone)]
pub struct AtomicFileStore {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    access: FileAccess,
}

/// Removes a temp file when dropped, whatever happened to it.
struct TempFile<'a> {
    fs: &'a dyn FileSystem,
    path: PathBuf,
}

impl Drop for TempFile<'_> {
    fn drop(&mut self) {
        if self.fs.exists(&self.path) {
            if let Err(e) = self.fs.remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to delete temp file");
            }
        }
    }
}

impl AtomicFileStore {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>, access: FileAccess) -> Self {
        Self {
            fs,
            root: root.into(),
            access,
        }
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn access(&self) -> FileAccess {
        self.access
    }

    /// Absolute path of a path relative to the root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// True when `path` exists. Refreshes its modification time when touch
    /// is enabled, or when the store is writable and the file is older than
    /// a quarter of the unused-file age.
    pub fn file_exists(&self, path: &Path) -> bool {
        let Some(stat) = self.fs.stat(path) else {
            return false;
        };
        let now = SystemTime::now();
        let age = now.duration_since(stat.modified).unwrap_or_default();
        if self.access.touch || (!self.access.read_only && age > self.access.unused_file_age / 4) {
            if let Err(e) = self.fs.set_modified(path, now) {
                debug!(path = %path.display(), error = %e, "failed to refresh modification time");
            }
        }
        true
    }

    /// Write a file through a temp file and a non-replacing rename.
    ///
    /// `write` produces the payload; the trailing hash is appended here.
    /// Losing a race to another writer of the same path counts as success.
    /// Returns the number of bytes on disk.
    pub fn save<F>(&self, path: &Path, name: &str, write: F, replace_existing: bool) -> StoreResult<u64>
    where
        F: FnOnce(&mut Vec<u8>) -> StoreResult<()>,
    {
        let dir = path.parent().unwrap_or(&self.root);
        let temp = TempFile {
            fs: self.fs.as_ref(),
            path: dir.join(format!("{TEMP_FILE_PREFIX}{}", uuid::Uuid::new_v4().simple())),
        };

        let mut contents = Vec::new();
        write(&mut contents)?;
        let hash = ContentHash::of(&contents);
        contents.extend_from_slice(hash.as_bytes());

        self.fs
            .write(&temp.path, &contents)
            .map_err(|e| StoreError::io(&temp.path, e))?;

        let written = self.fs.stat(&temp.path).map(|stat| stat.size).unwrap_or(0);
        if written == 0 || written != contents.len() as u64 {
            return Err(StoreError::Integrity {
                path: temp.path.clone(),
                reason: format!("wrote {written} bytes, expected {}", contents.len()),
            });
        }

        match self.fs.rename(&temp.path, path, replace_existing) {
            Ok(()) => {
                debug!(root = %self.root.display(), name, path = %path.display(), bytes = written, "saved file");
                Ok(written)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(root = %self.root.display(), name, path = %path.display(), "file already exists, keeping it");
                Ok(written)
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Read a file and verify its trailing hash.
    ///
    /// Returns `Ok(None)` for a missing file and for a corrupt one; corrupt
    /// files are deleted when the store is writable.
    pub fn load(&self, path: &Path, name: &str) -> StoreResult<Option<Vec<u8>>> {
        if !self.file_exists(path) {
            return Ok(None);
        }

        let mut contents = match self.fs.read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };

        if contents.len() < HASH_SUFFIX_SIZE {
            self.discard_corrupt(path, name, "file is smaller than its hash");
            return Ok(None);
        }
        let payload_len = contents.len() - HASH_SUFFIX_SIZE;
        let expected = ContentHash::from_slice(&contents[payload_len..]);
        if expected != Some(ContentHash::of(&contents[..payload_len])) {
            self.discard_corrupt(path, name, "trailing hash does not match contents");
            return Ok(None);
        }

        contents.truncate(payload_len);
        Ok(Some(contents))
    }

    /// Delete a file. Returns false when nothing was deleted.
    pub fn delete(&self, path: &Path) -> bool {
        self.fs.remove_file(path).is_ok()
    }

    fn discard_corrupt(&self, path: &Path, name: &str, reason: &str) {
        warn!(
            root = %self.root.display(),
            name,
            path = %path.display(),
            reason,
            "corrupt cache file treated as a miss"
        );
        if !self.access.read_only {
            self.delete(path);
        }
    }
}
