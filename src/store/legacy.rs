//! String-keyed entries under the decimal-sharded legacy layout.
//!
//! Each file holds raw bytes inside the same hash envelope as every other
//! cache file. Invalid keys fail with [`StoreError::InvalidKey`]; runtime
//! failures are logged and reported as misses.

use std::path::PathBuf;

use tracing::{debug, warn};

use super::{PutStatus, RecordStore};
use crate::error::StoreResult;
use crate::paths;

impl RecordStore {
    fn legacy_file(&self, key: &str) -> StoreResult<PathBuf> {
        Ok(self.files.resolve(&paths::legacy_key_path(key)?))
    }

    /// True when a legacy file exists for `key`.
    pub fn legacy_exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.legacy_file(key)?;
        if !self.is_usable() || self.simulate_miss_text(key, None) {
            return Ok(false);
        }

        let exists = self.files.file_exists(&path);
        if exists {
            if let Some(log) = &self.access_log {
                log.append_legacy(key, &path);
            }
        } else {
            self.telemetry.record_miss(key);
        }
        debug!(root = %self.root().display(), key, exists, "legacy exists check");
        Ok(exists)
    }

    pub fn legacy_exists_batch(&self, keys: &[&str]) -> StoreResult<Vec<bool>> {
        keys.iter().map(|key| self.legacy_exists(key)).collect()
    }

    /// Read the bytes stored under `key`.
    pub fn legacy_get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.legacy_file(key)?;
        if !self.is_usable() || self.simulate_miss_text(key, None) {
            return Ok(None);
        }

        match self.files.load(&path, key) {
            Ok(Some(data)) => {
                if let Some(log) = &self.access_log {
                    log.append_legacy(key, &path);
                }
                Ok(Some(data))
            }
            Ok(None) => {
                self.telemetry.record_miss(key);
                Ok(None)
            }
            Err(e) => {
                warn!(root = %self.root().display(), key, error = %e, "failed to read legacy file");
                Ok(None)
            }
        }
    }

    /// Store `data` under `key`. An existing file is kept unless
    /// `put_even_if_exists` is set.
    pub fn legacy_put(&self, key: &str, data: &[u8], put_even_if_exists: bool) -> StoreResult<PutStatus> {
        let path = self.legacy_file(key)?;
        if !self.is_writable() || data.is_empty() || self.simulate_miss_text(key, None) {
            return Ok(PutStatus::NotCached);
        }
        if !put_even_if_exists && self.files.file_exists(&path) {
            return Ok(PutStatus::Cached);
        }

        let saved = self.files.save(
            &path,
            key,
            |out| {
                out.extend_from_slice(data);
                Ok(())
            },
            put_even_if_exists,
        );
        match saved {
            Ok(_) => {
                if let Some(log) = &self.access_log {
                    log.append_legacy(key, &path);
                }
                self.telemetry.record_put(key, self.root());
                Ok(PutStatus::Cached)
            }
            Err(e) => {
                warn!(root = %self.root().display(), key, error = %e, "failed to write legacy file");
                Ok(PutStatus::NotCached)
            }
        }
    }

    /// Delete the file for `key`. Transient removals only happen when
    /// `PurgeTransient` is set.
    pub fn legacy_remove(&self, key: &str, transient: bool) -> StoreResult<()> {
        let path = self.legacy_file(key)?;
        if !self.is_writable() || (transient && !self.purge_transient) {
            return Ok(());
        }
        if self.files.delete(&path) {
            debug!(root = %self.root().display(), key, transient, "removed legacy file");
        }
        Ok(())
    }

    /// True when `legacy_put` of `data` under `key` would write it.
    pub fn would_cache(&self, key: &str, data: &[u8]) -> StoreResult<bool> {
        paths::legacy_key_path(key)?;
        Ok(self.is_writable() && !data.is_empty() && !self.simulate_miss_text(key, None))
    }
}
