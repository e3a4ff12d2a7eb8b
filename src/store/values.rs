//! Single-value get and put.
//!
//! A value is stored as a package whose object holds only the raw hash and
//! size. The bytes are attached when they fit `MaxValueSizeKB`, otherwise
//! they live in a content file.

use ddc_policy::CachePolicy;
use ddc_record::{CacheKey, CompressedBuffer, Package, Value, ValueId};
use tracing::{debug, info, warn};

use super::{PutStatus, RecordStore};
use crate::error::StoreResult;
use crate::paths;

impl RecordStore {
    /// Store a single value under `key`.
    ///
    /// A value without data is only accepted when its content is already in
    /// the store.
    pub fn put_cache_value(&self, name: &str, key: &CacheKey, value: &Value, policy: CachePolicy) -> PutStatus {
        if !self.is_writable() {
            debug!(root = %self.root().display(), name, %key, "skipped put, store is read-only");
            return PutStatus::NotCached;
        }
        if !policy.intersects(self.store_flag()) {
            debug!(root = %self.root().display(), name, %key, "skipped put due to cache policy");
            return PutStatus::Skipped;
        }
        if self.simulate_miss(key) {
            debug!(root = %self.root().display(), name, %key, "simulated miss for put");
            return PutStatus::NotCached;
        }

        match self.write_value(name, key, value, policy) {
            Ok(Some(written)) => {
                debug!(root = %self.root().display(), name, %key, bytes = written, "cache put complete");
                self.telemetry.record_put(&key.to_string(), self.root());
                PutStatus::Cached
            }
            Ok(None) => PutStatus::NotCached,
            Err(e) => {
                warn!(root = %self.root().display(), name, %key, error = %e, "cache put failed");
                PutStatus::NotCached
            }
        }
    }

    /// Returns `None` when the value has no data and no stored content.
    fn write_value(&self, name: &str, key: &CacheKey, value: &Value, policy: CachePolicy) -> StoreResult<Option<u64>> {
        let path = self.files.resolve(&paths::record_path(key));
        let mut replace_existing = !policy.intersects(self.query_flag());
        let mut save_package = replace_existing;
        let mut existing: Option<Package> = None;

        if !replace_existing || !value.has_data() {
            existing = self.load_package(&path, name);
            save_package |= existing.is_none();
            if let Some(prior) = existing.as_ref().filter(|_| !save_package) {
                save_package = !self.existing_value_usable(name, key, prior, value);
                replace_existing |= save_package;
            }
        }

        let mut package: Option<Package> = None;
        let mut external: Option<&CompressedBuffer> = None;
        match existing.as_ref() {
            Some(prior) if !save_package => {
                if let Some(data) = value.data() {
                    if prior.find_attachment(&value.raw_hash()).is_none() {
                        external = Some(data);
                    }
                }
            }
            _ => {
                let mut new_package = value.remove_data().save_package()?;
                match value.data() {
                    None => {
                        if !self.content_exists(&value.raw_hash()) {
                            debug!(root = %self.root().display(), name, %key, "failed put due to missing data");
                            return Ok(None);
                        }
                    }
                    Some(data) if data.compressed_size() <= self.max_value_size => {
                        new_package.add_attachment(data.clone());
                    }
                    Some(data) => external = Some(data),
                }
                package = Some(new_package);
            }
        }

        let mut written = 0;
        if let Some(content) = external {
            written += self.put_content(name, content)?;
        }
        if let Some(package) = package.as_ref().filter(|_| save_package) {
            written += self.save_package(&path, name, package, replace_existing)?;
        }
        self.log_record_access(key, &path);
        Ok(Some(written))
    }

    /// True when an existing value package can stand in for `value`.
    fn existing_value_usable(&self, name: &str, key: &CacheKey, prior: &Package, value: &Value) -> bool {
        let existing = match Value::load_package(prior) {
            Ok(existing) if !existing.raw_hash().is_zero() => existing,
            _ => {
                info!(root = %self.root().display(), name, %key, "cache put found invalid existing value");
                return false;
            }
        };
        if existing.raw_hash() == value.raw_hash() && existing.raw_size() == value.raw_size() {
            return true;
        }

        info!(
            root = %self.root().display(),
            name,
            %key,
            new_hash = %value.raw_hash(),
            existing_hash = %existing.raw_hash(),
            "cache put found non-deterministic value"
        );
        if !existing.has_data() && !self.content_exists(&existing.raw_hash()) {
            info!(root = %self.root().display(), name, %key, "existing value is missing content, overwriting it");
            return false;
        }
        true
    }

    /// Fetch the value stored under `key`, resolving its bytes per `policy`.
    pub fn get_cache_value(&self, name: &str, key: &CacheKey, policy: CachePolicy) -> Option<Value> {
        let value = self.load_value(name, key, policy)?;
        let resolved = self.resolve_content(name, key, ValueId::NULL, &value, policy)?;
        debug!(root = %self.root().display(), name, %key, "cache hit");
        Some(resolved)
    }

    /// Load the value package for `key` without resolving external content.
    pub(super) fn load_value(&self, name: &str, key: &CacheKey, policy: CachePolicy) -> Option<Value> {
        if !self.is_usable() {
            debug!(root = %self.root().display(), name, %key, "skipped get, store unavailable");
            return None;
        }
        if !policy.intersects(self.query_flag()) {
            debug!(root = %self.root().display(), name, %key, "skipped get due to cache policy");
            return None;
        }
        if self.simulate_miss(key) {
            debug!(root = %self.root().display(), name, %key, "simulated miss for get");
            return None;
        }

        let path = self.files.resolve(&paths::record_path(key));
        let Some(package) = self.load_package(&path, name) else {
            debug!(root = %self.root().display(), name, %key, "cache miss with missing package");
            self.telemetry.record_miss(&key.to_string());
            return None;
        };

        match Value::load_package(&package) {
            Ok(value) if !value.raw_hash().is_zero() => {
                self.log_record_access(key, &path);
                Some(value)
            }
            Ok(_) => {
                info!(root = %self.root().display(), name, %key, "cache miss with invalid value");
                self.discard(&path);
                None
            }
            Err(e) => {
                info!(root = %self.root().display(), name, %key, error = %e, "cache miss with invalid value");
                self.discard(&path);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{key, memory_store, quiet_params};
    use super::*;
    use crate::config::StoreParams;
    use crate::fs::FileSystem;
    use ddc_record::ContentHash;
    use rand::{Rng, SeedableRng};
    use std::path::{Path, PathBuf};

    fn content_path(hash: &ContentHash) -> PathBuf {
        Path::new("/store").join(paths::content_path(hash))
    }

    fn incompressible(len: usize) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(len as u64);
        (0..len).map(|_| rng.gen()).collect()
    }

    #[test]
    fn test_small_value_round_trip_inline() {
        let (fs, store) = memory_store(quiet_params());
        let key = key("Values", "small");
        let value = Value::from_raw(b"small value");

        assert_eq!(store.put_cache_value("t", &key, &value, CachePolicy::DEFAULT), PutStatus::Cached);
        assert_eq!(fs.file_paths().len(), 1);
        assert_eq!(store.get_cache_value("t", &key, CachePolicy::DEFAULT), Some(value));
    }

    #[test]
    fn test_large_value_spills_to_content() {
        let params = StoreParams {
            max_value_size_kb: 4,
            ..quiet_params()
        };
        let (fs, store) = memory_store(params);
        let key = key("Values", "large");
        let raw = incompressible(16 * 1024);
        let value = Value::from_raw(&raw);

        assert_eq!(store.put_cache_value("t", &key, &value, CachePolicy::DEFAULT), PutStatus::Cached);
        assert!(fs.exists(&content_path(&ContentHash::of(&raw))));
        let fetched = store.get_cache_value("t", &key, CachePolicy::DEFAULT).unwrap();
        assert_eq!(fetched.data().unwrap().decompress().unwrap(), raw);

        let exists_only = store
            .get_cache_value("t", &key, CachePolicy::DEFAULT | CachePolicy::SKIP_DATA)
            .unwrap();
        assert!(!exists_only.has_data());
        assert_eq!(exists_only.raw_size(), raw.len() as u64);
    }

    #[test]
    fn test_hollow_value_requires_existing_content() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Values", "hollow");
        let value = Value::from_raw(b"never stored");

        assert_eq!(
            store.put_cache_value("t", &key, &value.remove_data(), CachePolicy::DEFAULT),
            PutStatus::NotCached
        );
        assert_eq!(store.get_cache_value("t", &key, CachePolicy::DEFAULT), None);
    }

    #[test]
    fn test_hollow_value_accepted_when_content_exists() {
        let params = StoreParams {
            max_value_size_kb: 1,
            ..quiet_params()
        };
        let (_fs, store) = memory_store(params);
        let raw = incompressible(4 * 1024);
        let value = Value::from_raw(&raw);
        store.put_cache_value("t", &key("Values", "first"), &value, CachePolicy::DEFAULT);

        let second = key("Values", "second");
        assert_eq!(
            store.put_cache_value("t", &second, &value.remove_data(), CachePolicy::DEFAULT),
            PutStatus::Cached
        );
        assert_eq!(store.get_cache_value("t", &second, CachePolicy::DEFAULT), Some(value));
    }

    #[test]
    fn test_existing_value_is_kept() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Values", "keep");
        let first = Value::from_raw(b"first");
        let second = Value::from_raw(b"second");

        store.put_cache_value("t", &key, &first, CachePolicy::DEFAULT);
        assert_eq!(store.put_cache_value("t", &key, &second, CachePolicy::DEFAULT), PutStatus::Cached);
        assert_eq!(store.get_cache_value("t", &key, CachePolicy::DEFAULT), Some(first));

        // Without the query flag the put does not look at what is stored.
        store.put_cache_value("t", &key, &second, CachePolicy::STORE);
        assert_eq!(store.get_cache_value("t", &key, CachePolicy::DEFAULT), Some(second));
    }

    #[test]
    fn test_query_gate() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Values", "gate");
        store.put_cache_value("t", &key, &Value::from_raw(b"v"), CachePolicy::DEFAULT);
        assert_eq!(store.get_cache_value("t", &key, CachePolicy::STORE), None);
        assert_eq!(store.get_cache_value("t", &key, CachePolicy::QUERY_REMOTE), None);
        assert!(store.get_cache_value("t", &key, CachePolicy::QUERY_LOCAL).is_some());
    }
}
