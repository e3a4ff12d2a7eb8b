//! Record get and put.

use std::cmp::Reverse;

use ddc_policy::{CachePolicy, RecordPolicy};
use ddc_record::{CacheKey, CompressedBuffer, Package, Payload, Record, RecordBuilder, Value, ValueId};
use tracing::{debug, info, warn};

use super::{PutStatus, RecordStore};
use crate::error::StoreResult;
use crate::paths;

/// Outcome of a record get.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordFetch {
    /// Every payload was resolved as the policy asked.
    Hit(Record),
    /// Some payloads could not be resolved and come back hollow. Only
    /// returned when the policy sets `PartialRecord`.
    Partial(Record),
    Miss,
}

impl RecordFetch {
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Hit(record) | Self::Partial(record) => Some(record),
            Self::Miss => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Hit(record) | Self::Partial(record) => Some(record),
            Self::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

impl RecordStore {
    /// Fetch the record for `key`, resolving payload bytes per `policy`.
    ///
    /// `name` identifies the caller's request in log lines.
    pub fn get_record(&self, name: &str, key: &CacheKey, policy: &RecordPolicy) -> RecordFetch {
        let Some(record) = self.load_record(name, key, policy) else {
            return RecordFetch::Miss;
        };

        let record_policy = policy.record_policy();
        let mut builder = RecordBuilder::new(key.clone());
        if !record_policy.contains(CachePolicy::SKIP_META) {
            if let Some(meta) = record.meta() {
                builder.set_meta(meta.clone());
            }
        }

        let mut partial = false;
        let value_id = record.value().map(Payload::id);
        for payload in record.payloads() {
            let id = payload.id();
            let resolved = match self.resolve_content(name, key, id, payload.value(), policy.value_policy(id)) {
                Some(value) => Payload::new(id, value),
                None if record_policy.contains(CachePolicy::PARTIAL_RECORD) => {
                    partial = true;
                    payload.remove_data()
                }
                None => return RecordFetch::Miss,
            };
            let added = if Some(id) == value_id {
                builder.set_value(resolved).map(|_| ())
            } else {
                builder.add_attachment(resolved).map(|_| ())
            };
            if let Err(e) = added {
                warn!(root = %self.root().display(), name, %key, error = %e, "stored record has duplicate value ids");
                return RecordFetch::Miss;
            }
        }

        let record = builder.build();
        debug!(root = %self.root().display(), name, %key, partial, "cache hit");
        if partial {
            RecordFetch::Partial(record)
        } else {
            RecordFetch::Hit(record)
        }
    }

    /// Store `record`.
    ///
    /// Attachments are spilled to content files when the package would
    /// exceed its size budget. An existing package is kept unless
    /// `overwrite_if_exists` is set, the policy does not allow querying, or
    /// the existing package is invalid or refers to content that is gone.
    pub fn put_record(&self, name: &str, record: &Record, policy: &RecordPolicy, overwrite_if_exists: bool) -> PutStatus {
        let key = record.key();
        if !self.is_writable() {
            debug!(root = %self.root().display(), name, %key, "skipped put, store is read-only");
            return PutStatus::NotCached;
        }
        if !policy.record_policy().intersects(self.store_flag()) {
            debug!(root = %self.root().display(), name, %key, "skipped put due to cache policy");
            return PutStatus::Skipped;
        }
        if self.simulate_miss(key) {
            debug!(root = %self.root().display(), name, %key, "simulated miss for put");
            return PutStatus::NotCached;
        }

        match self.write_record(name, record, policy, overwrite_if_exists) {
            Ok(written) => {
                debug!(root = %self.root().display(), name, %key, bytes = written, "cache put complete");
                self.telemetry.record_put(&key.to_string(), self.root());
                PutStatus::Cached
            }
            Err(e) => {
                warn!(root = %self.root().display(), name, %key, error = %e, "cache put failed");
                PutStatus::NotCached
            }
        }
    }

    fn write_record(&self, name: &str, record: &Record, policy: &RecordPolicy, overwrite_if_exists: bool) -> StoreResult<u64> {
        let key = record.key();
        let path = self.files.resolve(&paths::record_path(key));

        let mut replace_existing = overwrite_if_exists || !policy.record_policy().intersects(self.query_flag());
        let mut save_package = replace_existing;
        let mut existing: Option<Package> = None;

        if !replace_existing || !record.payloads().all(Payload::has_data) {
            existing = self.load_package(&path, name);
            save_package |= existing.is_none();
            if let Some(prior) = existing.as_ref().filter(|_| !save_package) {
                save_package = !self.existing_record_usable(name, key, prior, record);
                replace_existing |= save_package;
            }
        }

        let mut package = record.save()?;
        let mut external: Vec<CompressedBuffer> = Vec::new();

        match existing.as_ref() {
            Some(prior) if !save_package => {
                // Keep the existing split between inline and external content.
                let hashes: Vec<_> = package.attachments().keys().copied().collect();
                for raw_hash in hashes {
                    if prior.find_attachment(&raw_hash).is_none() {
                        external.extend(package.remove_attachment(&raw_hash));
                    }
                }
            }
            _ => {
                if let Some(prior) = existing.as_ref() {
                    for payload in record.payloads().filter(|payload| !payload.has_data()) {
                        if let Some(attachment) = prior.find_attachment(&payload.raw_hash()) {
                            package.add_attachment(attachment.clone());
                        }
                    }
                }

                let budget = if record.payload_count() == 1 {
                    self.max_value_size
                } else {
                    self.max_record_size
                };
                let mut total = package.attachments_size();
                if total > budget {
                    let mut largest: Vec<CompressedBuffer> = package.attachments().values().cloned().collect();
                    largest.sort_by_key(|buffer| Reverse(buffer.compressed_size()));
                    for buffer in largest {
                        total -= buffer.compressed_size();
                        package.remove_attachment(&buffer.raw_hash());
                        external.push(buffer);
                        if total <= budget {
                            break;
                        }
                    }
                }
            }
        }

        let mut written = 0;
        for content in &external {
            written += self.put_content(name, content)?;
        }
        if save_package {
            written += self.save_package(&path, name, &package, replace_existing)?;
        }
        self.log_record_access(key, &path);
        Ok(written)
    }

    /// True when an existing package can stand in for `record`: it decodes,
    /// and if its values differ from the new ones, all of its content is
    /// still available.
    fn existing_record_usable(&self, name: &str, key: &CacheKey, prior: &Package, record: &Record) -> bool {
        let existing = match Record::load(prior) {
            Ok(existing) => existing,
            Err(e) => {
                info!(root = %self.root().display(), name, %key, error = %e, "existing record is invalid, replacing it");
                return false;
            }
        };

        let same_values = existing
            .payloads()
            .map(|payload| (payload.id(), payload.raw_hash()))
            .eq(record.payloads().map(|payload| (payload.id(), payload.raw_hash())));
        if same_values {
            return true;
        }

        info!(root = %self.root().display(), name, %key, "cache put found non-deterministic record");
        for payload in existing.payloads() {
            if !payload.has_data() && !self.content_exists(&payload.raw_hash()) {
                info!(
                    root = %self.root().display(),
                    name,
                    %key,
                    value = %payload.id(),
                    raw_hash = %payload.raw_hash(),
                    "existing record is missing content, overwriting it"
                );
                return false;
            }
        }
        true
    }

    /// Load the stored record for `key` without resolving external content.
    pub(super) fn load_record(&self, name: &str, key: &CacheKey, policy: &RecordPolicy) -> Option<Record> {
        if !self.is_usable() {
            debug!(root = %self.root().display(), name, %key, "skipped get, store unavailable");
            return None;
        }
        if !policy.record_policy().intersects(self.query_flag()) {
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

        let record = match Record::load(&package) {
            Ok(record) if record.key() == key => record,
            Ok(record) => {
                info!(root = %self.root().display(), name, %key, stored = %record.key(), "cache miss with record for another key");
                self.discard(&path);
                return None;
            }
            Err(e) => {
                info!(root = %self.root().display(), name, %key, error = %e, "cache miss with record load failure");
                self.discard(&path);
                return None;
            }
        };

        self.log_record_access(key, &path);
        Some(record)
    }

    /// Produce the value to return for one payload under `policy`.
    ///
    /// Embedded bytes are used directly; otherwise the content file is
    /// checked or loaded. `None` means the bytes were requested but are
    /// missing or corrupt.
    pub(super) fn resolve_content(
        &self,
        name: &str,
        key: &CacheKey,
        id: ValueId,
        value: &Value,
        policy: CachePolicy,
    ) -> Option<Value> {
        if !policy.intersects(CachePolicy::QUERY) {
            return Some(value.remove_data());
        }

        if value.has_data() {
            return Some(if policy.contains(CachePolicy::SKIP_DATA) {
                value.remove_data()
            } else {
                value.clone()
            });
        }

        let raw_hash = value.raw_hash();
        let path = self.content_file(&raw_hash);
        if policy.contains(CachePolicy::SKIP_DATA) {
            if self.files.file_exists(&path) {
                self.log_content_access(&raw_hash, &path);
                return Some(value.clone());
            }
        } else if let Some(content) = self.load_content(&path, name) {
            if content.raw_hash() == raw_hash && content.raw_size() == value.raw_size() {
                self.log_content_access(&raw_hash, &path);
                return Some(Value::from_compressed(content));
            }
            info!(root = %self.root().display(), name, %key, value = %id, %raw_hash, "cache miss with corrupted value");
            return None;
        }

        debug!(root = %self.root().display(), name, %key, value = %id, %raw_hash, "cache miss with missing value");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{key, memory_store, quiet_params, record_with};
    use super::*;
    use crate::config::StoreParams;
    use crate::fs::FileSystem;
    use ddc_policy::RecordPolicyBuilder;
    use rand::{Rng, SeedableRng};
    use std::path::Path;

    fn incompressible(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen()).collect()
    }

    fn default_policy() -> RecordPolicy {
        RecordPolicy::uniform(CachePolicy::DEFAULT)
    }

    fn content_path(hash: &ddc_record::ContentHash) -> std::path::PathBuf {
        Path::new("/store").join(paths::content_path(hash))
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Textures", "round-trip");
        let record = {
            let mut builder = RecordBuilder::new(key.clone());
            builder.set_meta(serde_json::json!({ "source": "unit" }));
            builder
                .set_value(Payload::new(ValueId::from_name("value"), Value::from_raw(b"primary")))
                .unwrap();
            builder
                .add_attachment(Payload::new(ValueId::from_name("extra"), Value::from_raw(b"secondary")))
                .unwrap();
            builder.build()
        };

        assert_eq!(store.put_record("t", &record, &default_policy(), false), PutStatus::Cached);
        let fetched = store.get_record("t", &key, &default_policy());
        assert_eq!(fetched, RecordFetch::Hit(record));
    }

    #[test]
    fn test_policy_gates() {
        let (fs, store) = memory_store(quiet_params());
        let key = key("Textures", "gated");
        let record = record_with(&key, &[("v", b"data")]);

        let query_only = RecordPolicy::uniform(CachePolicy::QUERY);
        assert_eq!(store.put_record("t", &record, &query_only, false), PutStatus::Skipped);
        assert!(fs.file_paths().is_empty());

        // A remote-only store flag does not apply to a local store.
        let remote = RecordPolicy::uniform(CachePolicy::REMOTE);
        assert_eq!(store.put_record("t", &record, &remote, false), PutStatus::Skipped);

        assert_eq!(store.put_record("t", &record, &default_policy(), false), PutStatus::Cached);
        let store_only = RecordPolicy::uniform(CachePolicy::STORE);
        assert_eq!(store.get_record("t", &key, &store_only), RecordFetch::Miss);
    }

    #[test]
    fn test_skip_meta_and_skip_data() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Textures", "skips");
        let mut builder = RecordBuilder::new(key.clone());
        builder.set_meta(serde_json::json!({ "k": 1 }));
        builder
            .set_value(Payload::new(ValueId::from_name("v"), Value::from_raw(b"payload")))
            .unwrap();
        let record = builder.build();
        store.put_record("t", &record, &default_policy(), false);

        let policy = RecordPolicy::uniform(CachePolicy::DEFAULT | CachePolicy::SKIP_META | CachePolicy::SKIP_DATA);
        let fetched = store.get_record("t", &key, &policy).into_record().unwrap();
        assert!(fetched.meta().is_none());
        let value = fetched.value().unwrap();
        assert!(!value.has_data());
        assert_eq!(value.raw_hash(), record.value().unwrap().raw_hash());
    }

    #[test]
    fn test_oversized_record_spills_largest_attachment() {
        let params = StoreParams {
            max_record_size_kb: 16,
            ..quiet_params()
        };
        let (fs, store) = memory_store(params);
        let key = key("Meshes", "spill");
        let large = incompressible(12 * 1024, 1);
        let small = incompressible(8 * 1024, 2);
        let record = record_with(&key, &[("large", &large), ("small", &small)]);

        assert_eq!(store.put_record("t", &record, &default_policy(), false), PutStatus::Cached);

        let large_hash = ddc_record::ContentHash::of(&large);
        let small_hash = ddc_record::ContentHash::of(&small);
        assert!(fs.exists(&content_path(&large_hash)));
        assert!(!fs.exists(&content_path(&small_hash)));

        let fetched = store.get_record("t", &key, &default_policy());
        assert_eq!(fetched, RecordFetch::Hit(record));
    }

    #[test]
    fn test_single_value_uses_value_budget() {
        let params = StoreParams {
            max_record_size_kb: 1,
            max_value_size_kb: 64,
            ..quiet_params()
        };
        let (fs, store) = memory_store(params);
        let key = key("Meshes", "single");
        let data = incompressible(8 * 1024, 3);
        let record = record_with(&key, &[("only", &data)]);

        store.put_record("t", &record, &default_policy(), false);
        assert!(!fs.exists(&content_path(&ddc_record::ContentHash::of(&data))));
    }

    #[test]
    fn test_missing_external_content_is_a_miss_unless_partial() {
        let params = StoreParams {
            max_record_size_kb: 1,
            ..quiet_params()
        };
        let (fs, store) = memory_store(params);
        let key = key("Meshes", "partial");
        let big = incompressible(4 * 1024, 4);
        let record = record_with(&key, &[("big", &big), ("tiny", b"t")]);
        store.put_record("t", &record, &default_policy(), false);

        let big_hash = ddc_record::ContentHash::of(&big);
        fs.remove_file(&content_path(&big_hash)).unwrap();

        assert_eq!(store.get_record("t", &key, &default_policy()), RecordFetch::Miss);

        let partial = RecordPolicy::uniform(CachePolicy::DEFAULT | CachePolicy::PARTIAL_RECORD);
        match store.get_record("t", &key, &partial) {
            RecordFetch::Partial(fetched) => {
                let big_payload = fetched.find_payload(ValueId::from_name("big")).unwrap();
                assert!(!big_payload.has_data());
                assert!(fetched.find_payload(ValueId::from_name("tiny")).unwrap().has_data());
            }
            other => panic!("expected partial record, got {other:?}"),
        }
    }

    #[test]
    fn test_value_policy_skips_one_value() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Meshes", "overlay");
        let record = record_with(&key, &[("keep", b"keep-bytes"), ("skip", b"skip-bytes")]);
        store.put_record("t", &record, &default_policy(), false);

        let mut builder = RecordPolicyBuilder::new(CachePolicy::DEFAULT);
        builder
            .add_value_policy(ValueId::from_name("skip"), CachePolicy::DEFAULT | CachePolicy::SKIP_DATA)
            .unwrap();
        let fetched = store.get_record("t", &key, &builder.build()).into_record().unwrap();
        assert!(fetched.find_payload(ValueId::from_name("keep")).unwrap().has_data());
        assert!(!fetched.find_payload(ValueId::from_name("skip")).unwrap().has_data());
    }

    #[test]
    fn test_existing_record_is_kept() {
        let (fs, store) = memory_store(quiet_params());
        let key = key("Anim", "keep");
        let first = record_with(&key, &[("v", b"first")]);
        let second = record_with(&key, &[("v", b"second")]);

        store.put_record("t", &first, &default_policy(), false);
        assert_eq!(store.put_record("t", &second, &default_policy(), false), PutStatus::Cached);
        assert_eq!(store.get_record("t", &key, &default_policy()), RecordFetch::Hit(first));

        assert_eq!(store.put_record("t", &second, &default_policy(), true), PutStatus::Cached);
        assert_eq!(store.get_record("t", &key, &default_policy()), RecordFetch::Hit(second));
        assert!(fs.exists(&Path::new("/store").join(paths::record_path(&key))));
    }

    #[test]
    fn test_existing_record_missing_content_is_replaced() {
        let params = StoreParams {
            max_record_size_kb: 1,
            ..quiet_params()
        };
        let (fs, store) = memory_store(params);
        let key = key("Anim", "replace");
        let old_big = incompressible(4 * 1024, 5);
        let first = record_with(&key, &[("big", &old_big), ("tiny", b"a")]);
        store.put_record("t", &first, &default_policy(), false);
        fs.remove_file(&content_path(&ddc_record::ContentHash::of(&old_big))).unwrap();

        let new_big = incompressible(4 * 1024, 6);
        let second = record_with(&key, &[("big", &new_big), ("tiny", b"a")]);
        assert_eq!(store.put_record("t", &second, &default_policy(), false), PutStatus::Cached);
        assert_eq!(store.get_record("t", &key, &default_policy()), RecordFetch::Hit(second));
    }

    #[test]
    fn test_hollow_put_reuses_existing_attachments() {
        let (_fs, store) = memory_store(quiet_params());
        let key = key("Anim", "hollow");
        let full = record_with(&key, &[("v", b"value-bytes")]);
        store.put_record("t", &full, &default_policy(), false);

        let hollow = {
            let mut builder = RecordBuilder::new(key.clone());
            builder.set_value(full.value().unwrap().remove_data()).unwrap();
            builder.build()
        };
        assert_eq!(store.put_record("t", &hollow, &default_policy(), true), PutStatus::Cached);
        assert_eq!(store.get_record("t", &key, &default_policy()), RecordFetch::Hit(full));
    }

    #[test]
    fn test_corrupt_package_is_deleted() {
        let (fs, store) = memory_store(quiet_params());
        let key = key("Anim", "corrupt");
        store.put_record("t", &record_with(&key, &[("v", b"x")]), &default_policy(), false);
        let path = Path::new("/store").join(paths::record_path(&key));

        // Valid envelope around bytes that are not a package.
        let garbage = b"not a package".to_vec();
        let mut contents = garbage.clone();
        contents.extend_from_slice(ddc_record::ContentHash::of(&garbage).as_bytes());
        fs.corrupt(&path, contents).unwrap();

        assert_eq!(store.get_record("t", &key, &default_policy()), RecordFetch::Miss);
        assert!(!fs.exists(&path));
    }

    #[test]
    fn test_read_only_put_leaves_filesystem_unchanged() {
        let (fs, store) = memory_store(quiet_params().with_read_only(true));
        let key = key("Anim", "ro");
        let record = record_with(&key, &[("v", b"x")]);
        assert_eq!(store.put_record("t", &record, &default_policy(), false), PutStatus::NotCached);
        assert!(fs.file_paths().is_empty());
    }
}
