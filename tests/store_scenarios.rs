//! Store scenarios against a real directory tree.

use std::fs;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use ddc_store::paths;
use ddc_store::{
    Bucket, CachePolicy, CacheKey, ContentHash, LocalFileSystem, Payload, PutStatus, Record, RecordBuilder,
    RecordPolicy, RecordStore, StoreParams, Value, ValueId,
};

fn make_params(temp_dir: &TempDir) -> StoreParams {
    StoreParams::default()
        .with_path(temp_dir.path().join("ddc"))
        .quiet()
}

fn open(params: StoreParams) -> RecordStore {
    let root = params.path.clone().unwrap();
    RecordStore::new(root, params, Arc::new(LocalFileSystem::new())).unwrap()
}

fn make_key(seed: &str) -> CacheKey {
    CacheKey::new(Bucket::new("ShaderCode").unwrap(), ContentHash::of(seed.as_bytes()))
}

fn make_record(key: &CacheKey, value: &[u8], attachments: &[(&str, Vec<u8>)]) -> Record {
    let mut builder = RecordBuilder::new(key.clone());
    builder.set_meta(serde_json::json!({ "platform": "linux" }));
    builder
        .set_value(Payload::new(ValueId::from_name("Output"), Value::from_raw(value)))
        .unwrap();
    for (name, data) in attachments {
        builder
            .add_attachment(Payload::new(ValueId::from_name(name), Value::from_raw(data)))
            .unwrap();
    }
    builder.build()
}

/// Bytes that do not compress, so packages keep their size.
fn noise(len: usize, seed: u64) -> Vec<u8> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

// =============================================================================
// Test 1: A cold miss becomes a hit after a put
// =============================================================================

#[test]
fn test_cold_miss_then_hit() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(make_params(&temp_dir));
    let key = make_key("cold");
    let policy = RecordPolicy::default();

    assert!(!store.exists(&key));
    assert!(!store.get_record("cold", &key, &policy).is_hit());

    let record = make_record(&key, b"object code", &[]);
    assert_eq!(store.put_record("cold", &record, &policy, false), PutStatus::Cached);

    assert!(store.exists(&key));
    let fetched = store.get_record("cold", &key, &policy).into_record().unwrap();
    assert_eq!(fetched, record);
    assert!(store.root().join(paths::record_path(&key)).is_file());
}

// =============================================================================
// Test 2: A read-only store serves hits and refuses writes
// =============================================================================

#[test]
fn test_read_only_store() {
    let temp_dir = TempDir::new().unwrap();
    let key = make_key("readonly");
    let record = make_record(&key, b"shared artifact", &[]);
    {
        let store = open(make_params(&temp_dir));
        store.put_record("seed", &record, &RecordPolicy::default(), false);
    }

    let store = open(make_params(&temp_dir).with_read_only(true));
    assert!(!store.is_writable());
    assert!(!store.capabilities().intersects(CachePolicy::STORE));
    assert!(store.get_record("read", &key, &RecordPolicy::default()).is_hit());

    let other = make_record(&make_key("other"), b"new", &[]);
    assert_eq!(store.put_record("write", &other, &RecordPolicy::default(), false), PutStatus::NotCached);
    assert!(!store.exists(other.key()));
}

// =============================================================================
// Test 3: Payloads past the record budget spill into content files
// =============================================================================

#[test]
fn test_large_attachment_spills_to_content() {
    let temp_dir = TempDir::new().unwrap();
    let mut params = make_params(&temp_dir);
    params.max_record_size_kb = 4;
    let store = open(params);

    let big = noise(64 * 1024, 1);
    let key = make_key("spill");
    let record = make_record(&key, b"small", &[("Debug", big.clone())]);
    assert_eq!(store.put_record("spill", &record, &RecordPolicy::default(), false), PutStatus::Cached);

    let content_file = store.root().join(paths::content_path(&ContentHash::of(&big)));
    assert!(content_file.is_file(), "large attachment should be a content file");
    let package_size = fs::metadata(store.root().join(paths::record_path(&key))).unwrap().len();
    assert!(package_size < 8 * 1024, "package should not carry the attachment: {package_size}");

    let fetched = store.get_record("spill", &key, &RecordPolicy::default()).into_record().unwrap();
    let attachment = fetched.find_payload(ValueId::from_name("Debug")).unwrap();
    assert_eq!(attachment.data().unwrap().decompress().unwrap(), big);
}

// =============================================================================
// Test 4: Corrupt files are misses and get replaced
// =============================================================================

#[test]
fn test_corrupt_record_self_heals() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(make_params(&temp_dir));
    let key = make_key("corrupt");
    let record = make_record(&key, b"will be damaged", &[]);
    store.put_record("first", &record, &RecordPolicy::default(), false);

    let path = store.root().join(paths::record_path(&key));
    let mut bytes = fs::read(&path).unwrap();
    bytes[0] ^= 0xff;
    fs::write(&path, bytes).unwrap();

    assert!(!store.get_record("damaged", &key, &RecordPolicy::default()).is_hit());
    assert!(!path.exists(), "corrupt file should be deleted");

    assert_eq!(store.put_record("again", &record, &RecordPolicy::default(), false), PutStatus::Cached);
    assert!(store.get_record("healed", &key, &RecordPolicy::default()).is_hit());
}

#[test]
fn test_missing_content_is_a_miss() {
    let temp_dir = TempDir::new().unwrap();
    let mut params = make_params(&temp_dir);
    params.max_record_size_kb = 1;
    let store = open(params);

    let big = noise(16 * 1024, 2);
    let key = make_key("orphan");
    store.put_record("put", &make_record(&key, b"v", &[("Blob", big.clone())]), &RecordPolicy::default(), false);
    fs::remove_file(store.root().join(paths::content_path(&ContentHash::of(&big)))).unwrap();

    assert!(!store.get_record("get", &key, &RecordPolicy::default()).is_hit());
    let partial = store.get_record("partial", &key, &RecordPolicy::uniform(CachePolicy::DEFAULT | CachePolicy::PARTIAL_RECORD));
    let record = partial.record().unwrap();
    assert!(!record.find_payload(ValueId::from_name("Blob")).unwrap().has_data());
}

// =============================================================================
// Test 5: Concurrent writers of one key all succeed
// =============================================================================

#[test]
fn test_concurrent_puts_of_same_key() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(open(make_params(&temp_dir)));
    let key = make_key("race");
    let record = make_record(&key, &noise(4096, 3), &[]);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let record = record.clone();
            thread::spawn(move || store.put_record(&format!("writer-{i}"), &record, &RecordPolicy::default(), false))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), PutStatus::Cached);
    }

    let fetched = store.get_record("reader", &key, &RecordPolicy::default()).into_record().unwrap();
    assert_eq!(fetched, record);

    let leftovers: Vec<_> = walkdir::WalkDir::new(store.root())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(ddc_store::atomic::TEMP_FILE_PREFIX))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}

// =============================================================================
// Test 6: Data survives a restart
// =============================================================================

#[test]
fn test_restart_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let key = make_key("restart");
    let value_key = make_key("restart-value");
    let record = make_record(&key, b"persisted", &[("Extra", b"more".to_vec())]);
    {
        let store = open(make_params(&temp_dir));
        store.put_record("put", &record, &RecordPolicy::default(), false);
        store.put_cache_value("value", &value_key, &Value::from_raw(b"single"), CachePolicy::DEFAULT);
        store.legacy_put("OLD_STYLE", b"legacy bytes", false).unwrap();
    }

    let store = open(make_params(&temp_dir));
    assert_eq!(store.get_record("get", &key, &RecordPolicy::default()).into_record(), Some(record));
    let value = store.get_cache_value("value", &value_key, CachePolicy::DEFAULT).unwrap();
    assert_eq!(value.data().unwrap().decompress().unwrap(), b"single");
    assert_eq!(store.legacy_get("OLD_STYLE").unwrap(), Some(b"legacy bytes".to_vec()));

    let inventory = ddc_store::inventory::collect(store.root()).unwrap();
    assert_eq!(inventory.records.files, 2);
    assert_eq!(inventory.legacy.files, 1);
    assert_eq!(inventory.temp.files, 0);
}

#[test]
fn test_flush_empties_existing_store() {
    let temp_dir = TempDir::new().unwrap();
    let key = make_key("flush");
    {
        let store = open(make_params(&temp_dir));
        store.put_record("put", &make_record(&key, b"gone soon", &[]), &RecordPolicy::default(), false);
    }

    let mut params = make_params(&temp_dir);
    params.flush = true;
    let store = open(params);
    assert!(!store.exists(&key));
}
