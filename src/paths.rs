//! Mapping from cache keys to relative file paths.
//!
//! Two schemes coexist:
//! - legacy string keys: `<d1>/<d2>/<d3>/<UPPER_KEY>.ddc`, where the digits
//!   come from a CRC-32 of the upper-cased key
//! - records and content: `Buckets/<bucket>/<xx>/<xx>/<rest>.ddc` and
//!   `Content/<xx>/<xx>/<rest>.ddc`, where the two shard directories are
//!   the first two hash bytes in hex and the file name is the remainder
//!
//! Everything here is pure; paths are relative to the store root and use
//! `/` separators.

use std::sync::OnceLock;

use ddc_record::{CacheKey, ContentHash, MAX_BUCKET_LEN};
use regex_lite::Regex;

use crate::error::{StoreError, StoreResult};

/// Extension of every cache file.
pub const FILE_EXTENSION: &str = "ddc";

/// Directory holding one subdirectory per bucket.
pub const BUCKETS_DIR: &str = "Buckets";

/// Directory holding content blobs.
pub const CONTENT_DIR: &str = "Content";

/// Longest legacy key accepted.
pub const MAX_LEGACY_KEY_LENGTH: usize = 120;

/// Longest relative path any scheme can produce.
pub const MAX_RELATIVE_PATH_LENGTH: usize = {
    let legacy = "0/0/0/".len() + MAX_LEGACY_KEY_LENGTH + 1 + FILE_EXTENSION.len();
    let record = BUCKETS_DIR.len() + 1 + MAX_BUCKET_LEN + "/00/00/".len()
        + 2 * (ContentHash::SIZE - 2)
        + 1
        + FILE_EXTENSION.len();
    if legacy > record {
        legacy
    } else {
        record
    }
};

fn is_valid_legacy_key(key: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_$]+$").ok())
        .as_ref()
        .map_or(false, |pattern| pattern.is_match(key))
}

/// Path of a legacy key-addressed file.
pub fn legacy_key_path(key: &str) -> StoreResult<String> {
    if key.len() > MAX_LEGACY_KEY_LENGTH || !is_valid_legacy_key(key) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    let upper = key.to_ascii_uppercase();
    let crc = crc32fast::hash(upper.as_bytes());
    Ok(format!(
        "{}/{}/{}/{upper}.{FILE_EXTENSION}",
        (crc / 100) % 10,
        (crc / 10) % 10,
        crc % 10
    ))
}

/// Path of a record package.
pub fn record_path(key: &CacheKey) -> String {
    format!(
        "{BUCKETS_DIR}/{}/{}",
        key.bucket,
        sharded_hash_path(&key.hash)
    )
}

/// Path of a content blob.
pub fn content_path(hash: &ContentHash) -> String {
    format!("{CONTENT_DIR}/{}", sharded_hash_path(hash))
}

fn sharded_hash_path(hash: &ContentHash) -> String {
    let bytes = hash.as_bytes();
    format!(
        "{:02x}/{:02x}/{}.{FILE_EXTENSION}",
        bytes[0],
        bytes[1],
        hex::encode(&bytes[2..])
    )
}
