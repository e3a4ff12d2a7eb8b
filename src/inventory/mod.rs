//! Store inventory
//!
//! Walks a store root and tallies the files under each layout: record
//! packages per bucket, content blobs, legacy key files, and temp files left
//! behind by interrupted writes.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::atomic::TEMP_FILE_PREFIX;
use crate::error::{StoreError, StoreResult};
use crate::paths::{BUCKETS_DIR, CONTENT_DIR};

/// File count and total size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileTally {
    pub files: u64,
    pub bytes: u64,
}

impl FileTally {
    fn add(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }
}

/// What a store root holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub root: PathBuf,
    /// Record packages, keyed by bucket name.
    pub buckets: BTreeMap<String, FileTally>,
    pub records: FileTally,
    pub content: FileTally,
    pub legacy: FileTally,
    pub temp: FileTally,
    /// Files outside the known layouts, including speed test data.
    pub other: FileTally,
}

impl Inventory {
    pub fn total(&self) -> FileTally {
        [self.records, self.content, self.legacy, self.temp, self.other]
            .iter()
            .fold(FileTally::default(), |mut sum, tally| {
                sum.files += tally.files;
                sum.bytes += tally.bytes;
                sum
            })
    }
}

/// Walk `root` and tally every file under it.
///
/// A missing root is an empty inventory.
pub fn collect(root: &Path) -> StoreResult<Inventory> {
    let mut inventory = Inventory {
        root: root.to_path_buf(),
        ..Inventory::default()
    };
    if !root.exists() {
        return Ok(inventory);
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            StoreError::io(path, io::Error::from(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|e| StoreError::io(entry.path(), io::Error::from(e)))?
            .len();
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        let is_temp = entry
            .file_name()
            .to_str()
            .map_or(false, |name| name.starts_with(TEMP_FILE_PREFIX));
        if is_temp {
            inventory.temp.add(size);
            continue;
        }

        let parts: Vec<&str> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        match parts.as_slice() {
            [BUCKETS_DIR, bucket, _, _, _] => {
                inventory.records.add(size);
                inventory.buckets.entry((*bucket).to_string()).or_default().add(size);
            }
            [CONTENT_DIR, _, _, _] => inventory.content.add(size),
            [first, _, _, _] if is_digit(first) => inventory.legacy.add(size),
            _ => inventory.other.add(size),
        }
    }
    Ok(inventory)
}

fn is_digit(part: &str) -> bool {
    part.len() == 1 && part.as_bytes()[0].is_ascii_digit()
}
