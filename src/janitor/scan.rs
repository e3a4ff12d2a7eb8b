//! One janitor pass over the store tree.
//!
//! Every modern root (`Content/` and each `Buckets/<bucket>/`) is a 256x256
//! grid of leaf shards; the legacy layout is a 10x10x10 grid of decimal
//! directories directly under the store root. A pass repeatedly picks a
//! random root and visits its next shard in that root's shuffled order,
//! discovering which shard directories exist lazily, one parent directory
//! listing at a time.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::random::{RandomOrder, RandomStream};
use super::{Control, JanitorParams, ScanSummary};
use crate::fs::{DirEntry, FileSystem};
use crate::paths::{BUCKETS_DIR, CONTENT_DIR};

const HASH_FANOUT: usize = 256;
const LEGACY_FANOUT: usize = 10;
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Scan state for `Content/` or one bucket directory.
struct HashRoot {
    path: PathBuf,
    order: RandomOrder<{ 256 * 256 }, { 256 * 256 }>,
    level0: Option<[bool; HASH_FANOUT]>,
    level1: Vec<Option<[bool; HASH_FANOUT]>>,
    scanned: u32,
}

/// Scan state for the decimal `d/d/d` layout under the store root.
struct LegacyRoot {
    path: PathBuf,
    order: RandomOrder<1024, 1000>,
    level0: Option<[bool; LEGACY_FANOUT]>,
    level1: [Option<[bool; LEGACY_FANOUT]>; LEGACY_FANOUT],
    level2: [Option<[bool; LEGACY_FANOUT]>; LEGACY_FANOUT * LEGACY_FANOUT],
    scanned: u32,
}

enum ScanRoot {
    Hash(Box<HashRoot>),
    Legacy(Box<LegacyRoot>),
}

fn parse_hex_shard(name: &str) -> Option<usize> {
    if name.len() != 2 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    usize::from_str_radix(name, 16).ok()
}

fn parse_decimal_shard(name: &str) -> Option<usize> {
    match name.as_bytes() {
        [digit] if digit.is_ascii_digit() => Some(usize::from(digit - b'0')),
        _ => None,
    }
}

/// Walks the roots of one store for a single pass.
pub(super) struct Scanner<'a> {
    fs: &'a dyn FileSystem,
    root: &'a Path,
    params: &'a JanitorParams,
    control: &'a Control,
    started: Instant,
    window_start: Instant,
    processed: u32,
    summary: ScanSummary,
}

impl<'a> Scanner<'a> {
    pub(super) fn new(
        fs: &'a dyn FileSystem,
        root: &'a Path,
        params: &'a JanitorParams,
        control: &'a Control,
    ) -> Self {
        Self {
            fs,
            root,
            params,
            control,
            started: Instant::now(),
            window_start: Instant::now(),
            processed: 0,
            summary: ScanSummary::new(Utc::now()),
        }
    }

    fn exiting(&self) -> bool {
        self.control.exit.load(Ordering::Acquire)
    }

    /// Run the pass until every root is exhausted or an exit is requested.
    pub(super) fn scan(mut self, stream: &mut RandomStream) -> ScanSummary {
        let mut roots = self.discover_roots(stream);
        while !roots.is_empty() && !self.exiting() {
            let pick = stream.range(0, roots.len() as u32) as usize;
            let finished = match &mut roots[pick] {
                ScanRoot::Hash(root) => self.scan_hash_root(root),
                ScanRoot::Legacy(root) => self.scan_legacy_root(root),
            };
            if finished {
                roots.swap_remove(pick);
            }
        }
        self.summary.duration = self.started.elapsed();
        self.summary
    }

    fn discover_roots(&self, stream: &mut RandomStream) -> Vec<ScanRoot> {
        let mut roots = Vec::new();

        let content = self.root.join(CONTENT_DIR);
        if self.fs.stat(&content).is_some_and(|stat| stat.is_dir) {
            roots.push(self.hash_root(content, stream));
        }

        let buckets = self.root.join(BUCKETS_DIR);
        if let Ok(entries) = self.fs.read_dir(&buckets) {
            for entry in entries.into_iter().filter(|entry| entry.stat.is_dir) {
                roots.push(self.hash_root(entry.path, stream));
            }
        }

        let has_legacy = self.fs.read_dir(self.root).is_ok_and(|entries| {
            entries
                .iter()
                .any(|entry| entry.stat.is_dir && entry.file_name().and_then(parse_decimal_shard).is_some())
        });
        if has_legacy {
            roots.push(ScanRoot::Legacy(Box::new(LegacyRoot {
                path: self.root.to_path_buf(),
                order: RandomOrder::new(stream),
                level0: None,
                level1: [None; LEGACY_FANOUT],
                level2: [None; LEGACY_FANOUT * LEGACY_FANOUT],
                scanned: 0,
            })));
        }

        debug!(root = %self.root.display(), roots = roots.len(), "janitor pass starting");
        roots
    }

    fn hash_root(&self, path: PathBuf, stream: &mut RandomStream) -> ScanRoot {
        ScanRoot::Hash(Box::new(HashRoot {
            path,
            order: RandomOrder::new(stream),
            level0: None,
            level1: vec![None; HASH_FANOUT],
            scanned: 0,
        }))
    }

    /// Visit the next shard of a modern root. Returns true once the root
    /// is done for this pass.
    fn scan_hash_root(&mut self, root: &mut HashRoot) -> bool {
        let index = root.order.next();
        let l0 = index as usize / HASH_FANOUT;
        let l1 = index as usize % HASH_FANOUT;
        let mut scanned = false;

        let level0 = *root
            .level0
            .get_or_insert_with(|| self.list_shards(&root.path, parse_hex_shard, true));
        if level0[l0] {
            let dir0 = root.path.join(format!("{l0:02x}"));
            let level1 = *root.level1[l0].get_or_insert_with(|| self.list_shards(&dir0, parse_hex_shard, true));
            if level1[l1] {
                self.process_directory(&dir0.join(format!("{l1:02x}")));
                scanned = true;
            }
        }

        self.finish_step(index == root.order.first(), scanned, &mut root.scanned)
    }

    /// Visit the next shard of the legacy root.
    fn scan_legacy_root(&mut self, root: &mut LegacyRoot) -> bool {
        let index = root.order.next();
        let d0 = index as usize / 100 % 10;
        let d1 = index as usize / 10 % 10;
        let d2 = index as usize % 10;
        let mut scanned = false;

        // The store root itself is never removed.
        let level0 = *root
            .level0
            .get_or_insert_with(|| self.list_shards(&root.path, parse_decimal_shard, false));
        if level0[d0] {
            let dir0 = root.path.join(d0.to_string());
            let level1 = *root.level1[d0].get_or_insert_with(|| self.list_shards(&dir0, parse_decimal_shard, true));
            if level1[d1] {
                let dir1 = dir0.join(d1.to_string());
                let level2 = *root.level2[d0 * LEGACY_FANOUT + d1]
                    .get_or_insert_with(|| self.list_shards(&dir1, parse_decimal_shard, true));
                if level2[d2] {
                    self.process_directory(&dir1.join(d2.to_string()));
                    scanned = true;
                }
            }
        }

        self.finish_step(index == root.order.first(), scanned, &mut root.scanned)
    }

    fn finish_step(&self, cycle_complete: bool, scanned: bool, count: &mut u32) -> bool {
        if cycle_complete {
            return true;
        }
        if scanned {
            *count = count.saturating_add(1);
            return *count >= self.params.max_directory_scan_count;
        }
        false
    }

    /// Which shard subdirectories of `dir` exist. A directory with none is
    /// removed when `remove_if_empty` is set.
    fn list_shards<const N: usize>(
        &self,
        dir: &Path,
        parse: fn(&str) -> Option<usize>,
        remove_if_empty: bool,
    ) -> [bool; N] {
        let mut present = [false; N];
        let entries = match self.fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(dir = %dir.display(), error = %e, "janitor failed to list directory");
                }
                return present;
            }
        };

        let mut found = false;
        for entry in entries.iter().filter(|entry| entry.stat.is_dir) {
            if let Some(slot) = entry.file_name().and_then(parse).filter(|&slot| slot < N) {
                present[slot] = true;
                found = true;
            }
        }

        if !found && remove_if_empty {
            // Fails harmlessly when stray files remain.
            if self.fs.remove_dir(dir).is_ok() {
                trace!(dir = %dir.display(), "removed empty shard directory");
            }
        }
        present
    }

    fn process_directory(&mut self, dir: &Path) {
        let entries = match self.fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "janitor failed to list directory");
                return;
            }
        };
        self.summary.scanned_directories += 1;

        let mut all_deleted = true;
        for entry in &entries {
            if self.exiting() {
                all_deleted = false;
                break;
            }
            if entry.stat.is_dir {
                all_deleted = false;
                continue;
            }
            all_deleted &= self.process_file(entry);
        }

        if all_deleted && self.fs.remove_dir(dir).is_ok() {
            trace!(dir = %dir.display(), "removed empty leaf directory");
        }
        self.wait_for_rate_limit();
    }

    /// Delete `entry` if it has not been modified within the max file age.
    fn process_file(&mut self, entry: &DirEntry) -> bool {
        self.summary.checked_files += 1;
        let age = SystemTime::now()
            .duration_since(entry.stat.modified)
            .unwrap_or_default();

        let mut deleted = false;
        if age > self.params.max_file_age {
            match self.fs.remove_file(&entry.path) {
                Ok(()) => {
                    deleted = true;
                    self.summary.deleted_files += 1;
                    self.summary.deleted_bytes += entry.stat.size;
                    trace!(
                        path = %entry.path.display(),
                        modified = %DateTime::<Utc>::from(entry.stat.modified).to_rfc3339(),
                        size = entry.stat.size,
                        "deleted unused file"
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    debug!(path = %entry.path.display(), error = %e, "janitor failed to delete file");
                }
            }
        }

        self.wait_for_rate_limit();
        deleted
    }

    /// Sleep out the rest of the current one-second window once
    /// `max_scan_rate` operations have been counted in it.
    fn wait_for_rate_limit(&mut self) {
        let rate = self.params.max_scan_rate;
        if rate == 0
            || rate == u32::MAX
            || self.exiting()
            || self.control.ignore_scan_rate.load(Ordering::Acquire)
        {
            return;
        }

        self.processed = self.processed.wrapping_add(1);
        if self.processed % rate != 0 {
            return;
        }
        if let Some(remaining) = RATE_WINDOW.checked_sub(self.window_start.elapsed()) {
            self.control.wake.wait_timeout(remaining);
        }
        self.window_start = Instant::now();
    }
}
