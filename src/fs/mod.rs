//! Filesystem access for the cache store.
//!
//! The store, calibrator and janitor only touch the disk through the
//! [`FileSystem`] trait so that tests can swap in [`MemoryFileSystem`] and
//! control modification times directly.

mod local;
mod memory;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Metadata for one file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: SystemTime,
    pub is_dir: bool,
}

/// One entry returned by [`FileSystem::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    pub stat: FileStat,
}

impl DirEntry {
    /// Final path component as UTF-8, if it is valid UTF-8.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// Operations the store needs from a filesystem.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Metadata for `path`, or `None` if it does not exist.
    fn stat(&self, path: &Path) -> Option<FileStat>;

    fn set_modified(&self, path: &Path, time: SystemTime) -> io::Result<()>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create or truncate `path` and write `data`, creating missing parent
    /// directories.
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Move `from` to `to`. Without `replace_existing` the move fails with
    /// [`io::ErrorKind::AlreadyExists`] when `to` exists, and never replaces it.
    fn rename(&self, from: &Path, to: &Path, replace_existing: bool) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Immediate children of a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_some()
    }
}
