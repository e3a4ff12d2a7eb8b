//! [`FileSystem`] backed by `std::fs`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

use super::{DirEntry, FileStat, FileSystem};

/// Number of attempts to open a file for writing. A concurrent janitor may
/// delete a freshly created empty parent directory between attempts.
const WRITE_OPEN_ATTEMPTS: usize = 3;

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }

    fn create_file(path: &Path) -> io::Result<File> {
        let mut last_error = None;
        for _ in 0..WRITE_OPEN_ATTEMPTS {
            match File::create(path) {
                Ok(file) => return Ok(file),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotFound)))
    }
}

fn to_stat(metadata: &fs::Metadata) -> FileStat {
    FileStat {
        size: metadata.len(),
        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        is_dir: metadata.is_dir(),
    }
}

impl FileSystem for LocalFileSystem {
    fn stat(&self, path: &Path) -> Option<FileStat> {
        fs::metadata(path).ok().map(|metadata| to_stat(&metadata))
    }

    fn set_modified(&self, path: &Path, time: SystemTime) -> io::Result<()> {
        OpenOptions::new().write(true).open(path)?.set_modified(time)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = Self::create_file(path)?;
        file.write_all(data)?;
        file.flush()
    }

    fn rename(&self, from: &Path, to: &Path, replace_existing: bool) -> io::Result<()> {
        if replace_existing {
            return fs::rename(from, to);
        }
        // A hard link never replaces its target, which makes it an atomic
        // create-if-absent. Fall back to check-then-rename where links are
        // unsupported.
        match fs::hard_link(from, to) {
            Ok(()) => {
                let _ = fs::remove_file(from);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
            Err(_) => {
                if to.exists() {
                    return Err(io::Error::from(io::ErrorKind::AlreadyExists));
                }
                fs::rename(from, to)
            }
        }
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            // Entries deleted while iterating are skipped.
            if let Ok(metadata) = entry.metadata() {
                entries.push(DirEntry {
                    path: entry.path(),
                    stat: to_stat(&metadata),
                });
            }
        }
        Ok(entries)
    }
}
