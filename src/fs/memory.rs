//! In-memory [`FileSystem`] for deterministic tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use super::{DirEntry, FileStat, FileSystem};

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, MemoryFile>,
    dirs: BTreeSet<PathBuf>,
}

impl MemoryState {
    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir.as_os_str().is_empty() || !self.dirs.insert(dir.to_path_buf()) {
                break;
            }
            parent = dir.parent();
        }
    }

    fn has_children(&self, dir: &Path) -> bool {
        let is_child = |path: &Path| path.parent() == Some(dir);
        self.files.keys().any(|p| is_child(p.as_path()))
            || self.dirs.iter().any(|p| is_child(p.as_path()))
    }
}

/// A filesystem held entirely in memory.
///
/// Directories are created implicitly by writes, like a real filesystem
/// with `create_dir_all`.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    state: Mutex<MemoryState>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> io::Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory filesystem lock poisoned"))
    }

    /// Create an empty directory and its parents.
    pub fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        state.add_parents(path);
        state.dirs.insert(path.to_path_buf());
        Ok(())
    }

    /// Overwrite the bytes of an existing file without changing its mtime.
    pub fn corrupt(&self, path: &Path, data: Vec<u8>) -> io::Result<()> {
        let mut state = self.state()?;
        let file = state
            .files
            .get_mut(path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        file.data = data;
        Ok(())
    }

    /// Every file path currently stored, in sorted order.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.state()
            .map(|state| state.files.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl FileSystem for MemoryFileSystem {
    fn stat(&self, path: &Path) -> Option<FileStat> {
        let state = self.state().ok()?;
        if let Some(file) = state.files.get(path) {
            return Some(FileStat {
                size: file.data.len() as u64,
                modified: file.modified,
                is_dir: false,
            });
        }
        state.dirs.contains(path).then_some(FileStat {
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
            is_dir: true,
        })
    }

    fn set_modified(&self, path: &Path, time: SystemTime) -> io::Result<()> {
        let mut state = self.state()?;
        let file = state
            .files
            .get_mut(path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        file.modified = time;
        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let state = self.state()?;
        state
            .files
            .get(path)
            .map(|file| file.data.clone())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut state = self.state()?;
        if state.dirs.contains(path) {
            return Err(io::Error::new(io::ErrorKind::Other, "path is a directory"));
        }
        state.add_parents(path);
        state.files.insert(
            path.to_path_buf(),
            MemoryFile {
                data: data.to_vec(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path, replace_existing: bool) -> io::Result<()> {
        let mut state = self.state()?;
        if !state.files.contains_key(from) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        if !replace_existing && (state.files.contains_key(to) || state.dirs.contains(to)) {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists));
        }
        if let Some(file) = state.files.remove(from) {
            state.add_parents(to);
            state.files.insert(to.to_path_buf(), file);
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        if !state.dirs.contains(path) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        if state.has_children(path) {
            return Err(io::Error::new(io::ErrorKind::Other, "directory not empty"));
        }
        state.dirs.remove(path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        if !state.dirs.contains(path) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        state.files.retain(|p, _| !p.starts_with(path));
        state.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let state = self.state()?;
        if !state.dirs.contains(path) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        let mut entries: Vec<DirEntry> = state
            .dirs
            .iter()
            .filter(|p| p.parent() == Some(path))
            .map(|p| DirEntry {
                path: p.clone(),
                stat: FileStat {
                    size: 0,
                    modified: SystemTime::UNIX_EPOCH,
                    is_dir: true,
                },
            })
            .collect();
        entries.extend(
            state
                .files
                .iter()
                .filter(|(p, _)| p.parent() == Some(path))
                .map(|(p, file)| DirEntry {
                    path: p.clone(),
                    stat: FileStat {
                        size: file.data.len() as u64,
                        modified: file.modified,
                        is_dir: false,
                    },
                }),
        );
        Ok(entries)
    }
}
