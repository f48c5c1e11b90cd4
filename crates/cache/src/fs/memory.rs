//! In-memory filesystem for deterministic tests.

use super::{CacheFs, DirEntry};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeSet<PathBuf>,
}

impl Tree {
    fn is_dir(&self, path: &Path) -> bool {
        path.as_os_str().is_empty() || self.dirs.contains(path)
    }

    fn mkdirs(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if !ancestor.as_os_str().is_empty() {
                self.dirs.insert(ancestor.to_path_buf());
            }
        }
    }
}

/// A [`CacheFs`] that keeps everything in memory.
///
/// Paths are normalized by dropping `.` components, so `./a.yaml` and
/// `a.yaml` name the same file. The empty path is the always-present root.
/// Empty directories are tracked explicitly.
#[derive(Debug, Default)]
pub struct MemoryFs {
    tree: Mutex<Tree>,
}

fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

impl MemoryFs {
    /// Create an empty filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a file, creating its parent directories as needed.
    pub fn insert_file(&self, path: impl AsRef<Path>, contents: impl Into<String>) {
        let path = normalize(path.as_ref());
        let mut tree = self.tree();
        if let Some(parent) = path.parent() {
            tree.mkdirs(parent);
        }
        tree.files.insert(path, contents.into());
    }

    /// Create a directory and its parents.
    pub fn insert_dir(&self, path: impl AsRef<Path>) {
        self.tree().mkdirs(&normalize(path.as_ref()));
    }

    /// Contents of a file, if it exists.
    #[must_use]
    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.tree().files.get(&normalize(path.as_ref())).cloned()
    }

    /// Whether a file exists.
    #[must_use]
    pub fn contains_file(&self, path: impl AsRef<Path>) -> bool {
        self.tree().files.contains_key(&normalize(path.as_ref()))
    }

    /// Whether a directory exists.
    #[must_use]
    pub fn contains_dir(&self, path: impl AsRef<Path>) -> bool {
        self.tree().is_dir(&normalize(path.as_ref()))
    }

    /// Every file path, sorted.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        self.tree().files.keys().cloned().collect()
    }
}

#[async_trait]
impl CacheFs for MemoryFs {
    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let path = normalize(path);
        self.tree()
            .files
            .get(&path)
            .cloned()
            .ok_or_else(|| not_found(&path))
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let path = normalize(path);
        let mut tree = self.tree();
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        if !tree.is_dir(parent) {
            return Err(not_found(parent));
        }
        if tree.dirs.contains(&path) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path.display()),
            ));
        }
        tree.files.insert(path, contents.to_string());
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut tree = self.tree();
        if tree.files.contains_key(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a file", path.display()),
            ));
        }
        tree.mkdirs(&path);
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        self.tree()
            .files
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| not_found(&path))
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut tree = self.tree();
        if !tree.dirs.contains(&path) {
            return Err(not_found(&path));
        }
        tree.files.retain(|f, _| !f.starts_with(&path));
        tree.dirs.retain(|d| !d.starts_with(&path));
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let path = normalize(path);
        let tree = self.tree();
        if !tree.is_dir(&path) {
            return Err(not_found(&path));
        }
        let child_name = |p: &Path| -> Option<String> {
            (p.parent() == Some(path.as_path()))
                .then(|| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .flatten()
        };
        let mut entries: Vec<DirEntry> = tree
            .dirs
            .iter()
            .filter_map(|d| child_name(d))
            .map(|name| DirEntry { name, is_dir: true })
            .chain(
                tree.files
                    .keys()
                    .filter_map(|f| child_name(f))
                    .map(|name| DirEntry {
                        name,
                        is_dir: false,
                    }),
            )
            .collect();
        entries.sort();
        Ok(entries)
    }
}
