//! Filesystem access used by persistence and cleanup.
//!
//! [`OsFs`] is the real filesystem; [`MemoryFs`] is an in-memory tree used to
//! test the engine without touching disk.

mod memory;
mod os;

pub use memory::MemoryFs;
pub use os::OsFs;

use async_trait::async_trait;
use globset::GlobBuilder;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// A directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    /// File or directory name.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Asynchronous filesystem operations needed by the cache.
#[async_trait]
pub trait CacheFs: Send + Sync + fmt::Debug {
    /// Read a whole file as UTF-8.
    async fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Create or truncate a file with `contents`. The parent must exist.
    async fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Create a directory and all of its parents.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Remove a file.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory and everything below it.
    async fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// List the direct children of a directory, sorted by name.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Every file below `root`, as paths relative to `root`, sorted.
    ///
    /// A missing root yields an empty list.
    async fn walk_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![PathBuf::new()];
        while let Some(rel) = pending.pop() {
            let entries = match self.read_dir(&root.join(&rel)).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                let child = rel.join(&entry.name);
                if entry.is_dir {
                    pending.push(child);
                } else {
                    files.push(child);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Files below `root` whose relative path matches the glob `pattern`.
    ///
    /// `*` does not cross directory separators; `**` does. Results are
    /// relative to `root` and sorted.
    async fn glob(&self, root: &Path, pattern: &str) -> io::Result<Vec<PathBuf>> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
            .compile_matcher();
        let files = self.walk_files(root).await?;
        Ok(files.into_iter().filter(|f| matcher.is_match(f)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_glob_respects_separators() {
        let fs = MemoryFs::new();
        fs.insert_file("cache/a-1234.yaml", "[]");
        fs.insert_file("cache/a-1234/b-5678.yaml", "[]");
        fs.insert_file("cache/old/a-1234.yaml", "[]");

        let root = Path::new("cache");
        assert_eq!(
            fs.glob(root, "*.yaml").await.unwrap(),
            vec![PathBuf::from("a-1234.yaml")]
        );
        assert_eq!(
            fs.glob(root, "**/a-1234.yaml").await.unwrap(),
            vec![PathBuf::from("a-1234.yaml"), PathBuf::from("old/a-1234.yaml")]
        );
    }

    #[tokio::test]
    async fn test_walk_missing_root_is_empty() {
        let fs = MemoryFs::new();
        assert!(fs.walk_files(Path::new("nope")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_glob_is_invalid_input() {
        let fs = MemoryFs::new();
        let err = fs.glob(Path::new("."), "a[").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
