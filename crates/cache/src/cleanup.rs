//! Post-run garbage collection of stale cache entries.
//!
//! Cleanup walks the cache root one directory level at a time and removes
//! every `.yaml` file and directory that the run's execution log does not
//! reference. An entry is referenced when its key is in the log or is an
//! ancestor of a logged key.
//!
//! Keys match at any depth below the root, since a hit may be served from a
//! relocated entry (`**/<key>.yaml`). Directories are only descended into
//! when some logged key lies below them. A logged key whose directory has no
//! logged descendants is kept whole: the key was replayed and its children
//! were never visited in this run.
//!
//! Removal happens in two phases. The plan phase classifies every entry and
//! checks that each stale directory holds nothing but `.yaml` files; a single
//! foreign file fails the call before anything is deleted.

use crate::fs::CacheFs;
use crate::key::{ancestors, join_key};
use crate::persist::{CACHE_FILE_EXTENSION, path_key};
use crate::{Error, Result};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

/// What a cleanup pass removed, relative to the cache root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Stale cache files.
    pub files_removed: Vec<PathBuf>,
    /// Stale cache directories, removed recursively.
    pub dirs_removed: Vec<PathBuf>,
}

impl CleanupReport {
    /// Whether nothing was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files_removed.is_empty() && self.dirs_removed.is_empty()
    }
}

struct KeepSet<'a> {
    keys: HashSet<&'a str>,
    ancestors: HashSet<&'a str>,
}

impl<'a> KeepSet<'a> {
    fn new(log: &'a [String]) -> Self {
        Self {
            keys: log.iter().map(String::as_str).collect(),
            ancestors: log.iter().flat_map(|key| ancestors(key)).collect(),
        }
    }

    /// `rel` is a logged key, or ends in one after a `/`.
    fn is_key(&self, rel: &str) -> bool {
        matches_at_depth(&self.keys, rel)
    }

    fn is_ancestor(&self, rel: &str) -> bool {
        matches_at_depth(&self.ancestors, rel)
    }

    fn keeps(&self, rel: &str) -> bool {
        self.is_key(rel) || self.is_ancestor(rel)
    }

    /// Whether the file at `rel` must survive: it is a kept cache file or
    /// lies inside a kept key's directory.
    fn protects(&self, rel: &str) -> bool {
        if let Some(stem) = rel
            .strip_suffix(CACHE_FILE_EXTENSION)
            .and_then(|stem| stem.strip_suffix('.'))
            && self.keeps(stem)
        {
            return true;
        }
        rel.match_indices('/').any(|(idx, _)| self.is_key(&rel[..idx]))
    }
}

fn matches_at_depth(set: &HashSet<&str>, rel: &str) -> bool {
    set.contains(rel)
        || rel
            .match_indices('/')
            .any(|(idx, _)| set.contains(&rel[idx + 1..]))
}

/// Remove cache entries under `root` that `log` does not reference.
///
/// A missing root is not an error.
///
/// # Errors
///
/// Returns [`Error::CleanupSafety`] if a stale directory contains a file
/// that is not a `.yaml` cache file, and I/O errors from listing or removal.
pub async fn cleanup(fs: &dyn CacheFs, root: &Path, log: &[String]) -> Result<CleanupReport> {
    let keep = KeepSet::new(log);
    let mut stale = CleanupReport::default();
    let mut pending = vec![String::new()];

    while let Some(prefix) = pending.pop() {
        let dir = root.join(&prefix);
        let entries = match fs.read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound && prefix.is_empty() => {
                return Ok(stale);
            }
            Err(e) => return Err(Error::io(e, &dir, "read_dir")),
        };

        for entry in entries {
            let child = if prefix.is_empty() {
                entry.name.clone()
            } else {
                join_key(&prefix, &entry.name)
            };

            if entry.is_dir {
                if keep.is_ancestor(&child) {
                    pending.push(child);
                } else if !keep.is_key(&child) {
                    let dir = root.join(&child);
                    let files = fs
                        .walk_files(&dir)
                        .await
                        .map_err(|e| Error::io(e, &dir, "walk"))?;
                    if files
                        .iter()
                        .any(|f| keep.protects(&join_key(&child, &path_key(f))))
                    {
                        pending.push(child);
                    } else if ensure_only_cache_files(&dir, &files)? {
                        stale.dirs_removed.push(PathBuf::from(child));
                    }
                }
            } else if let Some(key) = entry
                .name
                .strip_suffix(CACHE_FILE_EXTENSION)
                .and_then(|stem| stem.strip_suffix('.'))
            {
                let key = if prefix.is_empty() {
                    key.to_string()
                } else {
                    join_key(&prefix, key)
                };
                if !keep.keeps(&key) {
                    stale.files_removed.push(PathBuf::from(child));
                }
            }
        }
    }

    stale.files_removed.sort();
    stale.dirs_removed.sort();

    for file in &stale.files_removed {
        let path = root.join(file);
        fs.remove_file(&path)
            .await
            .map_err(|e| Error::io(e, &path, "remove_file"))?;
    }
    for dir in &stale.dirs_removed {
        let path = root.join(dir);
        fs.remove_dir_all(&path)
            .await
            .map_err(|e| Error::io(e, &path, "remove_dir_all"))?;
    }

    if stale.is_empty() {
        tracing::debug!(root = %root.display(), "No stale cache entries");
    } else {
        tracing::info!(
            root = %root.display(),
            files = stale.files_removed.len(),
            dirs = stale.dirs_removed.len(),
            "Removed stale cache entries"
        );
    }
    Ok(stale)
}

/// Safety check for a stale directory, given its files.
///
/// Returns `false` for a directory without files, which is left alone.
fn ensure_only_cache_files(dir: &Path, files: &[PathBuf]) -> Result<bool> {
    if let Some(foreign) = files
        .iter()
        .find(|f| f.extension().is_none_or(|ext| ext != CACHE_FILE_EXTENSION))
    {
        tracing::error!(
            dir = %dir.display(),
            file = %foreign.display(),
            "Refusing to clean up directory with non-cache content"
        );
        return Err(Error::CleanupSafety {
            dir: dir.into(),
            file: foreign.as_path().into(),
        });
    }
    Ok(!files.is_empty())
}
