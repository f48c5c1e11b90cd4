//! Reading and writing persisted event logs.
//!
//! The event log of key `k` lives at `<root>/<k>.yaml`; nested keys become
//! nested directories. Lookup is best-effort: a missing or unreadable log is a
//! cache miss, never an error.

use crate::fs::CacheFs;
use crate::key::join_key;
use crate::{Error, Result};
use recast_events::PipelineEvent;
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};

/// Extension of every persisted cache file.
pub const CACHE_FILE_EXTENSION: &str = "yaml";

/// Relative path of the cache file for `key`.
#[must_use]
pub fn key_file(key: &str) -> PathBuf {
    PathBuf::from(format!("{key}.{CACHE_FILE_EXTENSION}"))
}

/// A persisted event log and the file it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Path of the cache file.
    pub path: PathBuf,
    /// The decoded event log.
    pub events: Vec<PipelineEvent>,
}

/// Load the persisted event log for `key` below `root`.
///
/// Tries `<root>/<key>.yaml` first. If it is missing, searches
/// `<root>/**/<key>.yaml` so that a cache whose root was moved up a level is
/// still found; the first match in path order wins.
///
/// # Errors
///
/// I/O errors other than "not found" are propagated.
pub async fn load(fs: &dyn CacheFs, root: &Path, key: &str) -> Result<Option<CacheEntry>> {
    let exact = root.join(key_file(key));
    let path = match fs.read_to_string(&exact).await {
        Ok(contents) => return Ok(entry(exact, &contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => relocated(fs, root, key).await?,
        Err(e) => return Err(Error::io(e, &exact, "read")),
    };
    let Some(path) = path else {
        return Ok(None);
    };
    match fs.read_to_string(&path).await {
        Ok(contents) => {
            tracing::debug!(key, path = %path.display(), "Found relocated cache entry");
            Ok(entry(path, &contents))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(e, &path, "read")),
    }
}

/// Load the event logs nested below the entry of `key`, keyed by their full
/// cache key and sorted. Corrupt files are skipped.
///
/// # Errors
///
/// I/O errors other than "not found" are propagated.
pub async fn load_nested(
    fs: &dyn CacheFs,
    entry: &CacheEntry,
    key: &str,
) -> Result<Vec<(String, Vec<PipelineEvent>)>> {
    let dir = entry.path.with_extension("");
    let files = fs
        .walk_files(&dir)
        .await
        .map_err(|e| Error::io(e, &dir, "walk"))?;

    let mut nested = Vec::new();
    for rel in files {
        if rel.extension().is_none_or(|ext| ext != CACHE_FILE_EXTENSION) {
            continue;
        }
        let path = dir.join(&rel);
        let contents = match fs.read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        if let Some(events) = parse(&path, &contents) {
            nested.push((join_key(key, &path_key(&rel.with_extension(""))), events));
        }
    }
    nested.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(nested)
}

/// A relative path rendered as a `/`-separated key.
pub(crate) fn path_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

async fn relocated(fs: &dyn CacheFs, root: &Path, key: &str) -> Result<Option<PathBuf>> {
    let pattern = format!(
        "**/{}",
        globset::escape(&key_file(key).to_string_lossy())
    );
    match fs.glob(root, &pattern).await {
        Ok(matches) => Ok(matches.into_iter().next().map(|rel| root.join(rel))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(e, root, "glob")),
    }
}

fn entry(path: PathBuf, contents: &str) -> Option<CacheEntry> {
    parse(&path, contents).map(|events| CacheEntry { path, events })
}

fn parse(path: &Path, contents: &str) -> Option<Vec<PipelineEvent>> {
    match serde_yaml::from_str::<Vec<PipelineEvent>>(contents) {
        Ok(events) => Some(events),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt cache entry");
            None
        }
    }
}

/// Extract the step result from an event log.
///
/// Returns the output of the last `Success` event if it decodes into `O`.
/// A log without one is treated as corrupt.
#[must_use]
pub fn decode_result<O: DeserializeOwned>(events: &[PipelineEvent]) -> Option<O> {
    events
        .iter()
        .rev()
        .find(|e| e.is_result())
        .and_then(|event| event.decode_output())
}

/// Persist the event log for `key` below `root`, creating directories.
///
/// # Errors
///
/// Returns serialization or I/O errors.
pub async fn store(
    fs: &dyn CacheFs,
    root: &Path,
    key: &str,
    events: &[PipelineEvent],
) -> Result<PathBuf> {
    let path = root.join(key_file(key));
    let yaml = serde_yaml::to_string(events)
        .map_err(|e| Error::serialization(format!("Failed to encode event log for {key}: {e}")))?;
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent)
            .await
            .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    }
    fs.write(&path, &yaml)
        .await
        .map_err(|e| Error::io(e, &path, "write"))?;
    tracing::debug!(key, path = %path.display(), events = events.len(), "Persisted event log");
    Ok(path)
}
