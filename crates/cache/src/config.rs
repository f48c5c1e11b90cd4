//! Run configuration for the cached pipeline engine.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming the cache location.
pub const ENV_CACHE_DIR: &str = "RECAST_CACHE_DIR";
/// Environment variable toggling persistence (`0`, `false`, `no`, `off` disable it).
pub const ENV_CACHE_SAVE: &str = "RECAST_CACHE_SAVE";
/// Environment variable with comma-separated allow-list patterns.
pub const ENV_CACHE_ENABLE: &str = "RECAST_CACHE_ENABLE";
/// Environment variable with comma-separated deny-list patterns.
pub const ENV_CACHE_DISABLE: &str = "RECAST_CACHE_DISABLE";

/// Cache configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Root directory of the cache. Without it nothing is read from or
    /// written to disk, but results are still memoized for the run.
    pub location: Option<PathBuf>,

    /// Persist newly computed results. When false the cache is read-only and
    /// cleanup never runs.
    pub save_to_cache: bool,

    /// If non-empty, only steps matching one of these patterns use the cache.
    pub enable_cache_for: Vec<String>,

    /// Steps matching one of these patterns always execute.
    pub disable_cache_for: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location: None,
            save_to_cache: true,
            enable_cache_for: Vec::new(),
            disable_cache_for: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Configuration with a cache location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Never persist new results.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.save_to_cache = false;
        self
    }

    /// Restrict caching to steps matching `patterns`.
    #[must_use]
    pub fn enable_cache_for<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enable_cache_for = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Bypass the cache for steps matching `patterns`.
    #[must_use]
    pub fn disable_cache_for<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disable_cache_for = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Whether results will be written to disk.
    #[must_use]
    pub fn persists(&self) -> bool {
        self.save_to_cache && self.location.is_some()
    }

    /// Read the configuration from `RECAST_CACHE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `RECAST_CACHE_SAVE` is not a boolean.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_blank = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());

        let save_to_cache = match non_blank(ENV_CACHE_SAVE) {
            Some(value) => parse_bool(ENV_CACHE_SAVE, &value)?,
            None => true,
        };

        Ok(Self {
            location: non_blank(ENV_CACHE_DIR).map(PathBuf::from),
            save_to_cache,
            enable_cache_for: non_blank(ENV_CACHE_ENABLE)
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            disable_cache_for: non_blank(ENV_CACHE_DISABLE)
                .map(|s| split_list(&s))
                .unwrap_or_default(),
        })
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::configuration(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
