//! Allow-list and deny-list of steps that may use the cache.
//!
//! A pattern matches an invocation when it equals the step name, equals the
//! last key segment, or is a glob matching the full key. Globs are
//! case-sensitive, `*` stays within one key segment and dot-prefixed segments
//! are matched like any other.

use crate::key::basename;
use crate::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashSet;

#[derive(Debug)]
struct PatternSet {
    literals: HashSet<String>,
    globs: GlobSet,
}

impl PatternSet {
    fn compile(patterns: &[String]) -> Result<Option<Self>> {
        if patterns.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    Error::configuration(format!("Invalid cache filter pattern '{pattern}': {e}"))
                })?;
            builder.add(glob);
        }
        let globs = builder
            .build()
            .map_err(|e| Error::configuration(format!("Invalid cache filter patterns: {e}")))?;
        Ok(Some(Self {
            literals: patterns.iter().cloned().collect(),
            globs,
        }))
    }

    fn matches(&self, name: &str, key: &str) -> bool {
        self.literals.contains(name)
            || self.literals.contains(basename(key))
            || self.globs.is_match(key)
    }
}

/// Compiled `enable_cache_for` / `disable_cache_for` filters.
#[derive(Debug, Default)]
pub struct CacheFilter {
    enable: Option<PatternSet>,
    disable: Option<PatternSet>,
}

impl CacheFilter {
    /// Compile both pattern lists.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid glob.
    pub fn new(enable: &[String], disable: &[String]) -> Result<Self> {
        Ok(Self {
            enable: PatternSet::compile(enable)?,
            disable: PatternSet::compile(disable)?,
        })
    }

    /// Whether lookup must be skipped for this invocation.
    ///
    /// The two lists are evaluated independently: being outside a non-empty
    /// allow-list or inside the deny-list is each enough.
    #[must_use]
    pub fn is_disabled(&self, name: &str, key: &str) -> bool {
        let denied = self.disable.as_ref().is_some_and(|d| d.matches(name, key));
        let not_allowed = self.enable.as_ref().is_some_and(|e| !e.matches(name, key));
        denied || not_allowed
    }
}
