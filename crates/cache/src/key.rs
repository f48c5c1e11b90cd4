//! Cache key derivation.
//!
//! A key is path-shaped: `<parent>/<name>-<hash4>` for nested invocations and
//! `<name>-<hash4>` at the root, where `hash4` is the first four hex characters
//! of the content hash of the validated input. Nested steps therefore live in
//! the directory of the step that invoked them.
//!
//! Four hex characters is 16 bits of hash; collisions between different inputs
//! of the same step under the same parent are possible and would be served
//! each other's cached results. Existing caches depend on the short form.

use crate::Result;
use crate::deps::ContentHasher;
use serde_json::Value;

/// Number of hash characters kept in a key.
pub const HASH_PREFIX_LEN: usize = 4;

/// Separator between key path segments. Keys use `/` on every platform.
pub const KEY_SEPARATOR: char = '/';

/// A derived cache key together with the full content hash it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    /// The hierarchical cache key.
    pub key: String,
    /// Full content hash of the input.
    pub value_hash: String,
}

/// Derive the cache key for `name` invoked with `input` under `parent_key`.
///
/// Pure apart from the injected hasher: equal `(name, parent_key, input)`
/// always produce equal keys.
///
/// # Errors
///
/// Propagates hashing failures.
pub fn derive_key(
    name: &str,
    parent_key: Option<&str>,
    input: &Value,
    hasher: &dyn ContentHasher,
) -> Result<DerivedKey> {
    let value_hash = hasher.hash(input)?;
    let prefix: String = value_hash.chars().take(HASH_PREFIX_LEN).collect();
    let leaf = format!("{name}-{prefix}");
    let key = match parent_key {
        Some(parent) if !parent.is_empty() => join_key(parent, &leaf),
        _ => leaf,
    };
    Ok(DerivedKey { key, value_hash })
}

/// Join a parent key and a child segment.
#[must_use]
pub fn join_key(parent: &str, child: &str) -> String {
    format!("{}{KEY_SEPARATOR}{child}", parent.trim_end_matches(KEY_SEPARATOR))
}

/// The last segment of a key.
#[must_use]
pub fn basename(key: &str) -> &str {
    key.rsplit(KEY_SEPARATOR).next().unwrap_or(key)
}

/// Every proper ancestor of a key, outermost first.
///
/// `a/b/c` yields `a` and `a/b`.
pub fn ancestors(key: &str) -> impl Iterator<Item = &str> {
    key.match_indices(KEY_SEPARATOR).map(|(idx, _)| &key[..idx])
}
