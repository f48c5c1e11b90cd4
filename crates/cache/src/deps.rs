//! Injected dependencies of the engine.
//!
//! Hashing, time and filesystem access are behind traits so that the whole
//! engine can run deterministically against an in-memory filesystem and a
//! fixed clock in tests.

use crate::fs::{CacheFs, OsFs};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use recast_events::EventSender;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Stable structural hash of a JSON value.
pub trait ContentHasher: Send + Sync + fmt::Debug {
    /// Hash `value`. Must not depend on object property order.
    ///
    /// # Errors
    ///
    /// Implementations may fail, e.g. when the value cannot be encoded.
    fn hash(&self, value: &Value) -> Result<String>;
}

/// SHA-256 over the canonical JSON encoding, as lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash(&self, value: &Value) -> Result<String> {
        let mut canonical = String::new();
        write_canonical(value, &mut canonical)?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }
}

/// Encode `value` as compact JSON with object keys sorted.
///
/// Sorting is done here rather than relying on `serde_json::Map` ordering,
/// which changes when the `preserve_order` feature is enabled anywhere in the
/// dependency graph.
fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&encode(&Value::String(k.clone()))?);
                out.push(':');
                write_canonical(v, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&encode(scalar)?),
    }
    Ok(())
}

fn encode(value: &Value) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::serialization(format!("Failed to encode value for hashing: {e}")))
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything the engine needs from the outside world.
#[derive(Debug, Clone)]
pub struct Deps {
    /// Content hasher used for key derivation.
    pub hasher: Arc<dyn ContentHasher>,
    /// Filesystem the cache is stored on.
    pub fs: Arc<dyn CacheFs>,
    /// Clock used for timing events.
    pub clock: Arc<dyn Clock>,
    /// Where lifecycle and domain events are dispatched; `None` drops them.
    pub dispatch: Option<EventSender>,
}

impl Default for Deps {
    fn default() -> Self {
        Self {
            hasher: Arc::new(Sha256Hasher),
            fs: Arc::new(OsFs),
            clock: Arc::new(SystemClock),
            dispatch: None,
        }
    }
}

impl Deps {
    /// Replace the content hasher.
    #[must_use]
    pub fn with_hasher(mut self, hasher: impl ContentHasher + 'static) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    /// Replace the filesystem.
    #[must_use]
    pub fn with_fs(mut self, fs: Arc<dyn CacheFs>) -> Self {
        self.fs = fs;
        self
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Dispatch events onto a bus.
    #[must_use]
    pub fn with_dispatch(mut self, sender: EventSender) -> Self {
        self.dispatch = Some(sender);
        self
    }
}
