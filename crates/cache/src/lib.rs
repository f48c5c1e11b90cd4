//! Cached, resumable pipeline execution.
//!
//! Every step invocation is memoized under a hierarchical key derived from the
//! step name, the key of the step that invoked it, and a content hash of its
//! input. Results are recorded as event logs, kept in memory for the run and
//! persisted as YAML under the cache location, so an interrupted run resumes
//! by replaying what already finished.
//!
//! # Overview
//!
//! - [`Pipeline::execute`] starts a run and hands out the root [`StepContext`]
//! - [`StepContext::invoke`] is the cached step wrapper: validate, derive the
//!   key, replay on a hit, execute and persist on a miss
//! - non-deterministic steps may run at most once per key per run; re-entry is
//!   reported as [`Error::CycleDetected`]
//! - after a run that was not aborted, [`cleanup`] removes cache entries the
//!   run did not touch
//!
//! Lifecycle and domain events are dispatched on a
//! [`recast_events::EventBus`] when a sender is injected through [`Deps`].

pub mod cleanup;
pub mod config;
pub mod context;
pub mod deps;
mod error;
pub mod filter;
pub mod fs;
pub mod key;
pub mod persist;
mod pipeline;
pub mod state;
pub mod step;

pub use cleanup::{CleanupReport, cleanup};
pub use config::CacheConfig;
pub use context::StepContext;
pub use deps::{Clock, ContentHasher, Deps, FixedClock, Sha256Hasher, SystemClock};
pub use error::{BoxError, Error, Result};
pub use filter::CacheFilter;
pub use fs::{CacheFs, DirEntry, MemoryFs, OsFs};
pub use key::{DerivedKey, derive_key};
pub use pipeline::Pipeline;
pub use state::CacheState;
pub use step::{Determinism, FnStep, Invocation, Step};
