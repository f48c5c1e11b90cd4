//! Per-run cache state shared by every step invocation of one pipeline run.

use crate::config::CacheConfig;
use crate::deps::Deps;
use crate::filter::CacheFilter;
use crate::step::Determinism;
use crate::{Error, Result};
use recast_events::PipelineEvent;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    /// Recorded event log per key. Entries are never replaced during a run.
    events: HashMap<String, Vec<PipelineEvent>>,
    /// Every key executed or replayed, in order.
    log: Vec<String>,
    abort_reason: Option<String>,
}

/// Mutable state of one pipeline run.
///
/// All mutations happen under a single mutex that is never held across an
/// `.await`, so concurrently running steps see a consistent log.
#[derive(Debug)]
pub struct CacheState {
    run_id: Uuid,
    config: CacheConfig,
    filter: CacheFilter,
    deps: Deps,
    inner: Mutex<Inner>,
}

impl CacheState {
    /// Create the state for a new run.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a cache filter pattern is invalid.
    pub fn new(config: CacheConfig, deps: Deps) -> Result<Self> {
        let filter = CacheFilter::new(&config.enable_cache_for, &config.disable_cache_for)?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            config,
            filter,
            deps,
            inner: Mutex::new(Inner::default()),
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifier of this run, attached to tracing spans.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Injected dependencies.
    #[must_use]
    pub const fn deps(&self) -> &Deps {
        &self.deps
    }

    /// Cache root, if one is configured.
    #[must_use]
    pub fn location(&self) -> Option<&Path> {
        self.config.location.as_deref()
    }

    /// Whether the filters force execution of this invocation.
    #[must_use]
    pub fn is_cache_disabled(&self, name: &str, key: &str) -> bool {
        self.filter.is_disabled(name, key)
    }

    /// Stop the run: no step may start after this. The first reason wins.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut inner = self.inner();
        if inner.abort_reason.is_none() {
            let reason = reason.into();
            tracing::warn!(run_id = %self.run_id, %reason, "Pipeline run aborted");
            inner.abort_reason = Some(reason);
        }
    }

    /// Whether [`abort`](Self::abort) was called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner().abort_reason.is_some()
    }

    /// Fail with an abort error if the run was aborted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Aborted`] carrying the abort reason.
    pub fn ensure_running(&self) -> Result<()> {
        match &self.inner().abort_reason {
            Some(reason) => Err(Error::aborted(reason.clone())),
            None => Ok(()),
        }
    }

    /// The recorded event log for `key`, if this run has one.
    #[must_use]
    pub fn events(&self, key: &str) -> Option<Vec<PipelineEvent>> {
        self.inner().events.get(key).cloned()
    }

    /// Record the event log for `key`. An existing entry is kept.
    pub fn store_events(&self, key: &str, events: Vec<PipelineEvent>) {
        self.inner()
            .events
            .entry(key.to_string())
            .or_insert(events);
    }

    /// Recorded event logs of every key nested below `key`, sorted by key.
    #[must_use]
    pub fn descendant_events(&self, key: &str) -> Vec<(String, Vec<PipelineEvent>)> {
        let prefix = format!("{key}/");
        let mut nested: Vec<_> = self
            .inner()
            .events
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, events)| (k.clone(), events.clone()))
            .collect();
        nested.sort_by(|a, b| a.0.cmp(&b.0));
        nested
    }

    /// Keys executed or replayed so far, in order.
    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.inner().log.clone()
    }

    /// Cycle guard: admit `key` into the execution log.
    ///
    /// A non-deterministic step may appear at most once per run; a second
    /// entry is a cycle. Deterministic steps may be re-entered freely. The
    /// check and the append happen under one lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] for a repeated non-deterministic key.
    pub fn verify_executed_once(&self, key: &str, determinism: Determinism) -> Result<()> {
        let mut inner = self.inner();
        if determinism == Determinism::NonDeterministic && inner.log.iter().any(|k| k == key) {
            tracing::error!(run_id = %self.run_id, key, "Cycle detected");
            return Err(Error::CycleDetected {
                key: key.to_string(),
            });
        }
        inner.log.push(key.to_string());
        Ok(())
    }

    /// Dispatch an event to the bus, if one is attached.
    pub fn dispatch(&self, event: PipelineEvent) {
        if let Some(sender) = &self.deps.dispatch
            && sender.dispatch(event).is_err()
        {
            tracing::trace!("Event bus closed, dropping event");
        }
    }
}
