//! The explicit run context threaded through every step invocation, and the
//! cached step wrapper built on it.

use crate::key::{DerivedKey, derive_key};
use crate::persist;
use crate::state::CacheState;
use crate::step::{Invocation, Step};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use recast_events::PipelineEvent;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::Instrument;
use uuid::Uuid;

/// Collects the events of the invocation currently executing.
#[derive(Debug, Clone)]
struct Recorder {
    name: String,
    key: String,
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl Recorder {
    fn new(name: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            key: key.to_string(),
            events: Arc::default(),
        }
    }

    /// Append to the log and dispatch, in emission order.
    fn record(&self, state: &CacheState, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        state.dispatch(event);
    }

    fn take(&self) -> Vec<PipelineEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Handle to the current pipeline run.
///
/// The root context is created by [`Pipeline::execute`](crate::Pipeline::execute);
/// each executing step receives a child context whose parent key is the
/// step's own key, so steps it invokes nest below it. Cloning is cheap and
/// clones may be used concurrently.
#[derive(Debug, Clone)]
pub struct StepContext {
    state: Arc<CacheState>,
    parent_key: Option<String>,
    recorder: Option<Recorder>,
}

impl StepContext {
    pub(crate) const fn root(state: Arc<CacheState>) -> Self {
        Self {
            state,
            parent_key: None,
            recorder: None,
        }
    }

    /// Key of the invocation this context belongs to; `None` at the root.
    #[must_use]
    pub fn parent_key(&self) -> Option<&str> {
        self.parent_key.as_deref()
    }

    /// Directory that steps invoked from this context are cached in.
    #[must_use]
    pub fn location(&self) -> Option<PathBuf> {
        let root = self.state.location()?;
        Some(match &self.parent_key {
            Some(key) => root.join(key),
            None => root.to_path_buf(),
        })
    }

    /// Identifier of the run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.state.run_id()
    }

    /// Abort the run. Steps already in flight finish; no new step starts and
    /// cleanup is skipped.
    pub fn abort(&self, reason: impl Into<String>) {
        self.state.abort(reason);
    }

    /// Whether the run was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.is_aborted()
    }

    /// Keys executed or replayed so far in this run.
    #[must_use]
    pub fn executed_keys(&self) -> Vec<String> {
        self.state.log()
    }

    /// Record a domain event in the current invocation's log and dispatch it.
    ///
    /// Outside of any step the event is only dispatched, with empty name and
    /// key.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `event` cannot be encoded as JSON.
    pub fn emit<E: Serialize + ?Sized>(&self, event: &E) -> Result<()> {
        let value = serde_json::to_value(event)
            .map_err(|e| Error::serialization(format!("Failed to encode emitted event: {e}")))?;
        match &self.recorder {
            Some(recorder) => recorder.record(
                &self.state,
                PipelineEvent::Emitted {
                    name: recorder.name.clone(),
                    key: recorder.key.clone(),
                    event: value,
                },
            ),
            None => self.state.dispatch(PipelineEvent::Emitted {
                name: String::new(),
                key: String::new(),
                event: value,
            }),
        }
        Ok(())
    }

    /// Invoke `step` through the cache and return its output.
    ///
    /// # Errors
    ///
    /// Validation, abort, cycle and step errors, plus I/O errors from cache
    /// lookup or persistence.
    pub async fn invoke<S: Step>(&self, step: &S, input: S::Input) -> Result<S::Output> {
        self.invoke_traced(step, input)
            .await
            .map(|invocation| invocation.output)
    }

    /// Invoke `step` through the cache, returning its key, whether it was
    /// replayed, and its event log alongside the output.
    ///
    /// # Errors
    ///
    /// See [`invoke`](Self::invoke).
    pub async fn invoke_traced<S: Step>(
        &self,
        step: &S,
        input: S::Input,
    ) -> Result<Invocation<S::Output>> {
        let name = step.name().to_string();
        let input = step.validate(input).await?;
        self.state.ensure_running()?;

        let input_value = serde_json::to_value(&input).map_err(|e| {
            Error::serialization(format!("Failed to encode input of step '{name}': {e}"))
        })?;
        let DerivedKey { key, .. } = derive_key(
            &name,
            self.parent_key.as_deref(),
            &input_value,
            self.state.deps().hasher.as_ref(),
        )?;

        let span = tracing::debug_span!(
            "step",
            step = %name,
            key = %key,
            run_id = %self.state.run_id()
        );
        self.invoke_keyed(step, name, key, input, input_value)
            .instrument(span)
            .await
    }

    async fn invoke_keyed<S: Step>(
        &self,
        step: &S,
        name: String,
        key: String,
        input: S::Input,
        input_value: Value,
    ) -> Result<Invocation<S::Output>> {
        if self.state.is_cache_disabled(&name, &key) {
            tracing::debug!("Cache disabled by filter");
        } else if let Some((events, output)) = self.lookup::<S::Output>(&key).await? {
            self.state
                .verify_executed_once(&key, step.determinism())?;
            tracing::debug!(events = events.len(), "Cache hit, replaying");
            let events: Vec<_> = events
                .into_iter()
                .map(|event| event.with_cached(true))
                .collect();
            self.replay(&key, &events);
            return Ok(Invocation {
                key,
                cached: true,
                output,
                events,
            });
        } else {
            tracing::debug!("Cache miss");
        }

        self.state
            .verify_executed_once(&key, step.determinism())?;
        self.execute(step, name, key, input, input_value).await
    }

    /// Find a usable event log for `key`: in memory first, then on disk.
    ///
    /// A log loaded from disk is memoized together with the logs nested
    /// below it, so a replay can re-dispatch the whole subtree.
    async fn lookup<O: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<(Vec<PipelineEvent>, O)>> {
        if let Some(events) = self.state.events(key) {
            if let Some(output) = persist::decode_result(&events) {
                return Ok(Some((events, output)));
            }
            tracing::warn!(key, "Recorded event log has no usable result");
        }

        let Some(root) = self.state.location() else {
            return Ok(None);
        };
        let fs = self.state.deps().fs.as_ref();
        let Some(entry) = persist::load(fs, root, key).await? else {
            return Ok(None);
        };
        let Some(output) = persist::decode_result(&entry.events) else {
            tracing::warn!(key, "Ignoring cache entry without a usable result");
            return Ok(None);
        };
        for (nested_key, events) in persist::load_nested(fs, &entry, key).await? {
            self.state.store_events(&nested_key, events);
        }
        self.state.store_events(key, entry.events.clone());
        Ok(Some((entry.events, output)))
    }

    /// Dispatch a replayed log. The logs of nested invocations go out just
    /// before the replayed result, in key order, flagged as cached.
    fn replay(&self, key: &str, events: &[PipelineEvent]) {
        let split = events
            .iter()
            .rposition(PipelineEvent::is_result)
            .unwrap_or(events.len());
        let (before, after) = events.split_at(split);
        for event in before {
            self.state.dispatch(event.clone());
        }
        for (_, nested) in self.state.descendant_events(key) {
            for event in nested {
                self.state.dispatch(event.with_cached(true));
            }
        }
        for event in after {
            self.state.dispatch(event.clone());
        }
    }

    async fn execute<S: Step>(
        &self,
        step: &S,
        name: String,
        key: String,
        input: S::Input,
        input_value: Value,
    ) -> Result<Invocation<S::Output>> {
        let started_at = self.state.deps().clock.now();
        let recorder = Recorder::new(&name, &key);
        recorder.record(
            &self.state,
            PipelineEvent::Started {
                name: name.clone(),
                key: key.clone(),
                input: input_value,
            },
        );

        match self.complete(step, input, &recorder, started_at).await {
            Ok((output, events)) => Ok(Invocation {
                key,
                cached: false,
                output,
                events,
            }),
            Err(err) => {
                tracing::debug!(error = %err, "Step failed");
                self.state.dispatch(PipelineEvent::Failed {
                    name,
                    key,
                    error: render_chain(&err),
                });
                Err(err)
            }
        }
    }

    /// Run the factory, then record, persist and memoize its result.
    async fn complete<S: Step>(
        &self,
        step: &S,
        input: S::Input,
        recorder: &Recorder,
        started_at: DateTime<Utc>,
    ) -> Result<(S::Output, Vec<PipelineEvent>)> {
        let child = Self {
            state: Arc::clone(&self.state),
            parent_key: Some(recorder.key.clone()),
            recorder: Some(recorder.clone()),
        };
        let output = step.run(input, child).await?;
        let output_value = serde_json::to_value(&output).map_err(|e| {
            Error::serialization(format!(
                "Failed to encode output of step '{}': {e}",
                recorder.name
            ))
        })?;

        let deps = self.state.deps();
        let duration_ms: u64 = (deps.clock.now() - started_at)
            .num_milliseconds()
            .try_into()
            .unwrap_or(0);
        let finished = [
            PipelineEvent::Success {
                name: recorder.name.clone(),
                key: recorder.key.clone(),
                cached: false,
                output: output_value,
            },
            PipelineEvent::Timing {
                name: recorder.name.clone(),
                key: recorder.key.clone(),
                timestamp: started_at,
                duration_ms,
            },
        ];

        // Success and Timing go out only after the log is persisted.
        let mut events = recorder.take();
        events.extend(finished.iter().cloned());
        if self.state.config().persists()
            && let Some(root) = self.state.location()
        {
            persist::store(deps.fs.as_ref(), root, &recorder.key, &events).await?;
        }
        self.state.store_events(&recorder.key, events.clone());
        for event in finished {
            self.state.dispatch(event);
        }
        tracing::debug!(duration_ms, "Step completed");
        Ok((output, events))
    }
}

/// Render an error and its sources as one line.
fn render_chain(err: &Error) -> String {
    let mut rendered = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.ends_with(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}
