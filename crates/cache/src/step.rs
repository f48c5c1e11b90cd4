//! Step definitions.

use crate::context::StepContext;
use crate::{Error, Result};
use async_trait::async_trait;
use recast_events::PipelineEvent;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Whether re-entering a step with the same key inside one run is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Determinism {
    /// Re-entry replays the cached value.
    Deterministic,
    /// Re-entry is a cycle and fails the invocation.
    NonDeterministic,
}

/// One memoizable unit of work.
///
/// Inputs and outputs must round-trip through JSON: the input is hashed into
/// the cache key and the output is persisted in the `Success` event.
#[async_trait]
pub trait Step: Send + Sync {
    /// Validated input.
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Result of the step.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Step name; the first part of every key this step produces.
    fn name(&self) -> &str;

    /// Determinism class, used by the cycle guard.
    fn determinism(&self) -> Determinism;

    /// Check and normalize the input before anything else happens.
    ///
    /// Runs before the abort check and key derivation; a failure mutates no
    /// state and dispatches no event.
    async fn validate(&self, input: Self::Input) -> Result<Self::Input> {
        Ok(input)
    }

    /// Compute the output. Nested cached steps are invoked through `ctx`.
    async fn run(&self, input: Self::Input, ctx: StepContext) -> Result<Self::Output>;
}

/// Outcome of [`StepContext::invoke_traced`].
#[derive(Debug, Clone)]
pub struct Invocation<O> {
    /// Cache key of the invocation.
    pub key: String,
    /// Whether the output was replayed from the cache.
    pub cached: bool,
    /// The step output.
    pub output: O,
    /// The invocation's event log, as dispatched.
    pub events: Vec<PipelineEvent>,
}

type Validator<I> = Arc<dyn Fn(&I) -> std::result::Result<(), String> + Send + Sync>;

/// A [`Step`] built from a closure.
///
/// ```rust,ignore
/// let add = FnStep::new("add", Determinism::NonDeterministic, |n: Num, _ctx| async move {
///     Ok(Num { value: n.value + 1 })
/// });
/// ```
pub struct FnStep<I, O, F> {
    name: String,
    determinism: Determinism,
    func: F,
    validator: Option<Validator<I>>,
    _output: PhantomData<fn() -> O>,
}

impl<I, O, F> FnStep<I, O, F> {
    /// Wrap `func` as a step called `name`.
    pub fn new<Fut>(name: impl Into<String>, determinism: Determinism, func: F) -> Self
    where
        F: Fn(I, StepContext) -> Fut,
        Fut: Future<Output = Result<O>>,
    {
        Self {
            name: name.into(),
            determinism,
            func,
            validator: None,
            _output: PhantomData,
        }
    }

    /// Reject inputs for which `check` returns an error message.
    #[must_use]
    pub fn with_validator<V>(mut self, check: V) -> Self
    where
        V: Fn(&I) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(check));
        self
    }
}

impl<I, O, F> fmt::Debug for FnStep<I, O, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep")
            .field("name", &self.name)
            .field("determinism", &self.determinism)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I, O, F, Fut> Step for FnStep<I, O, F>
where
    I: Serialize + DeserializeOwned + Send + Sync + 'static,
    O: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(I, StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O>> + Send,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    fn determinism(&self) -> Determinism {
        self.determinism
    }

    async fn validate(&self, input: I) -> Result<I> {
        if let Some(check) = &self.validator {
            check(&input).map_err(|message| Error::validation(&self.name, message))?;
        }
        Ok(input)
    }

    async fn run(&self, input: I, ctx: StepContext) -> Result<O> {
        (self.func)(input, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinism_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(Determinism::NonDeterministic).unwrap(),
            "non-deterministic"
        );
        assert_eq!(
            serde_json::to_value(Determinism::Deterministic).unwrap(),
            "deterministic"
        );
    }

    #[tokio::test]
    async fn test_fn_step_validator() {
        let step = FnStep::new("half", Determinism::Deterministic, |n: u32, _ctx| async move {
            Ok(n / 2)
        })
        .with_validator(|n| if n % 2 == 0 { Ok(()) } else { Err("odd".into()) });

        assert_eq!(step.validate(4).await.unwrap(), 4);
        let err = step.validate(3).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid input for step 'half': odd");
    }
}
