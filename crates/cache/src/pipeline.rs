//! Top-level entry point: one [`Pipeline::execute`] call is one run.

use crate::cleanup::cleanup;
use crate::config::CacheConfig;
use crate::context::StepContext;
use crate::deps::Deps;
use crate::state::CacheState;
use crate::Result;
use std::future::Future;
use std::sync::Arc;

/// A configured cached pipeline.
///
/// ```rust,ignore
/// let pipeline = Pipeline::new(CacheConfig::from_env()?);
/// let out = pipeline
///     .execute(|ctx| async move { ctx.invoke(&add, Num { value: 0 }).await })
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: CacheConfig,
    deps: Deps,
}

impl Pipeline {
    /// Create a pipeline with default dependencies.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            deps: Deps::default(),
        }
    }

    /// Replace the injected dependencies.
    #[must_use]
    pub fn with_deps(mut self, deps: Deps) -> Self {
        self.deps = deps;
        self
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Run `body` with a fresh root context and clean up afterwards.
    ///
    /// # Errors
    ///
    /// Returns the error of `body`, a configuration error for invalid filter
    /// patterns, or a cleanup error.
    pub async fn execute<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(StepContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_log(body).await.map(|(value, _)| value)
    }

    /// Like [`execute`](Self::execute), also returning the execution log.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn execute_with_log<F, Fut, T>(&self, body: F) -> Result<(T, Vec<String>)>
    where
        F: FnOnce(StepContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let state = Arc::new(CacheState::new(self.config.clone(), self.deps.clone())?);
        tracing::info!(
            run_id = %state.run_id(),
            location = ?self.config.location,
            save = self.config.save_to_cache,
            "Starting pipeline run"
        );

        let result = body(StepContext::root(Arc::clone(&state))).await;
        let log = state.log();

        let cleaned = match self.config.location.as_deref() {
            Some(root) if self.config.save_to_cache && !state.is_aborted() => {
                cleanup(self.deps.fs.as_ref(), root, &log).await.map(drop)
            }
            _ => {
                tracing::debug!(
                    aborted = state.is_aborted(),
                    "Skipping cache cleanup"
                );
                Ok(())
            }
        };

        match (result, cleaned) {
            (Ok(value), Ok(())) => {
                tracing::info!(run_id = %state.run_id(), steps = log.len(), "Pipeline run finished");
                Ok((value, log))
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), cleaned) => {
                if let Err(cleanup_err) = cleaned {
                    tracing::warn!(error = %cleanup_err, "Cache cleanup failed after run error");
                }
                tracing::info!(run_id = %state.run_id(), error = %e, "Pipeline run failed");
                Err(e)
            }
        }
    }
}
