//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Boxed error raised by a step factory or an external collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for cached pipeline execution
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Step input failed validation
    #[error("Invalid input for step '{step}': {message}")]
    #[diagnostic(code(recast::cache::validation))]
    Validation {
        /// Step whose input was rejected
        step: String,
        /// What was wrong with the input
        message: String,
    },

    /// The run was aborted; no new step may start
    #[error("Pipeline run aborted: {reason}")]
    #[diagnostic(
        code(recast::cache::aborted),
        help("The partial cache is kept intact; rerun to resume")
    )]
    Aborted {
        /// Why the run was aborted
        reason: String,
    },

    /// A non-deterministic step was re-entered with the same key in one run
    #[error("Cycle detected: non-deterministic step '{key}' was already executed in this run")]
    #[diagnostic(
        code(recast::cache::cycle),
        help("A non-deterministic step fed back into itself with identical input")
    )]
    CycleDetected {
        /// The offending cache key
        key: String,
    },

    /// A step factory failed
    #[error("Step '{step}' failed: {message}")]
    #[diagnostic(code(recast::cache::step))]
    Step {
        /// Name of the failing step
        step: String,
        /// Error message
        message: String,
        /// Underlying error, if any
        #[source]
        source: Option<BoxError>,
    },

    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(recast::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(recast::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// Cleanup found something that is not cache data inside a stale directory
    #[error("Refusing to clean up {}: it contains non-cache file {}", dir.display(), file.display())]
    #[diagnostic(
        code(recast::cache::cleanup_safety),
        help("Cache directories may only contain .yaml files; check the configured cache location")
    )]
    CleanupSafety {
        /// Stale directory that was about to be removed
        dir: Box<Path>,
        /// The offending file
        file: Box<Path>,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(recast::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create a validation error
    #[must_use]
    pub fn validation(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create an abort error
    #[must_use]
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Create a step failure without an underlying source
    #[must_use]
    pub fn step(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: msg.into(),
            source: None,
        }
    }

    /// Wrap an error raised by an external collaborator inside a step
    #[must_use]
    pub fn step_source(step: impl Into<String>, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self::Step {
            step: step.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Whether this error stops the run rather than failing one step.
    ///
    /// Callers composing steps can swallow or retry ordinary step failures but
    /// should let aborts propagate.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::CycleDetected { .. })
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
