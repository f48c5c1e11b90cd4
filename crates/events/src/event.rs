//! Event type definitions for pipeline step invocations.
//!
//! Every cached step invocation produces an ordered list of [`PipelineEvent`]s:
//! a `Started` event, any domain events the step emitted, and on success a
//! `Success` result event followed by `Timing`. The same list is what gets
//! persisted to the cache and replayed on a hit.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A lifecycle or domain event for one step invocation.
///
/// Serializes as `{type, data}` so that persisted event logs stay readable and
/// stable across versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PipelineEvent {
    /// A step began executing.
    Started {
        /// Step name.
        name: String,
        /// Cache key of the invocation.
        key: String,
        /// The validated input, as JSON.
        input: Value,
    },
    /// A domain event emitted by the step's factory.
    Emitted {
        /// Step name.
        name: String,
        /// Cache key of the invocation.
        key: String,
        /// The domain event payload.
        event: Value,
    },
    /// The step finished and produced `output`.
    Success {
        /// Step name.
        name: String,
        /// Cache key of the invocation.
        key: String,
        /// Whether the result came from the cache.
        cached: bool,
        /// The step output, as JSON.
        output: Value,
    },
    /// The step failed.
    Failed {
        /// Step name.
        name: String,
        /// Cache key of the invocation.
        key: String,
        /// Rendered error chain.
        error: String,
    },
    /// Wall-clock timing of a successful execution.
    Timing {
        /// Step name.
        name: String,
        /// Cache key of the invocation.
        key: String,
        /// When the execution started.
        timestamp: DateTime<Utc>,
        /// Execution duration in milliseconds.
        duration_ms: u64,
    },
}

impl PipelineEvent {
    /// Name of the step this event belongs to.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Started { name, .. }
            | Self::Emitted { name, .. }
            | Self::Success { name, .. }
            | Self::Failed { name, .. }
            | Self::Timing { name, .. } => name,
        }
    }

    /// Cache key of the invocation this event belongs to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Started { key, .. }
            | Self::Emitted { key, .. }
            | Self::Success { key, .. }
            | Self::Failed { key, .. }
            | Self::Timing { key, .. } => key,
        }
    }

    /// The serialized `type` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Emitted { .. } => "emitted",
            Self::Success { .. } => "success",
            Self::Failed { .. } => "failed",
            Self::Timing { .. } => "timing",
        }
    }

    /// Whether this is the result event of an invocation.
    #[must_use]
    pub const fn is_result(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Return this event with the `cached` flag of a `Success` rewritten.
    ///
    /// Other variants are returned unchanged.
    #[must_use]
    pub fn with_cached(self, cached: bool) -> Self {
        match self {
            Self::Success {
                name, key, output, ..
            } => Self::Success {
                name,
                key,
                cached,
                output,
            },
            other => other,
        }
    }

    /// Decode the payload of an `Emitted` event into a domain event type.
    ///
    /// Returns `None` for other variants or when the payload has a different
    /// shape.
    #[must_use]
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        match self {
            Self::Emitted { event, .. } => serde_json::from_value(event.clone()).ok(),
            _ => None,
        }
    }

    /// Decode the output of a `Success` event.
    #[must_use]
    pub fn decode_output<T: DeserializeOwned>(&self) -> Option<T> {
        match self {
            Self::Success { output, .. } => serde_json::from_value(output.clone()).ok(),
            _ => None,
        }
    }
}

/// Token and cost usage reported by a step that called a paid external API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Model or service identifier.
    pub model: String,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
    /// Cost in US dollars.
    pub cost_usd: f64,
}

/// Domain events understood by the built-in subscribers.
///
/// Steps emit these through their context; [`crate::UsageCollector`]
/// aggregates the `usage` ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum CostEvent {
    /// Usage of a metered API.
    Usage(Usage),
}
