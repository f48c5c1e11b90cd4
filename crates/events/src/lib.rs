//! Structured event system for recast pipelines.
//!
//! Every cached step invocation reports its lifecycle as a sequence of
//! [`PipelineEvent`]s. The [`EventBus`] fans those events out to any number of
//! independent subscribers (progress printers, JSON dumps, cost trackers)
//! without the engine knowing about them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use recast_events::{CliRenderer, EventBus, UsageCollector};
//!
//! let bus = EventBus::new();
//! tokio::spawn(CliRenderer::new().run(bus.subscribe()));
//! let usage = tokio::spawn(UsageCollector::new().run(bus.subscribe()));
//!
//! // hand `bus.sender()` to the pipeline, run it, then:
//! bus.shutdown();
//! let report = usage.await?;
//! ```

pub mod bus;
pub mod event;
pub mod logging;
pub mod renderers;
pub mod usage;

// Re-exports for convenience
pub use bus::{EventBus, EventReceiver, EventSender, SendError};
pub use event::{CostEvent, PipelineEvent, Usage};
pub use logging::{TracingConfig, TracingFormat, init_tracing};
pub use renderers::{CliRenderer, CliRendererConfig, JsonRenderer};
pub use usage::{ModelUsage, UsageCollector, UsageReport};
