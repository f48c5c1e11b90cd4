//! Cost tracking subscriber.
//!
//! Aggregates [`CostEvent::Usage`] domain events per model. Replayed events
//! are counted as well, so the report reflects the total cost of everything the
//! run's results are built on, with the share served from cache reported
//! separately.

use crate::bus::EventReceiver;
use crate::event::{CostEvent, PipelineEvent, Usage};
use serde::Serialize;
use std::collections::BTreeMap;

/// Usage totals for a single model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelUsage {
    /// Number of usage events seen.
    pub calls: u64,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
    /// Total cost in US dollars.
    pub cost_usd: f64,
}

impl ModelUsage {
    fn add(&mut self, usage: &Usage) {
        self.calls += 1;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cost_usd += usage.cost_usd;
    }
}

/// Aggregated usage for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageReport {
    /// Totals per model, including replayed usage.
    pub models: BTreeMap<String, ModelUsage>,
    /// Cost of the usage that was replayed from cache rather than paid again.
    pub cached_cost_usd: f64,
}

impl UsageReport {
    /// Total cost across all models.
    #[must_use]
    pub fn total_cost_usd(&self) -> f64 {
        self.models.values().map(|m| m.cost_usd).sum()
    }

    /// Cost actually incurred by this run.
    #[must_use]
    pub fn spent_cost_usd(&self) -> f64 {
        self.total_cost_usd() - self.cached_cost_usd
    }
}

/// Collects usage events from the bus.
///
/// Whether a usage event was replayed is only known once the invocation's
/// `Success` event arrives, so usage is buffered per key until then. Usage of
/// invocations that never succeed is counted as spent.
#[derive(Debug, Default)]
pub struct UsageCollector {
    report: UsageReport,
    pending: BTreeMap<String, Vec<Usage>>,
}

impl UsageCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume events until the stream ends and return the report.
    pub async fn run(mut self, mut receiver: EventReceiver) -> UsageReport {
        while let Some(event) = receiver.recv().await {
            self.observe(&event);
        }
        self.finish()
    }

    /// Feed one event to the collector.
    pub fn observe(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Emitted { key, .. } => {
                if let Some(CostEvent::Usage(usage)) = event.decode::<CostEvent>() {
                    self.pending.entry(key.clone()).or_default().push(usage);
                }
            }
            PipelineEvent::Success { key, cached, .. } => {
                for usage in self.pending.remove(key).unwrap_or_default() {
                    if *cached {
                        self.report.cached_cost_usd += usage.cost_usd;
                    }
                    self.record(&usage);
                }
            }
            PipelineEvent::Started { .. }
            | PipelineEvent::Failed { .. }
            | PipelineEvent::Timing { .. } => {}
        }
    }

    /// Flush pending usage and return the report.
    #[must_use]
    pub fn finish(mut self) -> UsageReport {
        let pending = std::mem::take(&mut self.pending);
        for usage in pending.into_values().flatten() {
            self.record(&usage);
        }
        self.report
    }

    fn record(&mut self, usage: &Usage) {
        self.report
            .models
            .entry(usage.model.clone())
            .or_default()
            .add(usage);
    }
}
