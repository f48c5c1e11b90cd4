//! CLI renderer for pipeline events.
//!
//! Renders step progress to stderr for terminal display.
//! This module is allowed to use eprintln! as it's the output layer.

#![allow(clippy::print_stderr)]

use crate::bus::EventReceiver;
use crate::event::PipelineEvent;
use std::io::{self, IsTerminal};

/// CLI renderer configuration.
#[derive(Debug, Clone)]
pub struct CliRendererConfig {
    /// Whether to use ANSI colors.
    pub colors: bool,
    /// Whether to show verbose output (domain events and timings).
    pub verbose: bool,
}

impl Default for CliRendererConfig {
    fn default() -> Self {
        Self {
            colors: io::stderr().is_terminal(),
            verbose: false,
        }
    }
}

/// CLI renderer that prints step progress to stderr.
#[derive(Debug)]
pub struct CliRenderer {
    config: CliRendererConfig,
}

impl Default for CliRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl CliRenderer {
    /// Create a new CLI renderer with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CliRendererConfig::default(),
        }
    }

    /// Create a new CLI renderer with the given configuration.
    #[must_use]
    pub fn with_config(config: CliRendererConfig) -> Self {
        Self { config }
    }

    /// Run the renderer, consuming events from the receiver.
    pub async fn run(self, mut receiver: EventReceiver) {
        while let Some(event) = receiver.recv().await {
            self.render(&event);
        }
    }

    /// Render a single event.
    pub fn render(&self, event: &PipelineEvent) {
        if let Some(line) = self.format(event) {
            eprintln!("{line}");
        }
    }

    /// Format a single event, or `None` when it is not shown at this verbosity.
    #[must_use]
    pub fn format(&self, event: &PipelineEvent) -> Option<String> {
        match event {
            PipelineEvent::Started { key, .. } => Some(format!("> [{key}] started")),
            PipelineEvent::Emitted { key, event, .. } => self.config.verbose.then(|| {
                let kind = event.get("type").and_then(|t| t.as_str()).unwrap_or("event");
                format!("> [{key}] {kind}")
            }),
            PipelineEvent::Success { key, cached, .. } => {
                if *cached {
                    Some(format!("> [{key}] {}", self.paint("(cached)", "2")))
                } else {
                    Some(format!("> [{key}] {}", self.paint("done", "32")))
                }
            }
            PipelineEvent::Failed { key, error, .. } => Some(format!(
                "> [{key}] {} {error}",
                self.paint("failed:", "31")
            )),
            PipelineEvent::Timing {
                key, duration_ms, ..
            } => self
                .config
                .verbose
                .then(|| format!("> [{key}] took {duration_ms}ms")),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if self.config.colors {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }
}
