//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use recast_cache::{
    CacheConfig, CacheFs, ContentHasher, Deps, Determinism, DirEntry, FixedClock, MemoryFs,
    Pipeline, Result, Sha256Hasher, Step, StepContext,
};
use recast_events::{CostEvent, EventBus, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Input and output of the arithmetic steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Num {
    pub value: i64,
}

pub const fn num(value: i64) -> Num {
    Num { value }
}

/// Hasher with fixed digests for the inputs the scenarios use, so keys are
/// stable literals like `add-660e`. Anything else falls back to SHA-256.
#[derive(Debug, Default)]
pub struct TableHasher;

impl ContentHasher for TableHasher {
    fn hash(&self, value: &Value) -> Result<String> {
        let prefix = match value.get("value").and_then(Value::as_i64) {
            Some(0) => "660e",
            Some(1) => "993e",
            Some(2) => "10bb",
            Some(4) => "51ea",
            Some(5) => "b956",
            Some(10) => "26e7",
            _ => return Sha256Hasher.hash(value),
        };
        Ok(format!("{prefix}{}", "0".repeat(60)))
    }
}

/// Counts factory executions.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// `add(value) = value + 1`
#[derive(Debug, Clone)]
pub struct Add {
    pub determinism: Determinism,
    pub calls: Calls,
}

impl Add {
    pub fn non_deterministic() -> Self {
        Self {
            determinism: Determinism::NonDeterministic,
            calls: Calls::default(),
        }
    }

    pub fn deterministic() -> Self {
        Self {
            determinism: Determinism::Deterministic,
            calls: Calls::default(),
        }
    }
}

#[async_trait]
impl Step for Add {
    type Input = Num;
    type Output = Num;

    fn name(&self) -> &str {
        "add"
    }

    fn determinism(&self) -> Determinism {
        self.determinism
    }

    async fn run(&self, input: Num, _ctx: StepContext) -> Result<Num> {
        self.calls.hit();
        Ok(num(input.value + 1))
    }
}

/// `multiply(value) = value * 2`
#[derive(Debug, Clone, Default)]
pub struct Multiply {
    pub calls: Calls,
}

#[async_trait]
impl Step for Multiply {
    type Input = Num;
    type Output = Num;

    fn name(&self) -> &str {
        "multiply"
    }

    fn determinism(&self) -> Determinism {
        Determinism::NonDeterministic
    }

    async fn run(&self, input: Num, _ctx: StepContext) -> Result<Num> {
        self.calls.hit();
        Ok(num(input.value * 2))
    }
}

/// `sub-pipe(value) = multiply(add(value))`, invoking both as cached steps.
#[derive(Debug, Clone)]
pub struct SubPipe {
    pub add: Add,
    pub multiply: Multiply,
    pub calls: Calls,
}

impl Default for SubPipe {
    fn default() -> Self {
        Self {
            add: Add::non_deterministic(),
            multiply: Multiply::default(),
            calls: Calls::default(),
        }
    }
}

impl SubPipe {
    pub fn total_calls(&self) -> usize {
        self.calls.count() + self.add.calls.count() + self.multiply.calls.count()
    }
}

#[async_trait]
impl Step for SubPipe {
    type Input = Num;
    type Output = Num;

    fn name(&self) -> &str {
        "sub-pipe"
    }

    fn determinism(&self) -> Determinism {
        Determinism::NonDeterministic
    }

    async fn run(&self, input: Num, ctx: StepContext) -> Result<Num> {
        self.calls.hit();
        let added = ctx.invoke(&self.add, input).await?;
        ctx.invoke(&self.multiply, added).await
    }
}

/// A metered step that reports its usage as a domain event.
#[derive(Debug, Clone, Default)]
pub struct Summarize {
    pub calls: Calls,
}

#[async_trait]
impl Step for Summarize {
    type Input = String;
    type Output = String;

    fn name(&self) -> &str {
        "summarize"
    }

    fn determinism(&self) -> Determinism {
        Determinism::NonDeterministic
    }

    async fn run(&self, input: String, ctx: StepContext) -> Result<String> {
        self.calls.hit();
        ctx.emit(&CostEvent::Usage(Usage {
            model: "claude".into(),
            input_tokens: 120,
            output_tokens: 30,
            cost_usd: 0.5,
        }))?;
        Ok(input.to_uppercase())
    }
}

/// Wraps [`Summarize`] as a nested cached step.
#[derive(Debug, Clone, Default)]
pub struct Review {
    pub summarize: Summarize,
    pub calls: Calls,
}

#[async_trait]
impl Step for Review {
    type Input = String;
    type Output = String;

    fn name(&self) -> &str {
        "review"
    }

    fn determinism(&self) -> Determinism {
        Determinism::NonDeterministic
    }

    async fn run(&self, input: String, ctx: StepContext) -> Result<String> {
        self.calls.hit();
        let summary = ctx.invoke(&self.summarize, input).await?;
        Ok(format!("LGTM: {summary}"))
    }
}

/// A [`MemoryFs`] whose writes always fail.
#[derive(Debug, Default)]
pub struct FullDisk(pub MemoryFs);

#[async_trait]
impl CacheFs for FullDisk {
    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.0.read_to_string(path).await
    }

    async fn write(&self, _path: &Path, _contents: &str) -> io::Result<()> {
        Err(io::Error::other("no space left on device"))
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.0.create_dir_all(path).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.0.remove_file(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.0.remove_dir_all(path).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        self.0.read_dir(path).await
    }
}

/// In-memory filesystem, fixed clock and an event bus wired together.
pub struct Harness {
    pub fs: Arc<MemoryFs>,
    pub clock: Arc<FixedClock>,
    pub bus: EventBus,
}

impl Harness {
    pub fn new() -> Self {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Self {
            fs: Arc::new(MemoryFs::new()),
            clock: Arc::new(FixedClock::new(start)),
            bus: EventBus::new(),
        }
    }

    pub fn deps(&self) -> Deps {
        let fs: Arc<dyn CacheFs> = self.fs.clone();
        Deps::default()
            .with_hasher(TableHasher)
            .with_fs(fs)
            .with_clock(self.clock.clone())
            .with_dispatch(self.bus.sender().unwrap())
    }

    pub fn pipeline(&self, config: CacheConfig) -> Pipeline {
        Pipeline::new(config).with_deps(self.deps())
    }

    /// A pipeline caching to the in-memory root `.`.
    pub fn cached(&self) -> Pipeline {
        self.pipeline(CacheConfig::default().with_location("."))
    }
}
