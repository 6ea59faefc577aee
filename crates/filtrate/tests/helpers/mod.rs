//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use filtrate::lock::{InMemoryLockService, LockService};
use filtrate::plugins::{FilterArgs, FilterCatalog, FilterContext, FilterFactory, FilterLoader, MetadataFilter, Plugin};
use filtrate::sink::ResultSink;
use filtrate::types::{ExtractedMetadata, LockHandle, MetadataValue, SaveMetadataRequest};
use filtrate::{FiltrateError, JobRunner, Result, RunnerSettings};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

pub const TEST_MODULE: &str = "tests.filters";

/// Route runner logs to the test harness; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Events recorded by [`capture_logs`].
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<(Level, String)>>>);

impl CapturedLogs {
    /// Messages logged at `level`, in order.
    pub fn at(&self, level: Level) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(recorded, _)| *recorded == level)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.at(Level::ERROR)
    }
}

struct CaptureLayer(CapturedLogs);

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        (self.0).0.lock().unwrap().push((*event.metadata().level(), visitor.0));
    }
}

/// Record every event emitted on this thread until the guard is dropped.
///
/// Use with the current-thread test runtime so spawned tasks log here too.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(CaptureLayer(logs.clone()))
        .set_default();
    (logs, guard)
}

/// How often scripted filters were built and applied.
#[derive(Debug, Default)]
pub struct ScriptedCounts {
    pub built: AtomicUsize,
    pub applied: AtomicUsize,
}

/// What a [`ScriptedFilter`] does when applied.
#[derive(Debug, Clone)]
pub enum Behavior {
    Returns(ExtractedMetadata),
    Nothing,
    Panics,
    Sleeps(Duration, ExtractedMetadata),
}

pub struct ScriptedFilter {
    behavior: Behavior,
    counts: Arc<ScriptedCounts>,
}

impl Plugin for ScriptedFilter {
    fn name(&self) -> &str {
        "scripted-filter"
    }

    fn version(&self) -> String {
        "1.0.0".to_string()
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MetadataFilter for ScriptedFilter {
    async fn apply(&self, _file_id: i64, _path: &Path, _source_uri: &str) -> Option<ExtractedMetadata> {
        self.counts.applied.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Returns(metadata) => Some(metadata.clone()),
            Behavior::Nothing => None,
            Behavior::Panics => panic!("scripted filter failure"),
            Behavior::Sleeps(duration, metadata) => {
                tokio::time::sleep(*duration).await;
                Some(metadata.clone())
            }
        }
    }
}

fn factory<F>(f: F) -> FilterFactory
where
    F: Fn(&FilterArgs<'_>, &FilterContext) -> Result<Arc<dyn MetadataFilter>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Catalog of scripted filters registered under `tests.filters.<symbol>`.
///
/// The returned counts are shared by all of them.
pub fn scripted_catalog(entries: &[(&str, Behavior)]) -> (Arc<RwLock<FilterCatalog>>, Arc<ScriptedCounts>) {
    let counts = Arc::new(ScriptedCounts::default());
    let mut catalog = FilterCatalog::new();

    for (symbol, behavior) in entries {
        let behavior = behavior.clone();
        let counts = Arc::clone(&counts);
        catalog
            .register(
                TEST_MODULE,
                symbol,
                factory(move |_args, _ctx| {
                    counts.built.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(ScriptedFilter {
                        behavior: behavior.clone(),
                        counts: Arc::clone(&counts),
                    }) as Arc<dyn MetadataFilter>)
                }),
            )
            .expect("register scripted filter");
    }

    (Arc::new(RwLock::new(catalog)), counts)
}

pub fn reference(symbol: &str) -> String {
    format!("{}.{}", TEST_MODULE, symbol)
}

pub fn metadata(pairs: &[(&str, &str)]) -> ExtractedMetadata {
    pairs
        .iter()
        .map(|(tag, value)| (tag.to_string(), MetadataValue::from(*value)))
        .collect()
}

/// In-memory lock that counts acquisitions and releases.
#[derive(Debug, Default)]
pub struct CountingLock {
    pub inner: InMemoryLockService,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub fail_acquire: bool,
}

impl CountingLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_acquire: true,
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockService for CountingLock {
    async fn acquire(&self, handle: &LockHandle, ttl: Duration) -> Result<bool> {
        if self.fail_acquire {
            return Err(FiltrateError::lock("store unreachable"));
        }
        let acquired = self.inner.acquire(handle, ttl).await?;
        if acquired {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
        Ok(acquired)
    }

    async fn release(&self, handle: &LockHandle) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release(handle).await
    }

    fn backend(&self) -> &str {
        "counting"
    }
}

/// Sink that keeps every published request.
#[derive(Debug, Default)]
pub struct RecordingSink {
    published: Mutex<Vec<SaveMetadataRequest>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<SaveMetadataRequest> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn publish(&self, request: SaveMetadataRequest) -> Result<()> {
        self.published.lock().unwrap().push(request);
        if self.fail {
            return Err(FiltrateError::sink("downstream rejected the message"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// A runner wired to a counting lock and a recording sink.
pub struct Harness {
    pub runner: JobRunner,
    pub lock: Arc<CountingLock>,
    pub sink: Arc<RecordingSink>,
    pub counts: Arc<ScriptedCounts>,
}

impl Harness {
    pub fn new(entries: &[(&str, Behavior)]) -> Self {
        Self::with_parts(entries, CountingLock::new(), RecordingSink::new())
    }

    pub fn with_parts(entries: &[(&str, Behavior)], lock: CountingLock, sink: RecordingSink) -> Self {
        init_tracing();
        let (catalog, counts) = scripted_catalog(entries);
        let lock = Arc::new(lock);
        let sink = Arc::new(sink);
        let loader = FilterLoader::with_catalog(catalog, FilterContext::new(std::env::temp_dir()));
        let runner = JobRunner::with_settings(
            Arc::clone(&lock) as Arc<dyn LockService>,
            loader,
            Arc::clone(&sink) as Arc<dyn ResultSink>,
            RunnerSettings::default(),
        );

        Self {
            runner,
            lock,
            sink,
            counts,
        }
    }

    pub fn calls(&self) -> usize {
        self.counts.applied.load(Ordering::SeqCst)
    }

    pub fn built(&self) -> usize {
        self.counts.built.load(Ordering::SeqCst)
    }
}
