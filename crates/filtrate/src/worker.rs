//! Assembly of a complete worker from configuration.

use crate::Result;
use crate::core::config::FiltrateConfig;
use crate::dispatch::{Dispatcher, TokioScheduler};
use crate::lock::{LockService, lock_service_from_config};
use crate::plugins::{FilterContext, FilterLoader, FilterRegistry};
use crate::runner::{JobRunner, RunnerSettings};
use crate::sink::{ResultSink, sink_from_config};
use crate::types::{FileEvent, SaveMetadataRequest};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Every component wired together: lock service, sink, loader, runner,
/// scheduler, and dispatcher.
///
/// # Example
///
/// ```rust
/// use filtrate::{FiltrateConfig, FileEvent, Worker};
///
/// # #[tokio::main]
/// # async fn main() -> filtrate::Result<()> {
/// let worker = Worker::from_config(FiltrateConfig::default()).await?;
/// worker.dispatch(&FileEvent::new(1, true, "/data/sample.csv", "ds/sample.csv"));
/// worker.drain().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Worker {
    config: FiltrateConfig,
    registry: Arc<FilterRegistry>,
    runner: Arc<JobRunner>,
    scheduler: TokioScheduler,
    dispatcher: Dispatcher,
    results: Option<mpsc::UnboundedReceiver<SaveMetadataRequest>>,
}

impl Worker {
    /// Validate `config` and connect its backends.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn from_config(config: FiltrateConfig) -> Result<Self> {
        config.validate()?;

        let lock = lock_service_from_config(&config.lock).await?;
        let configured = sink_from_config(&config.sink).await?;
        let loader = FilterLoader::new(FilterContext::from_config(&config));

        Self::assemble(config, lock, loader, configured.sink, configured.receiver)
    }

    /// Build a worker from already-constructed parts.
    pub fn assemble(
        config: FiltrateConfig,
        lock: Arc<dyn LockService>,
        loader: FilterLoader,
        sink: Arc<dyn ResultSink>,
        results: Option<mpsc::UnboundedReceiver<SaveMetadataRequest>>,
    ) -> Result<Self> {
        let registry = Arc::new(FilterRegistry::from_config(&config));
        let runner = Arc::new(JobRunner::with_settings(
            lock,
            loader,
            sink,
            RunnerSettings::from_config(&config),
        ));
        let scheduler = TokioScheduler::new(Arc::clone(&runner), config.max_concurrent_jobs())?;
        let dispatcher = Dispatcher::from_config(&config, Arc::clone(&registry), Arc::new(scheduler.clone()));

        tracing::info!(
            "Worker ready: {} filter(s), {} job slot(s)",
            registry.len(),
            config.max_concurrent_jobs()
        );

        Ok(Self {
            config,
            registry,
            runner,
            scheduler,
            dispatcher,
            results,
        })
    }

    pub fn config(&self) -> &FiltrateConfig {
        &self.config
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Dispatch one file event; see [`Dispatcher::dispatch`].
    pub fn dispatch(&self, event: &FileEvent) -> usize {
        self.dispatcher.dispatch(event)
    }

    /// Wait for all scheduled jobs to finish.
    pub async fn drain(&self) {
        self.scheduler.drain().await;
    }

    /// Take the receiving end of the channel sink, if that backend is configured.
    pub fn take_results(&mut self) -> Option<mpsc::UnboundedReceiver<SaveMetadataRequest>> {
        self.results.take()
    }
}
