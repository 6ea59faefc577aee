//! Execution of a single filter job.
//!
//! ```text
//! PENDING -> LOCK_ACQUIRED -> EXECUTING -> SUCCESS | NO_RESULT | FILTER_ERROR -> RELEASED
//!    \
//!     -> LOCKED_OUT
//! ```
//!
//! A loader failure goes from `LOCK_ACQUIRED` straight to `RELEASED`. Every
//! path that acquired the lock releases it exactly once, including a panic
//! inside the filter. Jobs are not cancellable: dropping the `run` future
//! leaves the filter running, and the lock stays held until it finishes.

use crate::core::config::FiltrateConfig;
use crate::lock::LockService;
use crate::plugins::{FilterLoader, TagPolicy};
use crate::sink::ResultSink;
use crate::types::{FilterJob, LockHandle, SaveMetadataRequest};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// States a job passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    LockAcquired,
    Executing,
    Success,
    NoResult,
    FilterError,
    Released,
    LockedOut,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "PENDING",
            JobState::LockAcquired => "LOCK_ACQUIRED",
            JobState::Executing => "EXECUTING",
            JobState::Success => "SUCCESS",
            JobState::NoResult => "NO_RESULT",
            JobState::FilterError => "FILTER_ERROR",
            JobState::Released => "RELEASED",
            JobState::LockedOut => "LOCKED_OUT",
        };
        f.write_str(name)
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOutcome {
    /// Another runner holds the lock, or the lock store couldn't confirm it
    LockedOut,
    /// Metadata was extracted and handed to the sink
    Success,
    /// The filter returned nothing
    NoResult,
    /// The filter panicked
    FilterError,
    /// The filter couldn't be resolved or constructed
    LoadFailed,
}

impl JobOutcome {
    /// Whether this job held the lock (and therefore released it).
    pub fn held_lock(&self) -> bool {
        !matches!(self, JobOutcome::LockedOut)
    }

    /// The state reached just before release (or the terminal state for `LockedOut`).
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::LockedOut => JobState::LockedOut,
            JobOutcome::Success => JobState::Success,
            JobOutcome::NoResult => JobState::NoResult,
            JobOutcome::FilterError => JobState::FilterError,
            JobOutcome::LoadFailed => JobState::LockAcquired,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobOutcome::LockedOut => "locked-out",
            JobOutcome::Success => "success",
            JobOutcome::NoResult => "no-result",
            JobOutcome::FilterError => "filter-error",
            JobOutcome::LoadFailed => "load-failed",
        };
        f.write_str(name)
    }
}

/// Lock TTL and message routing used by a [`JobRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    pub lock_ttl: Duration,
    pub queue: String,
    pub priority: u8,
    pub task_name: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&FiltrateConfig::default())
    }
}

impl RunnerSettings {
    pub fn from_config(config: &FiltrateConfig) -> Self {
        Self {
            lock_ttl: config.lock.ttl(),
            queue: config.sink.queue.clone(),
            priority: config.sink.priority,
            task_name: config.sink.task_name.clone(),
        }
    }
}

/// Runs one [`FilterJob`] under its per-(filter, file) lock.
#[derive(Clone)]
pub struct JobRunner {
    lock: Arc<dyn LockService>,
    loader: FilterLoader,
    sink: Arc<dyn ResultSink>,
    settings: Arc<RunnerSettings>,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("lock", &self.lock.backend())
            .field("loader", &self.loader)
            .field("sink", &self.sink.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl JobRunner {
    pub fn new(lock: Arc<dyn LockService>, loader: FilterLoader, sink: Arc<dyn ResultSink>) -> Self {
        Self::with_settings(lock, loader, sink, RunnerSettings::default())
    }

    pub fn with_settings(
        lock: Arc<dyn LockService>,
        loader: FilterLoader,
        sink: Arc<dyn ResultSink>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            lock,
            loader,
            sink,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run `job` to completion.
    ///
    /// Never returns an error: every failure is logged and contained to this job.
    pub async fn run(&self, job: FilterJob) -> JobOutcome {
        let handle = job.lock_handle();
        let filter = job.spec.display_name.clone();
        let file_id = job.file_id;

        tracing::info!(
            "Run: filter={}, file_id={}, path={}",
            job.spec.loadable_ref,
            file_id,
            job.path.display()
        );

        match self.lock.acquire(&handle, self.settings.lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    "Skipping filter '{}' for file_id={}: lock {} is held",
                    filter,
                    file_id,
                    handle
                );
                return JobOutcome::LockedOut;
            }
            Err(e) => {
                tracing::error!(
                    "Skipping filter '{}' for file_id={}: lock {} unavailable: {}",
                    filter,
                    file_id,
                    handle,
                    e
                );
                return JobOutcome::LockedOut;
            }
        }
        tracing::trace!("{} file_id={}: {} -> {}", filter, file_id, JobState::Pending, JobState::LockAcquired);

        // Owns the lock from here on. Dropping this future detaches the task,
        // which still runs the filter to completion before releasing.
        let supervised = tokio::spawn(supervise(
            Arc::clone(&self.lock),
            handle.clone(),
            self.loader.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.settings),
            job,
        ));

        match supervised.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    "Runner for filter '{}' on file_id={} stopped before release, lock {} left to expire: {}",
                    filter,
                    file_id,
                    handle,
                    e
                );
                JobOutcome::FilterError
            }
        }
    }
}

async fn supervise(
    lock: Arc<dyn LockService>,
    handle: LockHandle,
    loader: FilterLoader,
    sink: Arc<dyn ResultSink>,
    settings: Arc<RunnerSettings>,
    job: FilterJob,
) -> JobOutcome {
    let filter = job.spec.display_name.clone();
    let file_id = job.file_id;

    let outcome = match tokio::spawn(execute(loader, sink, settings, job)).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            tracing::error!("Filter '{}' panicked on file_id={}: {}", filter, file_id, panic_message(e));
            JobOutcome::FilterError
        }
        Err(e) => {
            tracing::error!("Filter '{}' task for file_id={} was cancelled: {}", filter, file_id, e);
            JobOutcome::FilterError
        }
    };

    if let Err(e) = lock.release(&handle).await {
        tracing::warn!("Failed to release lock {}: {}", handle, e);
    }
    tracing::trace!("{} file_id={}: {} -> {}", filter, file_id, outcome.state(), JobState::Released);

    outcome
}

async fn execute(
    loader: FilterLoader,
    sink: Arc<dyn ResultSink>,
    settings: Arc<RunnerSettings>,
    job: FilterJob,
) -> JobOutcome {
    let spec = &job.spec;

    let policy = match TagPolicy::from_spec(spec) {
        Ok(policy) => policy,
        Err(e) => {
            tracing::error!("Invalid tag policy for filter '{}': {}", spec.display_name, e);
            return JobOutcome::LoadFailed;
        }
    };

    let filter = match loader.load(spec) {
        Ok(filter) => filter,
        Err(e) => {
            tracing::error!(
                "Can't load filter '{}' ({}) for file_id={}: {}",
                spec.display_name,
                spec.loadable_ref,
                job.file_id,
                e
            );
            return JobOutcome::LoadFailed;
        }
    };

    tracing::trace!("{} file_id={}: {} -> {}", spec.display_name, job.file_id, JobState::LockAcquired, JobState::Executing);
    let result = filter.apply(job.file_id, &job.path, &job.source_uri).await;

    if let Err(e) = filter.shutdown() {
        tracing::warn!("Filter '{}' shutdown failed: {}", filter.name(), e);
    }

    let Some(raw) = result else {
        tracing::error!(
            "Can't get metadata for filter={}, file_id={}, path={}",
            spec.loadable_ref,
            job.file_id,
            job.path.display()
        );
        return JobOutcome::NoResult;
    };

    let request = SaveMetadataRequest {
        task: settings.task_name.clone(),
        file_id: job.file_id,
        output_name: spec.output_name.clone(),
        output_schema: spec.output_schema.clone(),
        metadata: policy.apply(raw),
        queue: settings.queue.clone(),
        priority: settings.priority,
    };

    let tags = request.metadata.len();
    match sink.publish(request).await {
        Ok(()) => tracing::debug!(
            "Published {} tag(s) from '{}' for file_id={} to {}",
            tags,
            spec.display_name,
            job.file_id,
            sink.name()
        ),
        Err(e) => tracing::error!(
            "Failed to publish metadata from '{}' for file_id={}: {}",
            spec.display_name,
            job.file_id,
            e
        ),
    }

    JobOutcome::Success
}

fn panic_message(error: tokio::task::JoinError) -> String {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
