use super::JobScheduler;
use crate::runner::{JobOutcome, JobRunner};
use crate::types::FilterJob;
use crate::{FiltrateError, Result};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::task::TaskTracker;

/// Runs jobs as tokio tasks, at most `max_concurrent` at a time.
///
/// Each submitted job becomes its own task; a semaphore bounds how many run
/// their filter concurrently. See [`TokioScheduler::drain`] for waiting on
/// in-flight jobs.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runner: Arc<JobRunner>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    runtime: Handle,
    outcomes: Option<mpsc::UnboundedSender<(FilterJob, JobOutcome)>>,
}

impl TokioScheduler {
    /// Create a scheduler on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when `max_concurrent` is zero and `Other` when
    /// called outside a tokio runtime.
    pub fn new(runner: Arc<JobRunner>, max_concurrent: usize) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(FiltrateError::validation("max_concurrent must be at least 1"));
        }

        let runtime = Handle::try_current()
            .map_err(|e| FiltrateError::Other(format!("TokioScheduler requires a tokio runtime: {}", e)))?;

        Ok(Self {
            runner,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            tracker: TaskTracker::new(),
            runtime,
            outcomes: None,
        })
    }

    /// Report every finished job on the returned channel.
    pub fn with_outcomes(mut self) -> (Self, mpsc::UnboundedReceiver<(FilterJob, JobOutcome)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outcomes = Some(tx);
        (self, rx)
    }

    /// Number of submitted jobs that haven't finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every job submitted so far to finish.
    ///
    /// Jobs submitted while draining are waited for as well.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl JobScheduler for TokioScheduler {
    fn submit(&self, job: FilterJob) {
        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.permits);
        let outcomes = self.outcomes.clone();

        self.tracker.spawn_on(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    tracing::error!("Scheduler closed; dropping job for file_id={}", job.file_id);
                    return;
                };

                let report = outcomes.as_ref().map(|_| job.clone());
                let outcome = runner.run(job).await;

                if let (Some(tx), Some(job)) = (outcomes, report) {
                    let _ = tx.send((job, outcome));
                }
            },
            &self.runtime,
        );
    }
}
