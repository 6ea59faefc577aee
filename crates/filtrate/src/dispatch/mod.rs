//! File-event dispatch.
//!
//! The [`Dispatcher`] turns one verified [`FileEvent`] into one independent
//! [`FilterJob`] per matching filter and hands each to a [`JobScheduler`].
//! Submission never blocks and imposes no order on the jobs.

mod scheduler;

pub use scheduler::TokioScheduler;

use crate::core::config::FiltrateConfig;
use crate::plugins::FilterRegistry;
use crate::types::{FileEvent, FilterJob};
use std::fmt;
use std::sync::Arc;

/// Accepts jobs for asynchronous execution.
pub trait JobScheduler: Send + Sync {
    /// Enqueue `job` and return immediately.
    fn submit(&self, job: FilterJob);
}

/// Matches file events against the filter registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<FilterRegistry>,
    scheduler: Arc<dyn JobScheduler>,
    case_sensitive: bool,
    require_existing_file: bool,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("filters", &self.registry.len())
            .field("case_sensitive", &self.case_sensitive)
            .field("require_existing_file", &self.require_existing_file)
            .finish()
    }
}

impl Dispatcher {
    /// Dispatcher with case-sensitive extension matching.
    pub fn new(registry: Arc<FilterRegistry>, scheduler: Arc<dyn JobScheduler>) -> Self {
        Self {
            registry,
            scheduler,
            case_sensitive: true,
            require_existing_file: false,
        }
    }

    pub fn from_config(config: &FiltrateConfig, registry: Arc<FilterRegistry>, scheduler: Arc<dyn JobScheduler>) -> Self {
        Self::new(registry, scheduler)
            .case_sensitive(config.case_sensitive_extensions)
            .require_existing_file(config.require_existing_file)
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Skip events whose path does not exist on local storage.
    pub fn require_existing_file(mut self, require: bool) -> Self {
        self.require_existing_file = require;
        self
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Schedule one job per filter claiming the event's file extension.
    ///
    /// Returns the number of jobs submitted. Unverified events, files
    /// without an extension, and files nothing claims all yield zero.
    pub fn dispatch(&self, event: &FileEvent) -> usize {
        if !event.verified {
            tracing::warn!(
                "Skipping unverified file file_id={} ({})",
                event.file_id,
                event.path.display()
            );
            return 0;
        }

        if self.require_existing_file && !event.path.exists() {
            tracing::error!("File file_id={} not found at {}", event.file_id, event.path.display());
            return 0;
        }

        let Some(extension) = event.extension() else {
            tracing::debug!("No extension on {}, nothing to dispatch", event.path.display());
            return 0;
        };

        let mut scheduled = 0;
        for spec in self.registry.matching(extension, self.case_sensitive) {
            tracing::info!(
                "Scheduling filter '{}' for file_id={} ({})",
                spec.display_name,
                event.file_id,
                event.path.display()
            );
            self.scheduler.submit(FilterJob::new(spec.clone(), event));
            scheduled += 1;
        }

        if scheduled == 0 {
            tracing::debug!("No filter claims .{} (file_id={})", extension, event.file_id);
        }

        scheduled
    }
}
