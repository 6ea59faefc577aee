//! Filtrate - Asynchronous Metadata Filter Dispatch
//!
//! Filtrate runs a configurable set of extractor plugins ("filters") against
//! newly ingested data files. Each filter invocation is an independent job,
//! at most one job runs per (filter, file) pair at a time, and extracted
//! metadata is relayed to a downstream consumer.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use filtrate::{FileEvent, FiltrateConfig, FilterSpec, Worker};
//!
//! # #[tokio::main]
//! # async fn main() -> filtrate::Result<()> {
//! let mut config = FiltrateConfig::default();
//! config.filters.push(FilterSpec::new(
//!     "PDF preview",
//!     &["pdf"],
//!     "filtrate.filters.pdf.PdfImageFilter",
//!     "PDF",
//!     "http://example.org/schemas/pdf",
//! ));
//!
//! let worker = Worker::from_config(config).await?;
//! let scheduled = worker.dispatch(&FileEvent::new(7, true, "/data/report.pdf", "ds/report.pdf"));
//! assert_eq!(scheduled, 1);
//! worker.drain().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Dispatch** (`dispatch`): matches a file's extension against the registry and schedules jobs
//! - **Runner** (`runner`): lock, load, invoke, publish, release
//! - **Lock Service** (`lock`): atomic acquire-if-absent with TTL, in-memory or Redis
//! - **Plugin System** (`plugins`): filter traits, registry, catalog, and loader
//! - **Result Sink** (`sink`): in-process channel or Redis list
//! - **Filters** (`filters`): built-in CSV, PDF, FCS, and diffraction image filters
//! - **Core** (`core`): configuration loading and one-time runtime initialization

#![deny(unsafe_code)]

pub mod core;
pub mod dispatch;
pub mod error;
pub mod filters;
pub mod lock;
pub mod plugins;
pub mod runner;
pub mod sink;
pub mod types;
pub mod worker;

pub use error::{FiltrateError, LoaderError, Result};

pub use types::*;

pub use core::config::FiltrateConfig;
pub use dispatch::{Dispatcher, JobScheduler, TokioScheduler};
pub use lock::{InMemoryLockService, LockService};
pub use runner::{JobOutcome, JobRunner, JobState, RunnerSettings};
pub use sink::{ChannelSink, ResultSink};
pub use worker::Worker;
