//! Result sink: the channel extracted metadata is published to.
//!
//! Publishing is fire-and-forget from the job runner's point of view. The
//! runner hands over one [`SaveMetadataRequest`] per successful extraction,
//! logs a failed publish, and moves on; delivery guarantees belong to the
//! channel.

#[cfg(feature = "redis")]
mod redis_queue;

#[cfg(feature = "redis")]
pub use redis_queue::RedisQueueSink;

use crate::core::config::{SinkBackendKind, SinkConfig};
use crate::types::SaveMetadataRequest;
use crate::{FiltrateError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Destination for save-metadata requests.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Hand `request` to the channel without waiting for it to be persisted.
    async fn publish(&self, request: SaveMetadataRequest) -> Result<()>;

    /// Sink name for logging.
    fn name(&self) -> &str;
}

/// In-process sink backed by an unbounded tokio channel.
///
/// The receiving half is returned from [`ChannelSink::new`]; the embedding
/// application drains it and persists the metadata.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SaveMetadataRequest>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SaveMetadataRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ResultSink for ChannelSink {
    async fn publish(&self, request: SaveMetadataRequest) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|_| FiltrateError::sink("Result channel closed"))
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Wire form of a request: a task message naming the downstream task with
/// positional args `[file_id, output_name, output_schema, metadata]`.
pub fn task_message(request: &SaveMetadataRequest) -> Result<String> {
    let message = json!({
        "task": request.task,
        "args": [
            request.file_id,
            request.output_name,
            request.output_schema,
            request.metadata,
        ],
        "queue": request.queue,
        "priority": request.priority,
    });
    serde_json::to_string(&message)
        .map_err(|e| FiltrateError::serialization_with_source("Failed to encode save-metadata message", e))
}

/// Sink handle plus, for the channel backend, its receiver.
pub struct ConfiguredSink {
    pub sink: Arc<dyn ResultSink>,
    pub receiver: Option<mpsc::UnboundedReceiver<SaveMetadataRequest>>,
}

impl std::fmt::Debug for ConfiguredSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredSink")
            .field("sink", &self.sink.name())
            .field("has_receiver", &self.receiver.is_some())
            .finish()
    }
}

/// Build the sink described by `config`.
pub async fn sink_from_config(config: &SinkConfig) -> Result<ConfiguredSink> {
    match config.backend {
        SinkBackendKind::Channel => {
            let (sink, receiver) = ChannelSink::new();
            Ok(ConfiguredSink {
                sink: Arc::new(sink),
                receiver: Some(receiver),
            })
        }
        #[cfg(feature = "redis")]
        SinkBackendKind::Redis => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| FiltrateError::configuration("sink.url is required for the redis backend"))?;
            let sink = RedisQueueSink::connect(url).await?;
            Ok(ConfiguredSink {
                sink: Arc::new(sink),
                receiver: None,
            })
        }
        #[cfg(not(feature = "redis"))]
        SinkBackendKind::Redis => Err(FiltrateError::MissingDependency(
            "redis sink backend requires the 'redis' feature".to_string(),
        )),
    }
}
