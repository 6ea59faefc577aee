use super::{ResultSink, task_message};
use crate::types::SaveMetadataRequest;
use crate::{FiltrateError, Result};
use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use std::fmt;

/// Sink that pushes task messages onto a Redis list named after the queue.
///
/// Consumers pop from the other end (`BRPOP <queue>`). Priority travels in
/// the message body.
#[derive(Clone)]
pub struct RedisQueueSink {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisQueueSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueueSink")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisQueueSink {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        tracing::info!("Connecting to Redis result queue at {}", redis_url);

        let client = ::redis::Client::open(redis_url)
            .map_err(|e| FiltrateError::sink_with_source("Failed to create Redis client", e))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| FiltrateError::sink_with_source("Failed to connect to Redis", e))?;

        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ResultSink for RedisQueueSink {
    async fn publish(&self, request: SaveMetadataRequest) -> Result<()> {
        let payload = task_message(&request)?;
        let mut conn = self.conn.clone();

        tracing::trace!("Queue LPUSH: {} (file_id={})", request.queue, request.file_id);

        conn.lpush::<_, _, ()>(&request.queue, payload)
            .await
            .map_err(|e| FiltrateError::sink_with_source(format!("Redis LPUSH failed for {}", request.queue), e))
    }

    fn name(&self) -> &str {
        "redis"
    }
}
