//! Redis-backed queue for running several proxy instances against one
//! tracking queue.
//!
//! Each adapter owns two lists: the shared primary list `{prefix}primary`
//! and its own in-flight list `{prefix}{worker_id}`. `BRPOPLPUSH` moves an
//! item from the first to the second, `ack` removes it with `LREM`. Items
//! still in-flight when a process dies are moved back by
//! [`RedisQueueAdapter::recover_worker_queue`] on the next start.

use anyhow::Result;
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, redis::AsyncCommands};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, error, trace};

use super::QueueAdapter;
use crate::errors::QueueError;

/// How long one `pull` blocks on an empty queue before returning `None`.
const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(1);

pub struct RedisQueueAdapter<T>
where
    T: Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
{
    pool: Pool,
    worker_id: String,
    primary_queue_name: String,
    worker_queue_name: String,
    block_timeout: Duration,
    _phantom: PhantomData<T>,
}

impl<T> RedisQueueAdapter<T>
where
    T: Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
{
    /// `worker_id` defaults to a random UUID, `prefix` to `queue:tracking:`.
    pub fn new(pool: Pool, worker_id: Option<String>, prefix: Option<String>) -> Self {
        let worker_id = worker_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let prefix = prefix.unwrap_or_else(|| "queue:tracking:".to_string());
        let primary_queue_name = format!("{}primary", prefix);
        let worker_queue_name = format!("{}{}", prefix, worker_id);

        debug!(
            worker_id = %worker_id,
            primary_queue = %primary_queue_name,
            worker_queue = %worker_queue_name,
            "Initializing Redis queue adapter"
        );

        Self {
            pool,
            worker_id,
            primary_queue_name,
            worker_queue_name,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
            _phantom: PhantomData,
        }
    }

    pub fn with_block_timeout(mut self, block_timeout: Duration) -> Self {
        self.block_timeout = block_timeout;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn primary_queue_name(&self) -> &str {
        &self.primary_queue_name
    }

    pub fn worker_queue_name(&self) -> &str {
        &self.worker_queue_name
    }

    async fn connection(&self) -> Result<Connection> {
        Ok(self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                queue_type: "redis".to_string(),
                details: e.to_string(),
            })?)
    }

    /// Move items left in this worker's in-flight list back to the primary
    /// list. Returns how many were moved.
    pub async fn recover_worker_queue(&self) -> Result<usize> {
        let mut conn = self.connection().await?;

        let mut recovered = 0;
        loop {
            let item: Option<String> = conn
                .rpoplpush(&self.worker_queue_name, &self.primary_queue_name)
                .await
                .map_err(|e| QueueError::RedisOperationFailed {
                    operation: "rpoplpush (recovery)".to_string(),
                    source: e,
                })?;
            if item.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            debug!(
                worker_id = %self.worker_id,
                count = recovered,
                "Recovered items from worker queue to primary queue"
            );
        }
        Ok(recovered)
    }

    /// Items pulled by this worker and not acknowledged yet.
    pub async fn worker_queue_depth(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        let depth: usize = conn.llen(&self.worker_queue_name).await.map_err(|e| {
            QueueError::RedisOperationFailed {
                operation: "llen (worker queue depth)".to_string(),
                source: e,
            }
        })?;
        Ok(depth)
    }
}

#[async_trait]
impl<T> QueueAdapter<T> for RedisQueueAdapter<T>
where
    T: Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
{
    /// Blocks up to the block timeout; `None` on an empty queue or a Redis
    /// failure, so callers should check `is_healthy` before giving up.
    async fn pull(&self) -> Option<T> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = ?e, "Failed to get Redis connection");
                return None;
            }
        };

        let result: Result<Option<String>, _> = conn
            .brpoplpush(
                &self.primary_queue_name,
                &self.worker_queue_name,
                self.block_timeout.as_secs_f64(),
            )
            .await;

        match result {
            Ok(Some(data)) => match serde_json::from_str(&data) {
                Ok(item) => {
                    trace!(worker_id = %self.worker_id, "Pulled item from Redis queue");
                    Some(item)
                }
                Err(e) => {
                    error!(error = ?e, "Failed to deserialize item from queue, dropping it");
                    if let Err(e) = conn
                        .lrem::<_, _, ()>(&self.worker_queue_name, 1, &data)
                        .await
                    {
                        error!(error = ?e, "Failed to drop malformed item");
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!(error = ?e, "Failed to pull item from Redis queue");
                None
            }
        }
    }

    async fn push(&self, work: T) -> Result<()> {
        let mut conn = self.connection().await?;
        let serialized = serde_json::to_string(&work)?;

        conn.lpush::<_, _, ()>(&self.primary_queue_name, &serialized)
            .await
            .map_err(|e| QueueError::RedisOperationFailed {
                operation: "lpush".to_string(),
                source: e,
            })?;

        trace!(queue = %self.primary_queue_name, "Pushed item to Redis queue");
        Ok(())
    }

    async fn ack(&self, item: &T) -> Result<()> {
        let mut conn = self.connection().await?;
        let serialized = serde_json::to_string(item)?;

        let removed: i64 = conn
            .lrem(&self.worker_queue_name, 1, &serialized)
            .await
            .map_err(|e| QueueError::RedisOperationFailed {
                operation: "lrem (ack)".to_string(),
                source: e,
            })?;

        if removed == 0 {
            trace!("Item not found in worker queue for acknowledgment");
        }
        Ok(())
    }

    async fn depth(&self) -> Option<usize> {
        let mut conn = self.pool.get().await.ok()?;
        match conn.llen::<_, usize>(&self.primary_queue_name).await {
            Ok(depth) => Some(depth),
            Err(e) => {
                error!(error = ?e, "Failed to get queue depth");
                None
            }
        }
    }

    async fn is_healthy(&self) -> bool {
        match self.pool.get().await {
            Ok(mut conn) => matches!(
                deadpool_redis::redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                    .as_deref(),
                Ok("PONG")
            ),
            Err(_) => false,
        }
    }
}
