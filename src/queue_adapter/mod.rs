//! Work queue abstraction between request handling and background workers.
//!
//! Forwarding pushes one tracking job per accepted task; the tracker pool
//! pulls them. Both sides depend only on [`QueueAdapter`], so the channel
//! behind it can be swapped without touching either: [`MpscQueueAdapter`]
//! keeps jobs in process, [`RedisQueueAdapter`] shares them between
//! instances and survives restarts.
//!
//! ```rust,ignore
//! use protes::queue_adapter::{MpscQueueAdapter, QueueAdapter};
//!
//! let queue = Arc::new(MpscQueueAdapter::<TrackingJob>::new(1000));
//! queue.try_push(job).await?;
//!
//! while let Some(job) = queue.pull().await {
//!     track(job).await;
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

mod mpsc;
mod redis;

pub use mpsc::MpscQueueAdapter;
pub use redis::RedisQueueAdapter;

/// A queue of work items of type `T`.
#[async_trait]
pub trait QueueAdapter<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Wait for the next item. `None` when nothing could be pulled; a
    /// healthy queue may return `None` after a bounded wait.
    async fn pull(&self) -> Option<T>;

    /// Enqueue, waiting for room if the queue is bounded and full.
    async fn push(&self, work: T) -> Result<()>;

    /// Enqueue without waiting; a full queue is an error.
    async fn try_push(&self, work: T) -> Result<()> {
        self.push(work).await
    }

    /// Acknowledge a processed item. Queues without redelivery ignore it.
    async fn ack(&self, _item: &T) -> Result<()> {
        Ok(())
    }

    /// Items waiting, when the implementation can tell.
    async fn depth(&self) -> Option<usize> {
        None
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
