//! In-process queue on a bounded tokio mpsc channel.
//!
//! Items live only in memory; a restart drops whatever was still queued.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use super::QueueAdapter;
use crate::errors::QueueError;

/// Bounded queue adapter over [`tokio::sync::mpsc`].
///
/// The receiver sits behind an async mutex so clones of the adapter can be
/// pulled from by several workers.
pub struct MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    sender: mpsc::Sender<T>,
}

impl<T> MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    /// `buffer` is the number of items that fit before `push` waits.
    pub fn new(buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer);
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            sender,
        }
    }

    pub fn max_capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

#[async_trait]
impl<T> QueueAdapter<T> for MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    async fn pull(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        let item = receiver.recv().await;
        trace!(has_item = item.is_some(), "Pulled item from MPSC queue");
        item
    }

    async fn push(&self, work: T) -> Result<()> {
        self.sender
            .send(work)
            .await
            .map_err(|e| QueueError::MpscOperationFailed {
                operation: "send".to_string(),
                details: e.to_string(),
            })?;
        trace!("Pushed item to MPSC queue");
        Ok(())
    }

    async fn try_push(&self, work: T) -> Result<()> {
        self.sender.try_send(work).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::CapacityExceeded {
                queue_type: "mpsc".to_string(),
                capacity: self.sender.max_capacity(),
            },
            mpsc::error::TrySendError::Closed(_) => QueueError::MpscOperationFailed {
                operation: "try_send".to_string(),
                details: "channel closed".to_string(),
            },
        })?;
        Ok(())
    }

    async fn depth(&self) -> Option<usize> {
        Some(self.sender.max_capacity() - self.sender.capacity())
    }

    async fn is_healthy(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl<T> Clone for MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            sender: self.sender.clone(),
        }
    }
}
