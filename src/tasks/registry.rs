use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellation tokens of running trackers, keyed by worker id.
///
/// Tokens are children of the application token, so shutdown stops every
/// tracker. A token is created when tracking is enqueued and removed when
/// the tracker ends.
#[derive(Clone)]
pub struct TrackerRegistry {
    parent: CancellationToken,
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl TrackerRegistry {
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Token for `worker_id`, created on first use.
    pub fn token(&self, worker_id: &str) -> CancellationToken {
        self.tokens
            .lock()
            .entry(worker_id.to_string())
            .or_insert_with(|| self.parent.child_token())
            .clone()
    }

    /// Signal the tracker of `worker_id`. Returns whether one was registered.
    pub fn cancel(&self, worker_id: &str) -> bool {
        match self.tokens.lock().get(worker_id) {
            Some(token) => {
                token.cancel();
                debug!(worker_id, "Tracker cancellation signalled");
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, worker_id: &str) {
        self.tokens.lock().remove(worker_id);
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
