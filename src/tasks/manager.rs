//! Lifecycle helpers for the long-running units of the service.

use std::future::Future;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};

/// Spawn `task_builder` on `tracker`, handing it the application token.
///
/// The future is expected to honour the token and drain on its own, so it is
/// awaited to completion rather than dropped on cancellation. A failure
/// cancels the application token, which brings the whole service down.
pub fn spawn_cancellable_task<F, Fut>(
    tracker: &TaskTracker,
    app_token: CancellationToken,
    task_name: &'static str,
    task_builder: F,
) where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    info!(task = task_name, "Starting background task");

    tracker.spawn(async move {
        match task_builder(app_token.clone()).await {
            Ok(()) if app_token.is_cancelled() => {
                info!(task = task_name, "Background task stopped after shutdown");
            }
            Ok(()) => {
                info!(task = task_name, "Background task completed");
            }
            Err(e) => {
                error!(task = task_name, error = ?e, "Background task failed, shutting down");
                app_token.cancel();
            }
        }
    });
}
