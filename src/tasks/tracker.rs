//! Background tracking of forwarded tasks.
//!
//! Forwarding enqueues one [`TrackingJob`] per accepted task. The
//! [`TrackerTask`] pulls jobs and runs [`track_task_progress`] for each,
//! bounded by a semaphore. A tracker polls its backend until the task
//! finishes, its failure budget runs out, or its cancellation token fires.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::registry::TrackerRegistry;
use crate::config::{PollingConfig, TrackerResetPolicy};
use crate::errors::{QueueError, StorageError};
use crate::models::{BasicAuth, DbDocument, TesEndpoint, TesTask, TesTaskLog};
use crate::queue_adapter::QueueAdapter;
use crate::states::TesState;
use crate::storage::{DocumentConnector, StorageResult, TaskStore};
use crate::tes_client::TesClient;

/// Pause after an empty pull from an unavailable queue.
const QUEUE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Everything a tracker needs to follow one remote task.
#[derive(Clone, Serialize, Deserialize)]
pub struct TrackingJob {
    pub worker_id: String,
    pub remote_host: String,
    pub remote_base_path: String,
    pub remote_task_id: String,
    #[serde(default)]
    pub basic_auth: BasicAuth,
}

impl std::fmt::Debug for TrackingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingJob")
            .field("worker_id", &self.worker_id)
            .field("remote_host", &crate::middleware::uri::strip_auth(&self.remote_host))
            .field("remote_base_path", &self.remote_base_path)
            .field("remote_task_id", &self.remote_task_id)
            .finish_non_exhaustive()
    }
}

impl TrackingJob {
    pub fn endpoint(&self) -> TesEndpoint {
        TesEndpoint {
            host: self.remote_host.clone(),
            base_path: self.remote_base_path.clone(),
        }
    }
}

/// How a single tracker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingOutcome {
    /// The backend reported this finished state.
    Finished(TesState),
    /// The very first fetch failed; the task was set to `SYSTEM_ERROR`.
    InitialFetchFailed,
    /// Too many failed polls; the task was set to `SYSTEM_ERROR`.
    FailureBudgetExhausted,
    /// Stopped by cancellation without further writes.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct TrackerMetrics {
    pub started: AtomicU64,
    pub finished: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
}

/// Worker pool draining the tracking queue.
pub struct TrackerTask {
    adapter: Arc<dyn QueueAdapter<TrackingJob>>,
    store: Arc<dyn TaskStore>,
    registry: TrackerRegistry,
    http_client: reqwest::Client,
    polling: PollingConfig,
    request_timeout: Duration,
    cancel_token: CancellationToken,
    semaphore: Arc<Semaphore>,
    metrics: Arc<TrackerMetrics>,
}

impl TrackerTask {
    pub fn new(
        adapter: Arc<dyn QueueAdapter<TrackingJob>>,
        store: Arc<dyn TaskStore>,
        registry: TrackerRegistry,
        http_client: reqwest::Client,
        polling: PollingConfig,
        request_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(polling.max_concurrent));
        Self {
            adapter,
            store,
            registry,
            http_client,
            polling,
            request_timeout,
            cancel_token,
            semaphore,
            metrics: Arc::new(TrackerMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<TrackerMetrics> {
        self.metrics.clone()
    }

    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        info!(
            max_concurrent = self.polling.max_concurrent,
            "Tracker pool started"
        );

        if !self.adapter.is_healthy().await {
            return Err(QueueError::ConnectionFailed {
                queue_type: "tracking".to_string(),
                details: "tracking queue is not available".to_string(),
            }
            .into());
        }

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Tracker pool shutting down");
                    break;
                }
                job = self.adapter.pull() => {
                    let Some(job) = job else {
                        if !self.adapter.is_healthy().await {
                            warn!("Tracking queue unavailable, pausing");
                            tokio::select! {
                                () = self.cancel_token.cancelled() => {}
                                () = sleep(QUEUE_RETRY_DELAY) => {}
                            }
                        }
                        continue;
                    };
                    let permit = self.semaphore.clone().acquire_owned().await?;
                    self.spawn_tracker(job, permit);
                }
            }
        }

        // Wait for running trackers; they observe the same cancellation.
        let _permits = self
            .semaphore
            .acquire_many(self.polling.max_concurrent as u32)
            .await?;

        info!(
            started = self.metrics.started.load(Ordering::Relaxed),
            finished = self.metrics.finished.load(Ordering::Relaxed),
            failed = self.metrics.failed.load(Ordering::Relaxed),
            cancelled = self.metrics.cancelled.load(Ordering::Relaxed),
            "Tracker pool stopped"
        );
        Ok(())
    }

    fn spawn_tracker(&self, job: TrackingJob, permit: tokio::sync::OwnedSemaphorePermit) {
        let adapter = self.adapter.clone();
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let polling = self.polling.clone();
        let connector = DocumentConnector::new(self.store.clone(), job.worker_id.clone());
        let token = registry.token(&job.worker_id);
        let client = TesClient::new(
            self.http_client.clone(),
            &job.endpoint(),
            job.basic_auth.clone(),
            self.request_timeout,
        );

        metrics.started.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = match client {
                Ok(client) => {
                    track_task_progress(&job, &connector, &client, &polling, &token).await
                }
                Err(e) => {
                    error!(worker_id = %job.worker_id, error = %e, "Tracking impossible, invalid TES endpoint");
                    connector
                        .update_task_state(TesState::SystemError.as_str())
                        .await
                        .map(|_| TrackingOutcome::InitialFetchFailed)
                }
            };

            match outcome {
                Ok(TrackingOutcome::Finished(state)) => {
                    metrics.finished.fetch_add(1, Ordering::Relaxed);
                    info!(worker_id = %job.worker_id, %state, "Task tracking finished");
                }
                Ok(TrackingOutcome::Cancelled) => {
                    metrics.cancelled.fetch_add(1, Ordering::Relaxed);
                    info!(worker_id = %job.worker_id, "Task tracking cancelled");
                }
                Ok(outcome) => {
                    metrics.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(worker_id = %job.worker_id, ?outcome, "Task tracking gave up");
                }
                Err(e) => {
                    metrics.failed.fetch_add(1, Ordering::Relaxed);
                    error!(worker_id = %job.worker_id, error = %e, "Task tracking failed on storage");
                }
            }

            registry.remove(&job.worker_id);
            if let Err(e) = adapter.ack(&job).await {
                warn!(worker_id = %job.worker_id, error = %e, "Failed to acknowledge tracking job");
            }
        });
    }
}

/// Poll one remote task until it is finished, mirroring state into the
/// task document.
#[instrument(skip_all, fields(worker_id = %job.worker_id, remote_task_id = %job.remote_task_id))]
pub async fn track_task_progress(
    job: &TrackingJob,
    connector: &DocumentConnector,
    client: &TesClient,
    polling: &PollingConfig,
    cancel: &CancellationToken,
) -> StorageResult<TrackingOutcome> {
    if cancel.is_cancelled() {
        return Ok(TrackingOutcome::Cancelled);
    }
    connector
        .update_task_state(TesState::Initializing.as_str())
        .await?;

    let mut latest = match fetch(client, &job.remote_task_id).await {
        Ok(task) => task,
        Err(details) => {
            error!(error = %details, "Initial fetch of remote task failed");
            if cancel.is_cancelled() {
                return Ok(TrackingOutcome::Cancelled);
            }
            connector
                .update_task_state(TesState::SystemError.as_str())
                .await?;
            return Ok(TrackingOutcome::InitialFetchFailed);
        }
    };
    if cancel.is_cancelled() {
        return Ok(TrackingOutcome::Cancelled);
    }
    upsert_remote_task(connector, latest.clone()).await?;

    let mut state = latest.state;
    let mut failures: u32 = 0;
    while !state.is_finished() {
        tokio::select! {
            () = cancel.cancelled() => return Ok(TrackingOutcome::Cancelled),
            () = sleep(polling.wait) => {}
        }

        match fetch(client, &job.remote_task_id).await {
            Ok(task) => {
                if polling.reset_policy == TrackerResetPolicy::Reset {
                    failures = 0;
                }
                if cancel.is_cancelled() {
                    return Ok(TrackingOutcome::Cancelled);
                }
                if task.state != state {
                    connector.update_task_state(task.state.as_str()).await?;
                    debug!(from = %state, to = %task.state, "Remote task state changed");
                    state = task.state;
                }
                latest = task;
            }
            Err(details) => {
                failures += 1;
                if failures > polling.attempts {
                    error!(failures, error = %details, "Polling failure budget exhausted");
                    if cancel.is_cancelled() {
                        return Ok(TrackingOutcome::Cancelled);
                    }
                    connector
                        .update_task_state(TesState::SystemError.as_str())
                        .await?;
                    return Ok(TrackingOutcome::FailureBudgetExhausted);
                }
                warn!(failures, budget = polling.attempts, error = %details, "Polling remote task failed, retrying");
            }
        }
    }

    if cancel.is_cancelled() {
        return Ok(TrackingOutcome::Cancelled);
    }
    upsert_remote_task(connector, latest).await?;
    Ok(TrackingOutcome::Finished(state))
}

async fn fetch(client: &TesClient, remote_task_id: &str) -> Result<TesTask, String> {
    let value = client
        .get_task(remote_task_id)
        .await
        .map_err(|e| e.to_string())?;
    TesTask::from_backend(&value).map_err(|e| e.to_string())
}

/// Write the backend's view of the task into `task`, keeping the proxy's
/// task id and its own log entries.
async fn upsert_remote_task(
    connector: &DocumentConnector,
    remote: TesTask,
) -> StorageResult<DbDocument> {
    let current = connector.get_document(None).await?;
    let mut remote = remote;
    remote.id = current.task.id.clone();
    remote.logs = Some(merge_logs(
        current.task.logs.unwrap_or_default(),
        remote.logs.unwrap_or_default(),
    ));

    let fields = match serde_json::to_value(&remote) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => Map::new(),
        Err(e) => {
            return Err(StorageError::InvalidInput {
                details: e.to_string(),
            });
        }
    };
    connector.upsert_fields_in_root_object("task", fields).await
}

/// Executor logs and output file logs come from the backend, index by
/// index. System logs, metadata and times of local entries stay as they are.
fn merge_logs(local: Vec<TesTaskLog>, remote: Vec<TesTaskLog>) -> Vec<TesTaskLog> {
    let mut merged = local;
    for (index, remote_log) in remote.into_iter().enumerate() {
        match merged.get_mut(index) {
            Some(entry) => {
                entry.logs = remote_log.logs;
                entry.outputs = remote_log.outputs;
            }
            None => merged.push(TesTaskLog {
                logs: remote_log.logs,
                outputs: remote_log.outputs,
                ..TesTaskLog::default()
            }),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::remote_task_id;
    use crate::queue_adapter::MpscQueueAdapter;
    use crate::storage::InMemoryTaskStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

    /// Replies with the given states in order, repeating the last one.
    struct StateSequence {
        states: Vec<&'static str>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl StateSequence {
        fn new(states: Vec<&'static str>) -> Self {
            Self {
                states,
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl Respond for StateSequence {
        fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let state = self.states[call.min(self.states.len() - 1)];
            if state == "FAIL" {
                return ResponseTemplate::new(500);
            }
            ResponseTemplate::new(200).set_body_json(json!({
                "id": "remote-1",
                "state": state,
                "executors": [{"image": "alpine", "command": ["echo", "hello"]}],
                "logs": [{"logs": [{"exit_code": 0, "stdout": "hello\n"}], "metadata": {"host": "node-1"}}]
            }))
        }
    }

    fn polling(attempts: u32, reset_policy: TrackerResetPolicy) -> PollingConfig {
        PollingConfig {
            wait: Duration::from_millis(5),
            attempts,
            reset_policy,
            ..PollingConfig::default()
        }
    }

    async fn setup(server: &MockServer) -> (Arc<InMemoryTaskStore>, DocumentConnector, TesClient, TrackingJob) {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut log = TesTaskLog::started_now();
        log.metadata.insert(
            "forwarded_to".to_string(),
            json!({"id": "remote-1", "url": server.uri()}),
        );
        let document = DbDocument {
            task: TesTask {
                id: Some("ABC123".to_string()),
                logs: Some(vec![log]),
                ..Default::default()
            },
            task_original: json!({}),
            user_id: None,
            worker_id: "worker-1".to_string(),
            basic_auth: BasicAuth::default(),
            tes_endpoint: TesEndpoint {
                host: server.uri(),
                base_path: String::new(),
            },
        };
        store.insert_document(&document).await.unwrap();

        let job = TrackingJob {
            worker_id: "worker-1".to_string(),
            remote_host: server.uri(),
            remote_base_path: String::new(),
            remote_task_id: "remote-1".to_string(),
            basic_auth: BasicAuth::default(),
        };
        let connector = DocumentConnector::new(store.clone(), "worker-1");
        let client = TesClient::new(
            reqwest::Client::new(),
            &job.endpoint(),
            BasicAuth::default(),
            Duration::from_secs(2),
        )
        .unwrap();
        (store, connector, client, job)
    }

    async fn mount(server: &MockServer, states: Vec<&'static str>) {
        Mock::given(method("GET"))
            .and(path("/ga4gh/tes/v1/tasks/remote-1"))
            .respond_with(StateSequence::new(states))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_tracks_until_complete() {
        let server = MockServer::start().await;
        mount(&server, vec!["QUEUED", "RUNNING", "RUNNING", "COMPLETE"]).await;
        let (_store, connector, client, job) = setup(&server).await;

        let outcome = track_task_progress(
            &job,
            &connector,
            &client,
            &polling(3, TrackerResetPolicy::Reset),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, TrackingOutcome::Finished(TesState::Complete));

        let document = connector.get_document(None).await.unwrap();
        assert_eq!(document.task.state, TesState::Complete);
        assert_eq!(document.task.id.as_deref(), Some("ABC123"));
        let logs = document.task.logs.unwrap();
        assert_eq!(logs[0].logs[0].stdout.as_deref(), Some("hello\n"));
        assert_eq!(remote_task_id(&logs[0]).as_deref(), Some("remote-1"));
    }

    #[tokio::test]
    async fn test_local_log_entries_survive_tracking() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ga4gh/tes/v1/tasks/remote-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "remote-1",
                "state": "COMPLETE",
                "logs": [{"logs": [{"exit_code": 0}], "system_logs": ["remote only"]}]
            })))
            .mount(&server)
            .await;
        let (_store, connector, client, job) = setup(&server).await;
        connector
            .upsert_fields_in_root_object(
                "task",
                Map::from_iter([(
                    "logs".to_string(),
                    json!([{
                        "metadata": {"forwarded_to": {"id": "remote-1", "url": server.uri()}},
                        "start_time": "2024-01-01T00:00:00Z",
                        "system_logs": ["forwarding to https://down.example.org failed: 500"]
                    }]),
                )]),
            )
            .await
            .unwrap();

        let outcome = track_task_progress(
            &job,
            &connector,
            &client,
            &polling(3, TrackerResetPolicy::Reset),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, TrackingOutcome::Finished(TesState::Complete));

        let document = connector.get_document(None).await.unwrap();
        let logs = document.task.logs.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(
            logs[0].system_logs,
            vec!["forwarding to https://down.example.org failed: 500".to_string()]
        );
        assert_eq!(logs[0].start_time.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(logs[0].logs.len(), 1);
        assert_eq!(logs[0].logs[0].exit_code, 0);
        assert_eq!(remote_task_id(&logs[0]).as_deref(), Some("remote-1"));
    }

    #[test]
    fn test_merge_logs_appends_extra_remote_entries() {
        let local = vec![TesTaskLog {
            system_logs: vec!["local".to_string()],
            ..TesTaskLog::default()
        }];
        let remote: Vec<TesTaskLog> = serde_json::from_value(json!([
            {"logs": [{"exit_code": 1}], "system_logs": ["remote"]},
            {"logs": [{"exit_code": 2}], "outputs": [{"url": "s3://b/o", "path": "/o", "size_bytes": "3"}]}
        ]))
        .unwrap();

        let merged = merge_logs(local, remote);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].system_logs, vec!["local".to_string()]);
        assert_eq!(merged[0].logs[0].exit_code, 1);
        assert!(merged[1].system_logs.is_empty());
        assert_eq!(merged[1].outputs[0].url, "s3://b/o");
    }

    #[tokio::test]
    async fn test_finished_state_is_final() {
        let server = MockServer::start().await;
        mount(&server, vec!["RUNNING", "EXECUTOR_ERROR", "RUNNING", "COMPLETE"]).await;
        let (_store, connector, client, job) = setup(&server).await;

        let outcome = track_task_progress(
            &job,
            &connector,
            &client,
            &polling(3, TrackerResetPolicy::Reset),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, TrackingOutcome::Finished(TesState::ExecutorError));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let document = connector.get_document(None).await.unwrap();
        assert_eq!(document.task.state, TesState::ExecutorError);
    }

    #[tokio::test]
    async fn test_initial_fetch_failure_is_system_error() {
        let server = MockServer::start().await;
        mount(&server, vec!["FAIL", "COMPLETE"]).await;
        let (_store, connector, client, job) = setup(&server).await;

        let outcome = track_task_progress(
            &job,
            &connector,
            &client,
            &polling(3, TrackerResetPolicy::Reset),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, TrackingOutcome::InitialFetchFailed);
        let document = connector.get_document(None).await.unwrap();
        assert_eq!(document.task.state, TesState::SystemError);
    }

    #[tokio::test]
    async fn test_reset_policy_decides_budget() {
        let sequence = vec!["RUNNING", "FAIL", "FAIL", "RUNNING", "FAIL", "FAIL", "COMPLETE"];

        let server = MockServer::start().await;
        mount(&server, sequence.clone()).await;
        let (_store, connector, client, job) = setup(&server).await;
        let outcome = track_task_progress(
            &job,
            &connector,
            &client,
            &polling(2, TrackerResetPolicy::Reset),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, TrackingOutcome::Finished(TesState::Complete));

        let server = MockServer::start().await;
        mount(&server, sequence).await;
        let (_store, connector, client, job) = setup(&server).await;
        let outcome = track_task_progress(
            &job,
            &connector,
            &client,
            &polling(2, TrackerResetPolicy::Cumulative),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, TrackingOutcome::FailureBudgetExhausted);
        let document = connector.get_document(None).await.unwrap();
        assert_eq!(document.task.state, TesState::SystemError);
    }

    #[tokio::test]
    async fn test_cancellation_stops_without_writes() {
        let server = MockServer::start().await;
        mount(&server, vec!["RUNNING"]).await;
        let (_store, connector, client, job) = setup(&server).await;

        let cancel = CancellationToken::new();
        let tracker = {
            let cancel = cancel.clone();
            let connector = connector.clone();
            tokio::spawn(async move {
                track_task_progress(
                    &job,
                    &connector,
                    &client,
                    &polling(3, TrackerResetPolicy::Reset),
                    &cancel,
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        connector
            .update_task_state(TesState::Canceled.as_str())
            .await
            .unwrap();

        let outcome = tracker.await.unwrap().unwrap();
        assert_eq!(outcome, TrackingOutcome::Cancelled);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let document = connector.get_document(None).await.unwrap();
        assert_eq!(document.task.state, TesState::Canceled);
    }

    #[tokio::test]
    async fn test_pool_runs_queued_jobs_and_stops() {
        let server = MockServer::start().await;
        mount(&server, vec!["RUNNING", "COMPLETE"]).await;
        let (store, connector, _client, job) = setup(&server).await;

        let queue = Arc::new(MpscQueueAdapter::<TrackingJob>::new(10));
        let app_token = CancellationToken::new();
        let registry = TrackerRegistry::new(app_token.clone());
        let task = TrackerTask::new(
            queue.clone(),
            store,
            registry.clone(),
            reqwest::Client::new(),
            polling(3, TrackerResetPolicy::Reset),
            Duration::from_secs(2),
            app_token.clone(),
        );
        let metrics = task.metrics();
        let handle = tokio::spawn(task.run());

        registry.token(&job.worker_id);
        queue.push(job).await.unwrap();

        for _ in 0..200 {
            if metrics.finished.load(Ordering::Relaxed) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(metrics.finished.load(Ordering::Relaxed), 1);
        let document = connector.get_document(None).await.unwrap();
        assert_eq!(document.task.state, TesState::Complete);

        app_token.cancel();
        handle.await.unwrap().unwrap();
        assert!(registry.is_empty());
    }

    /// In-process queue whose acknowledgements always fail.
    struct RejectingAck {
        inner: MpscQueueAdapter<TrackingJob>,
        acks: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl QueueAdapter<TrackingJob> for RejectingAck {
        async fn pull(&self) -> Option<TrackingJob> {
            self.inner.pull().await
        }

        async fn push(&self, work: TrackingJob) -> anyhow::Result<()> {
            self.inner.push(work).await
        }

        async fn ack(&self, _item: &TrackingJob) -> anyhow::Result<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("acknowledgement rejected")
        }
    }

    #[tokio::test]
    async fn test_failed_ack_does_not_stop_the_pool() {
        let server = MockServer::start().await;
        mount(&server, vec!["COMPLETE"]).await;
        let (store, _connector, _client, job) = setup(&server).await;

        let queue = Arc::new(RejectingAck {
            inner: MpscQueueAdapter::new(10),
            acks: std::sync::atomic::AtomicUsize::new(0),
        });
        let app_token = CancellationToken::new();
        let registry = TrackerRegistry::new(app_token.clone());
        let task = TrackerTask::new(
            queue.clone(),
            store,
            registry.clone(),
            reqwest::Client::new(),
            polling(3, TrackerResetPolicy::Reset),
            Duration::from_secs(2),
            app_token.clone(),
        );
        let metrics = task.metrics();
        let handle = tokio::spawn(task.run());

        queue.push(job.clone()).await.unwrap();
        queue.push(job).await.unwrap();

        for _ in 0..200 {
            if queue.acks.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.acks.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.finished.load(Ordering::Relaxed), 2);
        assert!(!handle.is_finished());

        app_token.cancel();
        handle.await.unwrap().unwrap();
    }
}
