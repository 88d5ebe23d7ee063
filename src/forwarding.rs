//! Task submission, listing, lookup and cancellation.
//!
//! [`TaskRuns`] is the engine behind the `/tasks` endpoints. A submission is
//! ranked by the middleware pipeline, persisted under a fresh task id and
//! then offered to the ranked backends one after the other until one accepts
//! it. The accepted task is handed to the tracker pool through the tracking
//! queue and the client gets its id back without waiting for any polling.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::config::{Config, TaskIdConfig};
use crate::constants::FUNNEL_SERVICE_NAME;
use crate::errors::{StorageError, TaskError};
use crate::middleware::uri::strip_auth;
use crate::middleware::{MiddlewarePipeline, TaskRequest};
use crate::models::{
    BasicAuth, DbDocument, TesEndpoint, TesTask, TesTaskLog, now_rfc3339, remote_task_id,
};
use crate::queue_adapter::QueueAdapter;
use crate::states::TesState;
use crate::storage::{DocumentConnector, Projection, TaskStore};
use crate::tasks::{TrackerRegistry, TrackingJob};
use crate::tes_client::TesClient;

/// How much of a task `GET /tasks` and `GET /tasks/{id}` return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskView {
    /// Only `id` and `state`
    Minimal,
    /// Everything but input contents, executor output and system logs
    #[default]
    Basic,
    Full,
}

impl TaskView {
    pub fn projection(&self) -> Projection {
        match self {
            TaskView::Minimal => Projection::include(["task.id", "task.state"]),
            TaskView::Basic => Projection::exclude([
                "task.inputs.content",
                "task.logs.system_logs",
                "task.logs.logs.stdout",
                "task.logs.logs.stderr",
                "worker_id",
                "tes_endpoint",
                "basic_auth",
                "task_original",
            ]),
            TaskView::Full => {
                Projection::exclude(["worker_id", "tes_endpoint", "basic_auth", "task_original"])
            }
        }
    }
}

impl FromStr for TaskView {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINIMAL" => Ok(Self::Minimal),
            "BASIC" => Ok(Self::Basic),
            "FULL" => Ok(Self::Full),
            other => Err(TaskError::InvalidView {
                view: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<Value>,
    /// Cursor of the last task on this page, empty on the last page
    pub next_page_token: String,
}

/// Handle on an enqueued tracking job.
#[derive(Debug, Clone)]
pub struct TrackingHandle {
    pub worker_id: String,
    pub cancel: CancellationToken,
}

/// The parts of [`Config`] the engine reads.
#[derive(Debug, Clone)]
pub struct ForwardingSettings {
    pub service_list: Vec<String>,
    pub default_page_size: usize,
    pub task_id: TaskIdConfig,
    pub store_logs: bool,
    pub request_timeout: Duration,
}

impl ForwardingSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            service_list: config.tes.service_list.clone(),
            default_page_size: *config.default_page_size.as_ref(),
            task_id: config.task_id.clone(),
            store_logs: config.store_logs,
            request_timeout: *config.http_client_timeout.as_ref(),
        }
    }
}

/// Random identifier of `length` symbols drawn uniformly from `charset`.
pub fn generate_task_id(charset: &[char], length: usize) -> String {
    if charset.is_empty() {
        return String::new();
    }
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| charset[rng.gen_range(0..charset.len())])
        .collect()
}

#[derive(Clone)]
pub struct TaskRuns {
    store: Arc<dyn TaskStore>,
    pipeline: MiddlewarePipeline,
    queue: Arc<dyn QueueAdapter<TrackingJob>>,
    registry: TrackerRegistry,
    http_client: reqwest::Client,
    settings: ForwardingSettings,
}

impl TaskRuns {
    pub fn new(
        store: Arc<dyn TaskStore>,
        pipeline: MiddlewarePipeline,
        queue: Arc<dyn QueueAdapter<TrackingJob>>,
        registry: TrackerRegistry,
        http_client: reqwest::Client,
        settings: ForwardingSettings,
    ) -> Self {
        Self {
            store,
            pipeline,
            queue,
            registry,
            http_client,
            settings,
        }
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    /// Accept a task submission and forward it to the first backend that
    /// takes it.
    ///
    /// Ranking and forwarding run on their own task: once started, a
    /// submission runs to a forwarded or `SYSTEM_ERROR` state even if the
    /// caller goes away.
    pub async fn create_task(
        &self,
        payload: Value,
        basic_auth: BasicAuth,
        user_id: Option<String>,
    ) -> Result<CreateTaskResponse, TaskError> {
        let runs = self.clone();
        tokio::spawn(
            async move { runs.forward_submission(payload, basic_auth, user_id).await }
                .in_current_span(),
        )
        .await
        .map_err(|e| TaskError::SubmissionAborted {
            details: e.to_string(),
        })?
    }

    #[instrument(skip_all, fields(task_id = tracing::field::Empty, worker_id = tracing::field::Empty))]
    async fn forward_submission(
        &self,
        payload: Value,
        basic_auth: BasicAuth,
        user_id: Option<String>,
    ) -> Result<CreateTaskResponse, TaskError> {
        if !payload.is_object() {
            return Err(TaskError::BadRequest {
                details: "task must be a JSON object".to_string(),
            });
        }

        let request = self.pipeline.apply(TaskRequest::new(payload)).await?;
        let tes_uris = if request.tes_uris.is_empty() {
            self.settings.service_list.clone()
        } else {
            request.tes_uris
        };
        let payload = request.payload;

        let parsed = serde_json::from_value::<TesTask>(payload.clone())
            .map_err(|e| e.to_string())
            .and_then(|task| {
                if task.executors.is_empty() {
                    Err("at least one executor is required".to_string())
                } else {
                    Ok(task)
                }
            });

        let mut task = parsed.clone().unwrap_or_default();
        let start_time = now_rfc3339();
        task.state = TesState::Unknown;
        task.creation_time.get_or_insert_with(|| start_time.clone());
        task.logs = Some(match task.logs.take() {
            Some(mut logs) if !logs.is_empty() => {
                for log in logs.iter_mut() {
                    log.start_time = Some(start_time.clone());
                }
                logs
            }
            _ => vec![TesTaskLog::started_now()],
        });

        let document = self
            .insert_with_unique_id(DbDocument {
                task,
                task_original: payload,
                user_id,
                worker_id: String::new(),
                basic_auth,
                tes_endpoint: TesEndpoint::default(),
            })
            .await?;
        let task_id = document.task.id.clone().unwrap_or_default();
        tracing::Span::current().record("task_id", task_id.as_str());
        tracing::Span::current().record("worker_id", document.worker_id.as_str());

        let connector = DocumentConnector::new(self.store.clone(), document.worker_id.clone());

        if let Err(details) = parsed {
            connector
                .update_task_state(TesState::SystemError.as_str())
                .await?;
            return Err(TaskError::BadRequest {
                details: format!("task '{}' could not be validated: {}", task_id, details),
            });
        }

        info!(candidates = tes_uris.len(), "Trying to forward task");

        let mut failures: Vec<String> = Vec::new();
        for tes_uri in &tes_uris {
            match self.submit(&document, tes_uri).await {
                Ok((remote_task_id, remote_state)) => {
                    info!(
                        tes_uri = %strip_auth(tes_uri),
                        remote_task_id = %remote_task_id,
                        "Task forwarded"
                    );
                    let document = self
                        .record_forwarding(&connector, tes_uri, &remote_task_id, remote_state, &failures)
                        .await?;
                    let job = TrackingJob {
                        worker_id: document.worker_id.clone(),
                        remote_host: document.tes_endpoint.host.clone(),
                        remote_base_path: document.tes_endpoint.base_path.clone(),
                        remote_task_id,
                        basic_auth: document.basic_auth.clone(),
                    };
                    if let Err(e) = self.enqueue_tracking(job).await {
                        error!(error = %e, "Task forwarded but its progress will not be tracked");
                    }
                    return Ok(CreateTaskResponse { id: task_id });
                }
                Err(details) => {
                    warn!(tes_uri = %strip_auth(tes_uri), error = %details, "TES instance did not accept task");
                    failures.push(format!(
                        "forwarding to {} failed: {}",
                        strip_auth(tes_uri),
                        details
                    ));
                }
            }
        }

        error!(attempts = failures.len(), "No TES instance accepted task");
        if self.settings.store_logs && !failures.is_empty() {
            self.append_system_logs(&connector, &failures).await?;
        }
        connector
            .update_task_state(TesState::SystemError.as_str())
            .await?;
        Err(TaskError::NoTesInstancesAvailable { task_id })
    }

    /// Push a tracking job and register its cancellation token.
    pub async fn enqueue_tracking(&self, job: TrackingJob) -> Result<TrackingHandle, TaskError> {
        let worker_id = job.worker_id.clone();
        let cancel = self.registry.token(&worker_id);
        if let Err(e) = self.queue.try_push(job).await {
            self.registry.remove(&worker_id);
            return Err(TaskError::EnqueueFailed {
                details: e.to_string(),
            });
        }
        debug!(worker_id = %worker_id, "Tracking job enqueued");
        Ok(TrackingHandle { worker_id, cancel })
    }

    #[instrument(skip(self, user_id))]
    pub async fn list_tasks(
        &self,
        page_size: Option<usize>,
        page_token: Option<String>,
        view: TaskView,
        user_id: Option<&str>,
    ) -> Result<ListTasksResponse, TaskError> {
        let page_size = page_size
            .filter(|size| *size > 0)
            .unwrap_or(self.settings.default_page_size);
        let page_token = match page_token.as_deref() {
            None | Some("") => None,
            Some(token) => Some(token.parse::<u64>().map_err(|_| TaskError::BadRequest {
                details: format!("invalid page token '{}'", token),
            })?),
        };

        // One extra document tells whether another page exists.
        let mut documents = self
            .store
            .list(
                page_size.saturating_add(1),
                page_token,
                user_id,
                Some(&view.projection()),
            )
            .await?;

        let next_page_token = if documents.len() > page_size {
            documents.truncate(page_size);
            documents
                .last()
                .map(|document| document.cursor.to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };
        let tasks = documents
            .into_iter()
            .map(|mut document| document.document["task"].take())
            .collect();

        Ok(ListTasksResponse {
            tasks,
            next_page_token,
        })
    }

    #[instrument(skip(self, user_id))]
    pub async fn get_task(
        &self,
        task_id: &str,
        view: TaskView,
        user_id: Option<&str>,
    ) -> Result<Value, TaskError> {
        let mut document = self
            .store
            .find_by_task_id(task_id, user_id, Some(&view.projection()))
            .await?
            .ok_or_else(|| TaskError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        Ok(document["task"].take())
    }

    /// Cancel a task that is still cancelable. Finished tasks are left as
    /// they are and no backend is contacted.
    #[instrument(skip(self, user_id))]
    pub async fn cancel_task(&self, task_id: &str, user_id: Option<&str>) -> Result<Value, TaskError> {
        let value = self
            .store
            .find_by_task_id(task_id, user_id, None)
            .await?
            .ok_or_else(|| TaskError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        let document: DbDocument =
            serde_json::from_value(value).map_err(|e| StorageError::SchemaMismatch {
                details: e.to_string(),
            })?;

        if !document.task.state.is_cancelable() {
            debug!(state = %document.task.state, "Task not cancelable, nothing to do");
            return Ok(json!({}));
        }

        self.registry.cancel(&document.worker_id);

        let remote_id = document
            .task
            .logs
            .as_ref()
            .and_then(|logs| logs.first())
            .and_then(remote_task_id);
        match remote_id {
            Some(remote_id) => {
                let cancelled = match TesClient::new(
                    self.http_client.clone(),
                    &document.tes_endpoint,
                    document.basic_auth.clone(),
                    self.settings.request_timeout,
                ) {
                    Ok(client) => client.cancel_task(&remote_id).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                if let Err(details) = cancelled {
                    warn!(
                        tes_uri = %strip_auth(&document.tes_endpoint.host),
                        remote_task_id = %remote_id,
                        error = %details,
                        "Remote cancellation failed, canceling locally"
                    );
                }
            }
            None => warn!("No remote task id recorded, canceling locally"),
        }

        DocumentConnector::new(self.store.clone(), document.worker_id.clone())
            .update_task_state(TesState::Canceled.as_str())
            .await?;
        info!(worker_id = %document.worker_id, "Task canceled");
        Ok(json!({}))
    }

    async fn insert_with_unique_id(&self, document: DbDocument) -> Result<DbDocument, TaskError> {
        let mut document = document;
        let attempts = self.settings.task_id.insert_attempts;
        for _ in 0..attempts {
            document.task.id = Some(generate_task_id(
                self.settings.task_id.charset.as_ref(),
                self.settings.task_id.length,
            ));
            document.worker_id = uuid::Uuid::new_v4().to_string();
            match self.store.insert_document(&document).await {
                Ok(()) => return Ok(document),
                Err(StorageError::DuplicateKey { key }) => {
                    debug!(key = %key, "Identifier taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TaskError::IdsUnavailable { attempts })
    }

    /// One forwarding attempt. Returns the remote id and, when the backend
    /// could be asked, the state it reports.
    async fn submit(
        &self,
        document: &DbDocument,
        tes_uri: &str,
    ) -> Result<(String, Option<TesState>), String> {
        let client = TesClient::new(
            self.http_client.clone(),
            &TesEndpoint {
                host: tes_uri.to_string(),
                base_path: String::new(),
            },
            document.basic_auth.clone(),
            self.settings.request_timeout,
        )
        .map_err(|e| e.to_string())?;

        let is_funnel = match client.get_service_info().await {
            Ok(info) => info.get("name").and_then(Value::as_str) == Some(FUNNEL_SERVICE_NAME),
            Err(e) => {
                debug!(error = %e, "Service info lookup failed, assuming default behaviour");
                false
            }
        };

        let body = submission_body(&document.task, is_funnel).map_err(|e| e.to_string())?;
        let remote_task_id = client.create_task(&body).await.map_err(|e| e.to_string())?;

        let remote_state = match client.get_task(&remote_task_id).await {
            Ok(remote) => TesTask::from_backend(&remote).ok().map(|task| task.state),
            Err(e) => {
                error!(error = %e, "Task info could not be retrieved from TES instance");
                None
            }
        };
        Ok((remote_task_id, remote_state))
    }

    async fn record_forwarding(
        &self,
        connector: &DocumentConnector,
        tes_uri: &str,
        remote_task_id: &str,
        remote_state: Option<TesState>,
        failures: &[String],
    ) -> Result<DbDocument, TaskError> {
        let mut endpoint = Map::new();
        endpoint.insert("host".to_string(), json!(tes_uri));
        endpoint.insert("base_path".to_string(), json!(""));
        let document = connector
            .upsert_fields_in_root_object("tes_endpoint", endpoint)
            .await?;

        let end_time = now_rfc3339();
        let mut logs = document.task.logs.clone().unwrap_or_default();
        for (index, log) in logs.iter_mut().enumerate() {
            log.end_time = Some(end_time.clone());
            if self.settings.store_logs {
                log.metadata.insert(
                    "forwarded_to".to_string(),
                    json!({"id": remote_task_id, "url": tes_uri}),
                );
                if index == 0 {
                    log.system_logs.extend(failures.iter().cloned());
                }
            } else {
                log.metadata = Map::new();
                log.metadata
                    .insert("remote_task_id".to_string(), json!(remote_task_id));
            }
        }

        let mut fields = Map::new();
        fields.insert(
            "logs".to_string(),
            serde_json::to_value(&logs).map_err(|e| StorageError::InvalidInput {
                details: e.to_string(),
            })?,
        );
        if let Some(state) = remote_state {
            fields.insert("state".to_string(), json!(state));
        }
        Ok(connector.upsert_fields_in_root_object("task", fields).await?)
    }

    async fn append_system_logs(
        &self,
        connector: &DocumentConnector,
        messages: &[String],
    ) -> Result<(), TaskError> {
        let document = connector.get_document(None).await?;
        let mut logs = document.task.logs.unwrap_or_default();
        if let Some(first) = logs.first_mut() {
            first.system_logs.extend(messages.iter().cloned());
        }
        let mut fields = Map::new();
        fields.insert(
            "logs".to_string(),
            serde_json::to_value(&logs).map_err(|e| StorageError::InvalidInput {
                details: e.to_string(),
            })?,
        );
        connector.upsert_fields_in_root_object("task", fields).await?;
        Ok(())
    }
}

/// Task as sent to a backend: no proxy id, state or logs, and credentials
/// removed from input and output URLs unless the backend needs them.
pub fn submission_body(task: &TesTask, keep_credentials: bool) -> Result<Value, TaskError> {
    let mut task = task.clone();
    task.id = None;
    task.logs = None;
    if !keep_credentials {
        for input in task.inputs.iter_mut().flatten() {
            input.url = input.url.as_deref().map(strip_auth);
        }
        for output in task.outputs.iter_mut().flatten() {
            output.url = strip_auth(&output.url);
        }
    }

    let mut body = serde_json::to_value(&task).map_err(|e| TaskError::BadRequest {
        details: e.to_string(),
    })?;
    if let Some(object) = body.as_object_mut() {
        object.remove("state");
    }
    Ok(body)
}
