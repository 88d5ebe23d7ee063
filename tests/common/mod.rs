//! Shared harness for the HTTP integration tests: the real router and
//! tracker pool wired to in-memory storage, served on an ephemeral port.

#![allow(dead_code)]

use anyhow::Result;
use protes::{
    config::Config,
    forwarding::{ForwardingSettings, TaskRuns},
    http::{context::WebContext, server::build_router},
    middleware::MiddlewarePipeline,
    queue_adapter::{MpscQueueAdapter, QueueAdapter},
    service_info::ServiceInfoManager,
    storage::{InMemoryServiceInfoStore, InMemoryTaskStore},
    tasks::{TrackerRegistry, TrackerTask, TrackingJob, spawn_cancellable_task},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub store: Arc<InMemoryTaskStore>,
    pub token: CancellationToken,
    pub tracker: TaskTracker,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get_json(&self, path: &str) -> Result<(u16, Value)> {
        let response = self.client.get(self.url(path)).send().await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<(u16, Value)> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    /// Poll a task until `done` holds or a few seconds have passed.
    pub async fn wait_for(&self, task_id: &str, done: impl Fn(&Value) -> bool) -> Result<Value> {
        let mut last = Value::Null;
        for _ in 0..200 {
            let (_, task) = self
                .get_json(&format!("/tasks/{task_id}?view=FULL"))
                .await?;
            if done(&task) {
                return Ok(task);
            }
            last = task;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        anyhow::bail!("task {task_id} never reached the expected shape, last seen: {last}")
    }

    pub async fn wait_for_state(&self, task_id: &str, state: &str) -> Result<Value> {
        self.wait_for(task_id, |task| task["state"] == state).await
    }

    /// Wait until a tracker has mirrored the backend's view at least once.
    pub async fn wait_for_tracking(&self, task_id: &str) -> Result<Value> {
        self.wait_for(task_id, |task| {
            task["logs"][0]["logs"][0]["stdout"] == "hello\n"
        })
        .await
    }

    pub async fn shutdown(self) {
        self.tracker.close();
        self.token.cancel();
        self.tracker.wait().await;
    }
}

/// Defaults suited to tests: fast polling against the given backends.
pub fn test_config(service_list: Vec<String>) -> Result<Config> {
    let mut config = Config::with_defaults(service_list)?;
    config.http_client_timeout = "2".to_string().try_into()?;
    config.polling.wait = Duration::from_millis(10);
    config.polling.attempts = 3;
    Ok(config)
}

pub async fn spawn_app(config: Config, pipeline: MiddlewarePipeline) -> Result<TestApp> {
    let http_client = reqwest::Client::new();
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    let store = Arc::new(InMemoryTaskStore::new());
    let queue: Arc<dyn QueueAdapter<TrackingJob>> =
        Arc::new(MpscQueueAdapter::<TrackingJob>::new(config.polling.queue_size));
    let registry = TrackerRegistry::new(token.clone());

    let task_runs = TaskRuns::new(
        store.clone(),
        pipeline,
        queue.clone(),
        registry.clone(),
        http_client.clone(),
        ForwardingSettings::from_config(&config),
    );
    let service_info = ServiceInfoManager::new(
        Arc::new(InMemoryServiceInfoStore::new()),
        config.service_info.clone(),
    );

    let tracker_task = TrackerTask::new(
        queue,
        store.clone(),
        registry,
        http_client.clone(),
        config.polling.clone(),
        *config.http_client_timeout.as_ref(),
        token.clone(),
    );
    spawn_cancellable_task(&tracker, token.clone(), "tracker_pool", move |_| {
        tracker_task.run()
    });

    let router = build_router(WebContext::new(
        config,
        task_runs,
        service_info,
        http_client.clone(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    spawn_cancellable_task(&tracker, token.clone(), "http_server", move |cancel_token| async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel_token.cancelled().await })
            .await?;
        Ok(())
    });

    Ok(TestApp {
        base_url: format!("http://{address}"),
        client: http_client,
        store,
        token,
        tracker,
    })
}

/// Replies with the given states in order, repeating the last one.
pub struct StateSequence {
    remote_id: String,
    states: Vec<&'static str>,
    calls: std::sync::atomic::AtomicUsize,
}

impl StateSequence {
    pub fn new(remote_id: &str, states: Vec<&'static str>) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            states,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl Respond for StateSequence {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let call = self
            .calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let state = self.states[call.min(self.states.len() - 1)];
        if state == "FAIL" {
            return ResponseTemplate::new(500);
        }
        ResponseTemplate::new(200).set_body_json(json!({
            "id": self.remote_id,
            "state": state,
            "executors": [{"image": "alpine", "command": ["echo", "hello"]}],
            "logs": [{
                "logs": [{"exit_code": 0, "stdout": "hello\n"}],
                "metadata": {"host": "node-1"},
                "system_logs": ["image pulled"]
            }]
        }))
    }
}

/// A backend TES instance that accepts every task as `remote_id` and then
/// reports `states` on successive polls.
pub async fn mount_backend(server: &MockServer, remote_id: &str, states: Vec<&'static str>) {
    Mock::given(method("GET"))
        .and(path("/ga4gh/tes/v1/service-info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "org.example.tes",
            "name": "TES"
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ga4gh/tes/v1/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": remote_id})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/ga4gh/tes/v1/tasks/{remote_id}")))
        .respond_with(StateSequence::new(remote_id, states))
        .mount(server)
        .await;
}

pub fn hello_task() -> Value {
    json!({"executors": [{"image": "alpine", "command": ["echo", "hello"]}]})
}
