//! TES wire types and the persisted task document.
//!
//! The wire types mirror the GA4GH TES schema closely enough to round-trip the
//! payloads of real backends; unknown fields are ignored on input. The
//! [`DbDocument`] is what the task store keeps per submitted task.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::states::TesState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TesFileType {
    #[default]
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub path: String,
    #[serde(default, rename = "type")]
    pub file_type: TesFileType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streamable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, rename = "type")]
    pub file_type: TesFileType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preemptible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_parameters: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_parameters_strict: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesExecutor {
    pub image: String,
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_error: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesExecutorLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default)]
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesOutputFileLog {
    pub url: String,
    pub path: String,
    #[serde(default)]
    pub size_bytes: String,
}

/// One forwarding attempt as seen by the client.
///
/// `metadata` carries either `forwarded_to: {id, url}` or `remote_task_id`,
/// depending on whether full logs are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesTaskLog {
    #[serde(default)]
    pub logs: Vec<TesExecutorLog>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub outputs: Vec<TesOutputFileLog>,
    #[serde(default)]
    pub system_logs: Vec<String>,
}

impl TesTaskLog {
    /// A fresh log entry for a forwarding attempt starting now.
    pub fn started_now() -> Self {
        Self {
            start_time: Some(now_rfc3339()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub state: TesState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<TesInput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<TesOutput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<TesResources>,
    #[serde(default)]
    pub executors: Vec<TesExecutor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<TesTaskLog>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
}

impl TesTask {
    /// Input URLs in declaration order, skipping inline-content inputs.
    pub fn input_urls(&self) -> Vec<String> {
        self.inputs
            .iter()
            .flatten()
            .filter_map(|input| input.url.clone())
            .collect()
    }

    /// Converts a backend's task representation into ours.
    ///
    /// Backends are not trusted to report a state we know, nor to format
    /// timestamps the same way; unknown states become `UNKNOWN` and
    /// parseable timestamps are normalised to RFC 3339 UTC.
    pub fn from_backend(value: &Value) -> Result<Self, serde_json::Error> {
        let mut value = value.clone();
        if let Some(object) = value.as_object_mut() {
            let state = object
                .get("state")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<TesState>().ok())
                .unwrap_or_default();
            object.insert("state".to_string(), Value::String(state.to_string()));
        }

        let mut task: TesTask = serde_json::from_value(value)?;
        task.creation_time = task.creation_time.as_deref().map(normalize_timestamp);
        for log in task.logs.iter_mut().flatten() {
            log.start_time = log.start_time.as_deref().map(normalize_timestamp);
            log.end_time = log.end_time.as_deref().map(normalize_timestamp);
            for executor_log in log.logs.iter_mut() {
                executor_log.start_time =
                    executor_log.start_time.as_deref().map(normalize_timestamp);
                executor_log.end_time = executor_log.end_time.as_deref().map(normalize_timestamp);
            }
        }
        Ok(task)
    }
}

/// Basic-auth credentials received from the client and passed on to backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BasicAuth {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl BasicAuth {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }
}

/// The backend that accepted a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesEndpoint {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
}

impl TesEndpoint {
    pub fn url(&self) -> String {
        format!("{}{}", self.host.trim_end_matches('/'), self.base_path)
    }
}

/// Persisted record for one client-submitted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbDocument {
    pub task: TesTask,
    /// The submission exactly as received
    #[serde(default)]
    pub task_original: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub worker_id: String,
    #[serde(default)]
    pub basic_auth: BasicAuth,
    #[serde(default)]
    pub tes_endpoint: TesEndpoint,
}

/// Remote task id recorded for a forwarded task, from either metadata form.
pub fn remote_task_id(log: &TesTaskLog) -> Option<String> {
    log.metadata
        .get("forwarded_to")
        .and_then(|forwarded| forwarded.get("id"))
        .or_else(|| log.metadata.get("remote_task_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceType {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Organization {
    pub name: String,
    pub url: String,
}

/// GA4GH service-info document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub organization: Organization,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage: Vec<String>,
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn normalize_timestamp(value: &str) -> String {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| {
            ts.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::AutoSi, true)
        })
        .unwrap_or_else(|_| value.to_string())
}
