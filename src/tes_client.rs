//! HTTP client for backend TES instances.
//!
//! One [`TesClient`] addresses one backend API root and carries the client's
//! basic-auth credentials, if any. Every call is bounded by the configured
//! timeout. URLs only reach the logs after credentials are stripped.

use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::errors::TesClientError;
use crate::middleware::uri::strip_auth;
use crate::models::{BasicAuth, TesEndpoint};

/// Path of the TES API below a backend's host when no base path is recorded.
pub const DEFAULT_BASE_PATH: &str = "/ga4gh/tes/v1";

#[derive(Clone)]
pub struct TesClient {
    http_client: reqwest::Client,
    api_url: String,
    basic_auth: BasicAuth,
    timeout: Duration,
}

impl TesClient {
    pub fn new(
        http_client: reqwest::Client,
        endpoint: &TesEndpoint,
        basic_auth: BasicAuth,
        timeout: Duration,
    ) -> Result<Self, TesClientError> {
        let host = endpoint.host.trim_end_matches('/');
        url::Url::parse(host).map_err(|e| TesClientError::InvalidUrl {
            url: strip_auth(host),
            details: e.to_string(),
        })?;

        let base_path = match endpoint.base_path.trim_matches('/') {
            "" => DEFAULT_BASE_PATH.to_string(),
            path => format!("/{path}"),
        };

        Ok(Self {
            http_client,
            api_url: format!("{host}{base_path}"),
            basic_auth,
            timeout,
        })
    }

    /// API root, e.g. `https://tes.example.org/ga4gh/tes/v1`.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    #[instrument(skip(self), fields(tes_uri = %strip_auth(&self.api_url)))]
    pub async fn get_service_info(&self) -> Result<Value, TesClientError> {
        let url = format!("{}/service-info", self.api_url);
        self.send_json(self.request(Method::GET, &url), &url).await
    }

    /// Submit a task and return the id the backend assigned.
    #[instrument(skip_all, fields(tes_uri = %strip_auth(&self.api_url)))]
    pub async fn create_task(&self, task: &Value) -> Result<String, TesClientError> {
        let url = format!("{}/tasks", self.api_url);
        let response = self
            .send_json(self.request(Method::POST, &url).json(task), &url)
            .await?;

        response
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| TesClientError::InvalidResponse {
                url: strip_auth(&url),
                details: "task creation response has no id".to_string(),
            })
    }

    /// Full view of a remote task.
    #[instrument(skip(self), fields(tes_uri = %strip_auth(&self.api_url)))]
    pub async fn get_task(&self, remote_task_id: &str) -> Result<Value, TesClientError> {
        let url = format!("{}/tasks/{}", self.api_url, remote_task_id);
        let response = self
            .send_json(
                self.request(Method::GET, &url).query(&[("view", "FULL")]),
                &url,
            )
            .await?;
        if !response.is_object() {
            return Err(TesClientError::InvalidResponse {
                url: strip_auth(&url),
                details: "task is not a JSON object".to_string(),
            });
        }
        Ok(response)
    }

    #[instrument(skip(self), fields(tes_uri = %strip_auth(&self.api_url)))]
    pub async fn cancel_task(&self, remote_task_id: &str) -> Result<(), TesClientError> {
        let url = format!("{}/tasks/{}:cancel", self.api_url, remote_task_id);
        self.send(self.request(Method::POST, &url), &url).await?;
        Ok(())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http_client.request(method, url);
        match &self.basic_auth.username {
            Some(username) => builder.basic_auth(username, self.basic_auth.password.as_ref()),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, TesClientError> {
        let response = match timeout(self.timeout, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(TesClientError::RequestFailed {
                    url: strip_auth(url),
                    source,
                });
            }
            Err(_) => {
                return Err(TesClientError::Timeout {
                    url: strip_auth(url),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        let status = response.status();
        debug!(status = status.as_u16(), url = %strip_auth(url), "TES instance responded");
        if !status.is_success() {
            return Err(TesClientError::UnexpectedStatus {
                url: strip_auth(url),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn send_json(&self, builder: RequestBuilder, url: &str) -> Result<Value, TesClientError> {
        let response = self.send(builder, url).await?;
        match timeout(self.timeout, response.json::<Value>()).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(TesClientError::InvalidResponse {
                url: strip_auth(url),
                details: e.to_string(),
            }),
            Err(_) => Err(TesClientError::Timeout {
                url: strip_auth(url),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}
