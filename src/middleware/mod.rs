//! Request middlewares that choose where a task is forwarded.
//!
//! Every middleware implements the [`Middleware`] capability: it takes a
//! [`TaskRequest`] and returns it with `tes_uris` set to an ordered list of
//! candidate backends. Middlewares are built once at start-up by the
//! [`MiddlewareRegistry`] and run by the [`MiddlewarePipeline`], which gives
//! each slot ordered fallbacks.
//!
//! # Rankers
//!
//! - [`distance::DistanceRanker`] orders backends by aggregate geographic
//!   distance to the task's inputs
//! - [`random::RandomRanker`] shuffles the backends and cannot fail

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::MiddlewareError;

pub mod distance;
pub mod pipeline;
pub mod random;
pub mod resolver;
pub mod uri;

pub use distance::DistanceRanker;
pub use pipeline::{MiddlewarePipeline, MiddlewareRegistry};
pub use random::RandomRanker;

/// A task submission on its way through the pipeline.
///
/// `payload` is the client's JSON body as received. `tes_uris` is the
/// ephemeral candidate list; it is consumed by forwarding and never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub payload: Value,
    pub tes_uris: Vec<String>,
}

impl TaskRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            tes_uris: Vec::new(),
        }
    }

    /// `url` of every input that has one, in declaration order.
    pub fn input_uris(&self) -> Vec<String> {
        self.payload
            .get("inputs")
            .and_then(Value::as_array)
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(|input| input.get("url").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Backends to rank: what an earlier slot chose, or `service_list` when
    /// nothing has been chosen yet.
    pub fn candidates<'a>(&'a self, service_list: &'a [String]) -> &'a [String] {
        if self.tes_uris.is_empty() {
            service_list
        } else {
            &self.tes_uris
        }
    }

    pub(crate) fn ensure_json_object(&self) -> Result<(), MiddlewareError> {
        if self.payload.is_object() {
            Ok(())
        } else {
            Err(MiddlewareError::MiddlewareException {
                details: "request has no JSON object body".to_string(),
            })
        }
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Registry name, used in configuration and logs.
    fn name(&self) -> &str;

    /// Apply the middleware to a request.
    async fn apply(&self, request: TaskRequest) -> Result<TaskRequest, MiddlewareError>;
}
