//! Task document persistence.
//!
//! Documents are addressed by worker id for every mutation. The client-facing
//! task id is only used for lookups coming from the API.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use super::StorageResult;
use super::projection::Projection;
use crate::errors::StorageError;
use crate::models::DbDocument;
use crate::states::TesState;

/// A stored document together with its position in insertion order.
///
/// `cursor` is what `GET /tasks` hands out as page token.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub cursor: u64,
    pub document: Value,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new document. Fails with [`StorageError::DuplicateKey`] when
    /// the task id or the worker id is already taken.
    async fn insert_document(&self, document: &DbDocument) -> StorageResult<()>;

    async fn get_by_worker_id(
        &self,
        worker_id: &str,
        projection: Option<&Projection>,
    ) -> StorageResult<Option<Value>>;

    /// Look up by client-facing id. When `user_id` is given only that user's
    /// documents match.
    async fn find_by_task_id(
        &self,
        task_id: &str,
        user_id: Option<&str>,
        projection: Option<&Projection>,
    ) -> StorageResult<Option<Value>>;

    /// Newest first, strictly older than `page_token` when one is given.
    async fn list(
        &self,
        page_size: usize,
        page_token: Option<u64>,
        user_id: Option<&str>,
        projection: Option<&Projection>,
    ) -> StorageResult<Vec<StoredDocument>>;

    /// Set dotted-path fields in one atomic step and return the updated
    /// document. Missing intermediate objects are created.
    async fn set_fields(&self, worker_id: &str, fields: Vec<(String, Value)>)
    -> StorageResult<Value>;
}

/// Handle on a single task document, keyed by worker id.
#[derive(Clone)]
pub struct DocumentConnector {
    store: Arc<dyn TaskStore>,
    worker_id: String,
}

impl DocumentConnector {
    pub fn new(store: Arc<dyn TaskStore>, worker_id: impl Into<String>) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Current document, parsed.
    ///
    /// A projection that drops required fields yields `SchemaMismatch`, the
    /// same as a stored document of the wrong shape.
    pub async fn get_document(&self, projection: Option<&Projection>) -> StorageResult<DbDocument> {
        let value = self
            .store
            .get_by_worker_id(&self.worker_id, projection)
            .await?
            .ok_or_else(|| StorageError::DocumentNotFound {
                worker_id: self.worker_id.clone(),
            })?;
        parse_document(value)
    }

    /// Write `task.state` after checking that `state` names a known state.
    pub async fn update_task_state(&self, state: &str) -> StorageResult<TesState> {
        let state: TesState = state.parse()?;
        self.store
            .set_fields(
                &self.worker_id,
                vec![("task.state".to_string(), Value::String(state.to_string()))],
            )
            .await?;
        debug!(worker_id = %self.worker_id, %state, "Task state updated");
        Ok(state)
    }

    /// Merge `fields` into the object at `root` and return the result.
    pub async fn upsert_fields_in_root_object(
        &self,
        root: &str,
        fields: Map<String, Value>,
    ) -> StorageResult<DbDocument> {
        if root.is_empty() {
            return Err(StorageError::InvalidInput {
                details: "root object name must not be empty".to_string(),
            });
        }
        let updates = fields
            .into_iter()
            .map(|(key, value)| (format!("{root}.{key}"), value))
            .collect();
        let updated = self.store.set_fields(&self.worker_id, updates).await?;
        parse_document(updated)
    }
}

pub(super) fn project(document: &Value, projection: Option<&Projection>) -> Value {
    match projection {
        Some(projection) => projection.apply(document),
        None => document.clone(),
    }
}

pub(super) fn owned_by(document: &Value, user_id: Option<&str>) -> bool {
    match user_id {
        Some(user_id) => document.get("user_id").and_then(Value::as_str) == Some(user_id),
        None => true,
    }
}

/// Set the value at a dotted `path`, creating missing intermediate objects.
pub(super) fn set_path(document: &mut Value, path: &str, value: Value) -> StorageResult<()> {
    let mut segments = path.split('.').peekable();
    let mut current = document;
    while let Some(segment) = segments.next() {
        let Value::Object(object) = current else {
            return Err(StorageError::InvalidInput {
                details: format!("cannot set {path}: {segment} is not inside an object"),
            });
        };
        if segments.peek().is_none() {
            object.insert(segment.to_string(), value);
            return Ok(());
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
    }
    Err(StorageError::InvalidInput {
        details: "empty field path".to_string(),
    })
}

fn parse_document(value: Value) -> StorageResult<DbDocument> {
    serde_json::from_value(value).map_err(|e| StorageError::SchemaMismatch {
        details: e.to_string(),
    })
}
