//! Task store on Redis, shared by every proxy instance pointing at the same
//! server.
//!
//! Keys, all under the configured prefix:
//!
//! - `doc:{worker_id}` holds the document as JSON
//! - `task_id:{task_id}` names the worker id that owns a task id
//! - `cursor` hands out list cursors
//! - `index` is a sorted set of worker ids scored by cursor
//! - `user:{user_id}` is the same set restricted to one owner
//!
//! Uniqueness of task and worker ids comes from `SET NX` claims. Field
//! updates run as optimistic transactions: the document key is watched,
//! patched in process and written back with `MULTI`/`EXEC`, retrying when
//! another writer got there first.

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands, RedisError};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::StorageResult;
use super::projection::Projection;
use super::task::{StoredDocument, TaskStore, owned_by, project, set_path};
use crate::errors::StorageError;
use crate::models::DbDocument;

/// Optimistic update rounds before a write is given up.
const MAX_UPDATE_ATTEMPTS: usize = 32;

/// Create a Redis connection pool from a Redis URL.
pub fn create_redis_pool(redis_url: &str) -> StorageResult<Pool> {
    Config::from_url(redis_url)
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StorageError::ConnectionFailed {
            details: format!("Failed to create Redis pool: {}", e),
        })
}

fn redis_failed(operation: &'static str) -> impl FnOnce(RedisError) -> StorageError {
    move |source| StorageError::RedisOperationFailed {
        operation: operation.to_string(),
        source,
    }
}

pub struct RedisTaskStore {
    pool: Pool,
    prefix: String,
}

impl RedisTaskStore {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn document_key(&self, worker_id: &str) -> String {
        format!("{}doc:{}", self.prefix, worker_id)
    }

    fn task_id_key(&self, task_id: &str) -> String {
        format!("{}task_id:{}", self.prefix, task_id)
    }

    fn cursor_key(&self) -> String {
        format!("{}cursor", self.prefix)
    }

    fn index_key(&self, user_id: Option<&str>) -> String {
        match user_id {
            Some(user_id) => format!("{}user:{}", self.prefix, user_id),
            None => format!("{}index", self.prefix),
        }
    }

    async fn connection(&self) -> StorageResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::ConnectionFailed {
                details: e.to_string(),
            })
    }

    async fn load(&self, conn: &mut Connection, worker_id: &str) -> StorageResult<Option<Value>> {
        let raw: Option<String> = conn
            .get(self.document_key(worker_id))
            .await
            .map_err(redis_failed("get document"))?;
        raw.map(|raw| parse(&raw)).transpose()
    }

    /// Remove every key under this store's prefix. Meant for tests and
    /// resets; walks the keyspace with `SCAN`.
    pub async fn clear(&self) -> StorageResult<usize> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.prefix);
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(redis_failed("scan"))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if !keys.is_empty() {
            conn.del::<_, ()>(keys.as_slice())
                .await
                .map_err(redis_failed("del"))?;
        }
        Ok(keys.len())
    }
}

fn parse(raw: &str) -> StorageResult<Value> {
    serde_json::from_str(raw).map_err(|e| StorageError::SchemaMismatch {
        details: e.to_string(),
    })
}

async fn unwatch(conn: &mut Connection) {
    if let Err(e) = redis::cmd("UNWATCH").query_async::<()>(conn).await {
        warn!(error = %e, "Failed to release watched keys");
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn insert_document(&self, document: &DbDocument) -> StorageResult<()> {
        let task_id = document
            .task
            .id
            .clone()
            .ok_or_else(|| StorageError::InvalidInput {
                details: "task id is required".to_string(),
            })?;
        let serialized = serde_json::to_string(document).map_err(|e| StorageError::InvalidInput {
            details: e.to_string(),
        })?;

        let mut conn = self.connection().await?;
        let task_id_key = self.task_id_key(&task_id);

        let claimed: bool = conn
            .set_nx(&task_id_key, &document.worker_id)
            .await
            .map_err(redis_failed("claim task id"))?;
        if !claimed {
            return Err(StorageError::DuplicateKey { key: task_id });
        }

        let stored: bool = conn
            .set_nx(self.document_key(&document.worker_id), &serialized)
            .await
            .map_err(redis_failed("store document"))?;
        if !stored {
            conn.del::<_, ()>(&task_id_key)
                .await
                .map_err(redis_failed("release task id"))?;
            return Err(StorageError::DuplicateKey {
                key: document.worker_id.clone(),
            });
        }

        let cursor: u64 = conn
            .incr(self.cursor_key(), 1)
            .await
            .map_err(redis_failed("incr cursor"))?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .zadd(self.index_key(None), &document.worker_id, cursor)
            .ignore();
        if let Some(user_id) = document.user_id.as_deref() {
            pipe.zadd(self.index_key(Some(user_id)), &document.worker_id, cursor)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(redis_failed("index document"))?;

        trace!(worker_id = %document.worker_id, cursor, "Stored task document");
        Ok(())
    }

    async fn get_by_worker_id(
        &self,
        worker_id: &str,
        projection: Option<&Projection>,
    ) -> StorageResult<Option<Value>> {
        let mut conn = self.connection().await?;
        Ok(self
            .load(&mut conn, worker_id)
            .await?
            .map(|document| project(&document, projection)))
    }

    async fn find_by_task_id(
        &self,
        task_id: &str,
        user_id: Option<&str>,
        projection: Option<&Projection>,
    ) -> StorageResult<Option<Value>> {
        let mut conn = self.connection().await?;
        let worker_id: Option<String> = conn
            .get(self.task_id_key(task_id))
            .await
            .map_err(redis_failed("get task id"))?;
        let Some(worker_id) = worker_id else {
            return Ok(None);
        };
        Ok(self
            .load(&mut conn, &worker_id)
            .await?
            .filter(|document| owned_by(document, user_id))
            .map(|document| project(&document, projection)))
    }

    async fn list(
        &self,
        page_size: usize,
        page_token: Option<u64>,
        user_id: Option<&str>,
        projection: Option<&Projection>,
    ) -> StorageResult<Vec<StoredDocument>> {
        if page_size == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let max = match page_token {
            Some(token) => format!("({}", token),
            None => "+inf".to_string(),
        };
        let count = isize::try_from(page_size).unwrap_or(isize::MAX);
        let entries: Vec<(String, f64)> = conn
            .zrevrangebyscore_limit_withscores(self.index_key(user_id), max, "-inf", 0, count)
            .await
            .map_err(redis_failed("list index"))?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = entries
            .iter()
            .map(|(worker_id, _)| self.document_key(worker_id))
            .collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(redis_failed("mget documents"))?;

        let mut documents = Vec::with_capacity(entries.len());
        for ((_, score), raw) in entries.into_iter().zip(raw) {
            let Some(raw) = raw else {
                continue;
            };
            let document = parse(&raw)?;
            if !owned_by(&document, user_id) {
                continue;
            }
            documents.push(StoredDocument {
                cursor: score as u64,
                document: project(&document, projection),
            });
        }
        Ok(documents)
    }

    async fn set_fields(
        &self,
        worker_id: &str,
        fields: Vec<(String, Value)>,
    ) -> StorageResult<Value> {
        let mut conn = self.connection().await?;
        let key = self.document_key(worker_id);

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            redis::cmd("WATCH")
                .arg(&key)
                .query_async::<()>(&mut conn)
                .await
                .map_err(redis_failed("watch document"))?;

            let prepared = match self.load(&mut conn, worker_id).await {
                Ok(Some(mut document)) => fields
                    .iter()
                    .try_for_each(|(path, value)| set_path(&mut document, path, value.clone()))
                    .and_then(|()| {
                        serde_json::to_string(&document)
                            .map(|serialized| (document, serialized))
                            .map_err(|e| StorageError::InvalidInput {
                                details: e.to_string(),
                            })
                    }),
                Ok(None) => Err(StorageError::DocumentNotFound {
                    worker_id: worker_id.to_string(),
                }),
                Err(e) => Err(e),
            };
            let (document, serialized) = match prepared {
                Ok(prepared) => prepared,
                Err(e) => {
                    unwatch(&mut conn).await;
                    return Err(e);
                }
            };

            let committed: Option<(bool,)> = redis::pipe()
                .atomic()
                .set(&key, &serialized)
                .ignore()
                .exists(&key)
                .query_async(&mut conn)
                .await
                .map_err(redis_failed("update document"))?;
            if committed.is_some() {
                return Ok(document);
            }
            debug!(worker_id, attempt, "Document changed during update, retrying");
        }

        Err(StorageError::UpdateConflict {
            worker_id: worker_id.to_string(),
        })
    }
}
