use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use super::StorageResult;
use super::projection::Projection;
use super::task::{StoredDocument, TaskStore, owned_by, project, set_path};
use crate::errors::StorageError;
use crate::models::DbDocument;

struct Entry {
    cursor: u64,
    document: Value,
}

#[derive(Default)]
struct Documents {
    next_cursor: u64,
    by_worker_id: HashMap<String, Entry>,
    worker_id_by_task_id: HashMap<String, String>,
}

/// Process-local task store.
///
/// Every operation takes the lock once and never across an await, so each
/// call is atomic with respect to the others.
#[derive(Default)]
pub struct InMemoryTaskStore {
    documents: RwLock<Documents>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().by_worker_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_document(&self, document: &DbDocument) -> StorageResult<()> {
        let task_id = document
            .task
            .id
            .clone()
            .ok_or_else(|| StorageError::InvalidInput {
                details: "task id is required".to_string(),
            })?;
        let value = serde_json::to_value(document).map_err(|e| StorageError::InvalidInput {
            details: e.to_string(),
        })?;

        let mut documents = self.documents.write();
        if documents.worker_id_by_task_id.contains_key(&task_id) {
            return Err(StorageError::DuplicateKey { key: task_id });
        }
        if documents.by_worker_id.contains_key(&document.worker_id) {
            return Err(StorageError::DuplicateKey {
                key: document.worker_id.clone(),
            });
        }

        documents.next_cursor += 1;
        let cursor = documents.next_cursor;
        documents
            .worker_id_by_task_id
            .insert(task_id, document.worker_id.clone());
        documents.by_worker_id.insert(
            document.worker_id.clone(),
            Entry {
                cursor,
                document: value,
            },
        );
        Ok(())
    }

    async fn get_by_worker_id(
        &self,
        worker_id: &str,
        projection: Option<&Projection>,
    ) -> StorageResult<Option<Value>> {
        let documents = self.documents.read();
        Ok(documents
            .by_worker_id
            .get(worker_id)
            .map(|entry| project(&entry.document, projection)))
    }

    async fn find_by_task_id(
        &self,
        task_id: &str,
        user_id: Option<&str>,
        projection: Option<&Projection>,
    ) -> StorageResult<Option<Value>> {
        let documents = self.documents.read();
        Ok(documents
            .worker_id_by_task_id
            .get(task_id)
            .and_then(|worker_id| documents.by_worker_id.get(worker_id))
            .filter(|entry| owned_by(&entry.document, user_id))
            .map(|entry| project(&entry.document, projection)))
    }

    async fn list(
        &self,
        page_size: usize,
        page_token: Option<u64>,
        user_id: Option<&str>,
        projection: Option<&Projection>,
    ) -> StorageResult<Vec<StoredDocument>> {
        let documents = self.documents.read();
        let mut entries: Vec<&Entry> = documents
            .by_worker_id
            .values()
            .filter(|entry| page_token.is_none_or(|token| entry.cursor < token))
            .filter(|entry| owned_by(&entry.document, user_id))
            .collect();
        entries.sort_by(|a, b| b.cursor.cmp(&a.cursor));

        Ok(entries
            .into_iter()
            .take(page_size)
            .map(|entry| StoredDocument {
                cursor: entry.cursor,
                document: project(&entry.document, projection),
            })
            .collect())
    }

    async fn set_fields(
        &self,
        worker_id: &str,
        fields: Vec<(String, Value)>,
    ) -> StorageResult<Value> {
        let mut documents = self.documents.write();
        let entry =
            documents
                .by_worker_id
                .get_mut(worker_id)
                .ok_or_else(|| StorageError::DocumentNotFound {
                    worker_id: worker_id.to_string(),
                })?;

        // Apply to a copy so a bad path leaves the stored document untouched.
        let mut updated = entry.document.clone();
        for (path, value) in fields {
            set_path(&mut updated, &path, value)?;
        }
        entry.document = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TesTask;
    use serde_json::json;
    use std::sync::Arc;

    fn document(task_id: &str, worker_id: &str, user_id: Option<&str>) -> DbDocument {
        DbDocument {
            task: TesTask {
                id: Some(task_id.to_string()),
                ..Default::default()
            },
            task_original: json!({}),
            user_id: user_id.map(str::to_string),
            worker_id: worker_id.to_string(),
            basic_auth: Default::default(),
            tes_endpoint: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_rejected() {
        let store = InMemoryTaskStore::new();
        store
            .insert_document(&document("AAA111", "w1", None))
            .await
            .unwrap();

        let err = store
            .insert_document(&document("AAA111", "w2", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { ref key } if key == "AAA111"));

        let err = store
            .insert_document(&document("BBB222", "w1", None))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { ref key } if key == "w1"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_list_pages_newest_first() {
        let store = InMemoryTaskStore::new();
        for (task_id, worker_id) in [("T1", "w1"), ("T2", "w2"), ("T3", "w3")] {
            store
                .insert_document(&document(task_id, worker_id, None))
                .await
                .unwrap();
        }

        let first = store.list(2, None, None, None).await.unwrap();
        let ids: Vec<_> = first
            .iter()
            .map(|d| d.document["task"]["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["T3", "T2"]);

        let second = store
            .list(2, Some(first[1].cursor), None, None)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].document["task"]["id"], "T1");
    }

    #[tokio::test]
    async fn test_user_filter() {
        let store = InMemoryTaskStore::new();
        store
            .insert_document(&document("T1", "w1", Some("alice")))
            .await
            .unwrap();
        store
            .insert_document(&document("T2", "w2", Some("bob")))
            .await
            .unwrap();

        assert!(
            store
                .find_by_task_id("T1", Some("bob"), None)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .find_by_task_id("T1", Some("alice"), None)
                .await
                .unwrap()
                .is_some()
        );
        assert!(store.find_by_task_id("T1", None, None).await.unwrap().is_some());
        assert_eq!(store.list(10, None, Some("bob"), None).await.unwrap().len(), 1);
        assert_eq!(store.list(10, None, None, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_set_fields_creates_missing_objects() {
        let store = InMemoryTaskStore::new();
        store
            .insert_document(&document("T1", "w1", None))
            .await
            .unwrap();

        let updated = store
            .set_fields(
                "w1",
                vec![("task.resources.cpu_cores".to_string(), json!(2))],
            )
            .await
            .unwrap();
        assert_eq!(updated["task"]["resources"]["cpu_cores"], 2);
        assert_eq!(updated["task"]["id"], "T1");
    }

    #[tokio::test]
    async fn test_set_fields_is_all_or_nothing() {
        let store = InMemoryTaskStore::new();
        store
            .insert_document(&document("T1", "w1", None))
            .await
            .unwrap();

        let err = store
            .set_fields(
                "w1",
                vec![
                    ("task.state".to_string(), json!("RUNNING")),
                    ("task.id.nested".to_string(), json!(1)),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput { .. }));

        let stored = store.get_by_worker_id("w1", None).await.unwrap().unwrap();
        assert_eq!(stored["task"]["state"], "UNKNOWN");
    }

    #[tokio::test]
    async fn test_concurrent_updates_to_different_roots() {
        let store = Arc::new(InMemoryTaskStore::new());
        store
            .insert_document(&document("T1", "w1", None))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let path = if i % 2 == 0 {
                    format!("task.tags.k{i}")
                } else {
                    format!("tes_endpoint.extra_{i}")
                };
                store.set_fields("w1", vec![(path, json!(i))]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.get_by_worker_id("w1", None).await.unwrap().unwrap();
        assert_eq!(stored["task"]["tags"].as_object().unwrap().len(), 10);
        assert_eq!(stored["tes_endpoint"].as_object().unwrap().len(), 12);
    }
}
