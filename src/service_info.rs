//! Service-info document kept in sync with the configured metadata.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::models::ServiceInfo;
use crate::storage::{ServiceInfoStore, StorageResult};

/// Serves the service-info document and rewrites the stored copy whenever
/// it no longer matches what this instance is configured to advertise.
#[derive(Clone)]
pub struct ServiceInfoManager {
    store: Arc<dyn ServiceInfoStore>,
    configured: ServiceInfo,
}

impl ServiceInfoManager {
    pub fn new(store: Arc<dyn ServiceInfoStore>, configured: ServiceInfo) -> Self {
        Self { store, configured }
    }

    /// Bring the stored document in line with the configuration.
    ///
    /// Returns the document now stored.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> StorageResult<ServiceInfo> {
        match self.store.get().await? {
            Some(stored) if stored == self.configured => {
                debug!("Stored service info is current");
                Ok(stored)
            }
            Some(_) => {
                self.store.put(&self.configured).await?;
                info!(id = %self.configured.id, "Service info updated");
                Ok(self.configured.clone())
            }
            None => {
                self.store.put(&self.configured).await?;
                info!(id = %self.configured.id, "Service info created");
                Ok(self.configured.clone())
            }
        }
    }

    /// Document to hand to clients.
    pub async fn get(&self) -> StorageResult<ServiceInfo> {
        self.sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryServiceInfoStore;

    fn info(version: &str) -> ServiceInfo {
        ServiceInfo {
            id: "org.example.protes".to_string(),
            name: "proTES".to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_created_when_missing() {
        let store = Arc::new(InMemoryServiceInfoStore::new());
        let manager = ServiceInfoManager::new(store.clone(), info("1.0.0"));

        assert_eq!(manager.get().await.unwrap(), info("1.0.0"));
        assert_eq!(store.get().await.unwrap(), Some(info("1.0.0")));
    }

    #[tokio::test]
    async fn test_stale_document_is_rewritten() {
        let store = Arc::new(InMemoryServiceInfoStore::new());
        store.put(&info("0.9.0")).await.unwrap();

        let manager = ServiceInfoManager::new(store.clone(), info("1.0.0"));
        assert_eq!(manager.sync().await.unwrap().version, "1.0.0");
        assert_eq!(store.get().await.unwrap().unwrap().version, "1.0.0");
    }
}
