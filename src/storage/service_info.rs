use async_trait::async_trait;
use parking_lot::RwLock;

use super::StorageResult;
use crate::models::ServiceInfo;

/// Holds the single service-info document.
#[async_trait]
pub trait ServiceInfoStore: Send + Sync {
    async fn get(&self) -> StorageResult<Option<ServiceInfo>>;

    /// Replace the stored document.
    async fn put(&self, service_info: &ServiceInfo) -> StorageResult<()>;
}

#[derive(Default)]
pub struct InMemoryServiceInfoStore {
    document: RwLock<Option<ServiceInfo>>,
}

impl InMemoryServiceInfoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceInfoStore for InMemoryServiceInfoStore {
    async fn get(&self) -> StorageResult<Option<ServiceInfo>> {
        Ok(self.document.read().clone())
    }

    async fn put(&self, service_info: &ServiceInfo) -> StorageResult<()> {
        *self.document.write() = Some(service_info.clone());
        Ok(())
    }
}
