//! Persistence for task documents and the service-info document.
//!
//! The [`TaskStore`] trait is the document-store seam; [`DocumentConnector`]
//! wraps it for the per-task operations used by forwarding and tracking.
//! [`InMemoryTaskStore`] and [`InMemoryServiceInfoStore`] back a single
//! process; [`RedisTaskStore`] lets several instances share their tasks.

use crate::errors::StorageError;

pub mod memory;
pub mod projection;
pub mod redis;
pub mod service_info;
pub mod task;

pub use memory::InMemoryTaskStore;
pub use projection::Projection;
pub use redis::{RedisTaskStore, create_redis_pool};
pub use service_info::{InMemoryServiceInfoStore, ServiceInfoStore};
pub use task::{DocumentConnector, StoredDocument, TaskStore};

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
