//! Middleware registry and the slot-based pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::resolver::{GeoLocator, HostResolver};
use super::{DistanceRanker, Middleware, RandomRanker, TaskRequest};
use crate::config::MiddlewareConfig;
use crate::errors::MiddlewareError;

/// Name-to-implementation table consulted once, at start-up.
#[derive(Default, Clone)]
pub struct MiddlewareRegistry {
    middlewares: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in rankers over `service_list`.
    pub fn with_builtin(
        service_list: Vec<String>,
        resolver: Arc<dyn HostResolver>,
        locator: Arc<dyn GeoLocator>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DistanceRanker::new(
            service_list.clone(),
            resolver,
            locator,
        )));
        registry.register(Arc::new(RandomRanker::new(service_list)));
        registry
    }

    /// Register (or replace) a middleware under its own name.
    pub fn register(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares
            .insert(middleware.name().to_lowercase(), middleware);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Middleware>, MiddlewareError> {
        self.middlewares
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| MiddlewareError::InvalidMiddleware {
                name: name.to_string(),
                details: "no middleware registered under this name".to_string(),
            })
    }
}

/// Ordered slots of middlewares; each slot holds fallback alternatives.
///
/// Slots run in order and each sees the request as left by the previous
/// one. Within a slot the first alternative that succeeds wins; if every
/// alternative fails the whole pipeline fails.
#[derive(Default, Clone)]
pub struct MiddlewarePipeline {
    slots: Vec<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewarePipeline {
    pub fn new(slots: Vec<Vec<Arc<dyn Middleware>>>) -> Self {
        Self { slots }
    }

    /// Resolve every configured name eagerly so a typo stops start-up.
    pub fn from_config(
        config: &MiddlewareConfig,
        registry: &MiddlewareRegistry,
    ) -> Result<Self, MiddlewareError> {
        let slots = config
            .slots
            .iter()
            .map(|slot| {
                slot.iter()
                    .map(|name| registry.get(name))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(slots))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot layout by middleware name, for start-up logging.
    pub fn describe(&self) -> Vec<Vec<String>> {
        self.slots
            .iter()
            .map(|slot| slot.iter().map(|m| m.name().to_string()).collect())
            .collect()
    }

    pub async fn apply(&self, request: TaskRequest) -> Result<TaskRequest, MiddlewareError> {
        let mut request = request;
        for (index, slot) in self.slots.iter().enumerate() {
            request = Self::apply_slot(index, slot, request).await?;
        }
        Ok(request)
    }

    async fn apply_slot(
        index: usize,
        slot: &[Arc<dyn Middleware>],
        request: TaskRequest,
    ) -> Result<TaskRequest, MiddlewareError> {
        let mut failures = Vec::with_capacity(slot.len());
        for middleware in slot {
            match middleware.apply(request.clone()).await {
                Ok(updated) => {
                    debug!(
                        slot = index,
                        middleware = middleware.name(),
                        candidates = updated.tes_uris.len(),
                        "Middleware applied"
                    );
                    return Ok(updated);
                }
                Err(e) => {
                    warn!(
                        slot = index,
                        middleware = middleware.name(),
                        error = %e,
                        "Middleware failed, trying next alternative"
                    );
                    failures.push(format!("{}: {}", middleware.name(), e));
                }
            }
        }
        Err(MiddlewareError::MiddlewareException {
            details: format!(
                "all middlewares of slot {} failed: {}",
                index,
                failures.join("; ")
            ),
        })
    }
}
