//! Typed repositories over the key-value store.
//!
//! Every repository namespaces its keys with a configurable prefix; the
//! layout is internal and carries no compatibility guarantees.

mod kill_switch_repository;
mod metrics_repository;
mod position_repository;

pub use kill_switch_repository::KillSwitchRepository;
pub use metrics_repository::MetricsRepository;
pub use position_repository::PositionRepository;

use crate::store::{KeyValueStore, MemoryStore, RedisStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// Store handle that hands out repositories.
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn KeyValueStore>,
}

impl Storage {
    /// Creates a Storage wrapper around an existing store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Storage kept in process memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Connects to Redis.
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    pub async fn connect_redis(url: &str) -> Result<Self, StoreError> {
        let store = RedisStore::connect(url).await?;
        Ok(Self::new(Arc::new(store)))
    }

    #[must_use]
    pub fn positions(&self, prefix: impl Into<String>, ttl: Duration) -> PositionRepository {
        PositionRepository::new(self.store.clone(), prefix, ttl)
    }

    #[must_use]
    pub fn kill_switch(&self, key: impl Into<String>) -> KillSwitchRepository {
        KillSwitchRepository::new(self.store.clone(), key)
    }

    #[must_use]
    pub fn metrics(&self, prefix: impl Into<String>) -> MetricsRepository {
        MetricsRepository::new(self.store.clone(), prefix)
    }
}
