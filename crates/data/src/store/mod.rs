//! Key-value store abstraction.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Could not reach the backend.
    #[error("store connection failed: {0}")]
    Connection(String),
    /// Backend returned an error.
    #[error("store command failed: {0}")]
    Backend(String),
    /// Value could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Stored value has an unexpected shape.
    #[error("invalid value for key {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Minimal key-value capability used by the repositories.
///
/// Semantics follow Redis: `scan` is cursor based and returns cursor `0`
/// once the iteration is complete; `incr` on a missing key starts from zero.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Sets a value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Returns the next cursor and one page of keys matching `pattern`.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), StoreError>;

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}
