//! Position snapshots for crash recovery.

use crate::store::{KeyValueStore, StoreError};
use sentinel_domain::entities::TrackedPosition;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Persists tracked positions under `prefix:position_id` with a TTL.
#[derive(Clone)]
pub struct PositionRepository {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    ttl: Duration,
}

impl PositionRepository {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    fn key(&self, position_id: &str) -> String {
        format!("{}:{}", self.prefix, position_id)
    }

    /// Saves (and re-arms the TTL of) a position.
    ///
    /// # Errors
    /// Returns an error if encoding or the store write fails.
    pub async fn save(&self, position: &TrackedPosition) -> Result<(), StoreError> {
        let value = serde_json::to_string(position)?;
        self.store
            .set_ex(&self.key(&position.position.position_id), &value, self.ttl)
            .await
    }

    /// Finds one position by id.
    ///
    /// # Errors
    /// Returns an error if the read or decoding fails.
    pub async fn find(&self, position_id: &str) -> Result<Option<TrackedPosition>, StoreError> {
        match self.store.get(&self.key(position_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Deletes a position.
    ///
    /// # Errors
    /// Returns an error if the store delete fails.
    pub async fn delete(&self, position_id: &str) -> Result<(), StoreError> {
        self.store.del(&self.key(position_id)).await
    }

    /// Loads every stored position, paging through the keyspace.
    ///
    /// Entries that vanish between scan and read, or fail to decode, are
    /// skipped.
    ///
    /// # Errors
    /// Returns an error if a scan or read command fails.
    pub async fn load_all(&self, page_size: usize) -> Result<Vec<TrackedPosition>, StoreError> {
        let pattern = format!("{}:*", self.prefix);
        let mut cursor = 0;
        let mut positions = Vec::new();

        loop {
            let (next, keys) = self.store.scan(cursor, &pattern, page_size).await?;
            for key in keys {
                let Some(raw) = self.store.get(&key).await? else {
                    continue;
                };
                match serde_json::from_str::<TrackedPosition>(&raw) {
                    Ok(position) => positions.push(position),
                    Err(e) => warn!(key = %key, error = %e, "Skipping undecodable position"),
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(count = positions.len(), prefix = %self.prefix, "Loaded positions");
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sentinel_domain::entities::Fill;
    use sentinel_domain::enums::Side;

    fn tracked(id: &str) -> TrackedPosition {
        TrackedPosition::from_fill(&Fill {
            position_id: id.to_string(),
            order_id: format!("o-{id}"),
            exchange: "bybit".to_string(),
            symbol: "SOL/USDT".to_string(),
            side: Side::Short,
            size: dec!(12.5),
            price: dec!(143.2),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_save_find_delete() {
        let store = Arc::new(MemoryStore::new());
        let repo = PositionRepository::new(store.clone(), "test:positions", Duration::from_secs(60));

        repo.save(&tracked("p1")).await.unwrap();
        let found = repo.find("p1").await.unwrap().unwrap();
        assert_eq!(found.position.size, dec!(12.5));
        assert!(store.ttl("test:positions:p1").await.is_some());

        repo.delete("p1").await.unwrap();
        assert!(repo.find("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_all_skips_garbage() {
        let store = Arc::new(MemoryStore::new());
        let repo = PositionRepository::new(store.clone(), "test:positions", Duration::from_secs(60));
        for i in 0..7 {
            repo.save(&tracked(&format!("p{i}"))).await.unwrap();
        }
        store.set("test:positions:broken", "{not json").await.unwrap();
        store.set("unrelated:key", "x").await.unwrap();

        let loaded = repo.load_all(3).await.unwrap();
        assert_eq!(loaded.len(), 7);
    }
}
