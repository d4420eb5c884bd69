//! Kill-switch state persistence.

use crate::store::{KeyValueStore, StoreError};
use sentinel_domain::entities::KillSwitchState;
use std::sync::Arc;

/// Stores the single kill-switch state document under one key.
#[derive(Clone)]
pub struct KillSwitchRepository {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl KillSwitchRepository {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// # Errors
    /// Returns an error if encoding or the store write fails.
    pub async fn save(&self, state: &KillSwitchState) -> Result<(), StoreError> {
        let value = serde_json::to_string(state)?;
        self.store.set(&self.key, &value).await
    }

    /// # Errors
    /// Returns an error if the read or decoding fails.
    pub async fn load(&self) -> Result<Option<KillSwitchState>, StoreError> {
        match self.store.get(&self.key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use sentinel_domain::enums::{KillSwitchStatus, KillSwitchTrigger};

    #[tokio::test]
    async fn test_round_trip() {
        let repo = KillSwitchRepository::new(Arc::new(MemoryStore::new()), "ks");
        assert!(repo.load().await.unwrap().is_none());

        let state = KillSwitchState {
            status: KillSwitchStatus::Triggered,
            trigger: Some(KillSwitchTrigger::DailyLossCap),
            triggered_at: Some(Utc::now()),
            triggered_by: Some("monitor".to_string()),
            reason: Some("daily loss 6%".to_string()),
            ..Default::default()
        };
        repo.save(&state).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), Some(state));
    }
}
