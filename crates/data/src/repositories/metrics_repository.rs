//! Risk metrics published by the trading layer.

use crate::store::{KeyValueStore, StoreError};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

/// Named numeric metrics under `prefix:name`.
#[derive(Clone)]
pub struct MetricsRepository {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl MetricsRepository {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// Reads a metric; `None` when it has never been published.
    ///
    /// # Errors
    /// Returns an error if the read fails or the value is not numeric.
    pub async fn get_metric(&self, name: &str) -> Result<Option<Decimal>, StoreError> {
        let key = self.key(name);
        match self.store.get(&key).await? {
            Some(raw) => Decimal::from_str(raw.trim())
                .map(Some)
                .map_err(|_| StoreError::InvalidValue { key, value: raw }),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn set_metric(&self, name: &str, value: Decimal) -> Result<(), StoreError> {
        self.store.set(&self.key(name), &value.to_string()).await
    }

    /// Increments an integer counter metric (e.g. consecutive losses).
    ///
    /// # Errors
    /// Returns an error if the stored value is not an integer.
    pub async fn incr_metric(&self, name: &str, delta: i64) -> Result<i64, StoreError> {
        self.store.incr(&self.key(name), delta).await
    }

    /// # Errors
    /// Returns an error if the store delete fails.
    pub async fn clear_metric(&self, name: &str) -> Result<(), StoreError> {
        self.store.del(&self.key(name)).await
    }
}
