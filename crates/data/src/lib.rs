//! Durable state for the control plane.
//!
//! A small key-value abstraction (Redis in production, an in-process map in
//! tests and paper mode) plus typed repositories for positions, kill-switch
//! state and published risk metrics.

pub mod repositories;
pub mod store;

pub use repositories::{KillSwitchRepository, MetricsRepository, PositionRepository, Storage};
pub use store::{KeyValueStore, MemoryStore, RedisStore, StoreError};
