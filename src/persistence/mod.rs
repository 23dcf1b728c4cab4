// Price history storage
//
// The collector appends observations; the trader only reads them back.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryPriceStore;
pub use redis_store::RedisPriceStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::PriceObservation;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("corrupt price record: {0}")]
    Decode(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Query(err.to_string())
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Decode(err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Connection(format!("migration failed: {}", err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// Time-ordered price observations, keyed by pair
#[async_trait]
pub trait PriceHistoryStore: Send + Sync {
    async fn append(&self, observation: &PriceObservation) -> Result<(), StoreError>;

    /// Observations for `pair` with `timestamp >= since`, oldest first
    async fn observations_since(
        &self,
        pair: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError>;

    /// Total observations ever stored for `pair`
    async fn count(&self, pair: &str) -> Result<usize, StoreError>;
}

#[async_trait]
impl<T: PriceHistoryStore + ?Sized> PriceHistoryStore for std::sync::Arc<T> {
    async fn append(&self, observation: &PriceObservation) -> Result<(), StoreError> {
        (**self).append(observation).await
    }

    async fn observations_since(
        &self,
        pair: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        (**self).observations_since(pair, since).await
    }

    async fn count(&self, pair: &str) -> Result<usize, StoreError> {
        (**self).count(pair).await
    }
}
