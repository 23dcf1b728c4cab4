use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use super::{PriceHistoryStore, StoreError};
use crate::models::PriceObservation;

const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Redis-backed price history
///
/// One sorted set per pair, `prices:{pair}`, scored by the observation
/// timestamp in milliseconds so range reads are a single ZRANGEBYSCORE.
pub struct RedisPriceStore {
    conn: ConnectionManager,
}

impl RedisPriceStore {
    /// Connect to Redis, giving up after five seconds
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;

        let conn = timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| {
            StoreError::Connection(format!(
                "Redis connection timeout after {} seconds",
                CONNECT_TIMEOUT_SECS
            ))
        })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn key(pair: &str) -> String {
        format!("prices:{}", pair)
    }
}

#[async_trait]
impl PriceHistoryStore for RedisPriceStore {
    async fn append(&self, observation: &PriceObservation) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(observation)?;
        let score = observation.timestamp.timestamp_millis() as f64;

        conn.zadd::<_, _, _, ()>(Self::key(&observation.pair), value, score)
            .await?;

        Ok(())
    }

    async fn observations_since(
        &self,
        pair: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        let mut conn = self.conn.clone();
        let min_score = since.timestamp_millis() as f64;

        let results: Vec<String> = conn
            .zrangebyscore(Self::key(pair), min_score, "+inf")
            .await?;

        let observations = results
            .iter()
            .map(|json| serde_json::from_str::<PriceObservation>(json))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("Loaded {} observations for {} from Redis", observations.len(), pair);

        Ok(observations)
    }

    async fn count(&self, pair: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(Self::key(pair)).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn clear(pair: &str) {
        let client = Client::open("redis://127.0.0.1:6379").unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = conn.del(RedisPriceStore::key(pair)).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_connection_timeout() {
        // TEST-NET address, never routable
        let result = RedisPriceStore::connect("redis://192.0.2.1:6379").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_append_and_range_read() {
        let pair = "TEST/RANGE";
        clear(pair).await;

        let store = RedisPriceStore::connect("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");

        let now = Utc::now();
        for (minutes_ago, price) in [(30, 100.0), (20, 101.0), (10, 102.0)] {
            let obs = PriceObservation::new(
                now - ChronoDuration::minutes(minutes_ago),
                pair,
                price + 0.5,
                price,
            );
            store.append(&obs).await.unwrap();
        }

        let loaded = store
            .observations_since(pair, now - ChronoDuration::minutes(20))
            .await
            .unwrap();

        // Boundary observation at exactly 20 minutes is included
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].bid, 101.0);
        assert_eq!(loaded[1].bid, 102.0);
        assert_eq!(store.count(pair).await.unwrap(), 3);

        clear(pair).await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_unknown_pair_is_empty() {
        let store = RedisPriceStore::connect("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");

        let loaded = store
            .observations_since("NONEXISTENT/PAIR", Utc::now() - ChronoDuration::days(1))
            .await
            .unwrap();
        assert!(loaded.is_empty());
        assert_eq!(store.count("NONEXISTENT/PAIR").await.unwrap(), 0);
    }
}
