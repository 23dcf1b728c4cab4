use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::models::PriceObservation;
use crate::persistence::{PriceHistoryStore, StoreError};

/// SQLite persistence for price history
pub struct SqlitePriceStore {
    pool: SqlitePool,
}

impl SqlitePriceStore {
    /// Open (creating if missing) the database and run migrations
    ///
    /// # Arguments
    /// * `database_url` - e.g. `sqlite://pricedata.db` or `sqlite::memory:`
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // In-memory databases are per-connection
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to SQLite at {}", database_url);

        Ok(Self { pool })
    }
}

#[async_trait]
impl PriceHistoryStore for SqlitePriceStore {
    async fn append(&self, observation: &PriceObservation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO price_data (observed_at_ms, currency_pair, ask_price, bid_price, market_price)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(observation.timestamp.timestamp_millis())
        .bind(&observation.pair)
        .bind(observation.ask)
        .bind(observation.bid)
        .bind(observation.mid)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn observations_since(
        &self,
        pair: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT observed_at_ms, currency_pair, ask_price, bid_price, market_price
            FROM price_data
            WHERE currency_pair = ?1 AND observed_at_ms >= ?2
            ORDER BY observed_at_ms ASC
            "#,
        )
        .bind(pair)
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        let mut observations = Vec::with_capacity(rows.len());
        for row in rows {
            let millis: i64 = row.try_get("observed_at_ms")?;
            let timestamp = DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| StoreError::Decode(format!("timestamp out of range: {}", millis)))?;

            observations.push(PriceObservation {
                timestamp,
                pair: row.try_get("currency_pair")?,
                ask: row.try_get("ask_price")?,
                bid: row.try_get("bid_price")?,
                mid: row.try_get("market_price")?,
            });
        }

        Ok(observations)
    }

    async fn count(&self, pair: &str) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM price_data WHERE currency_pair = ?1")
            .bind(pair)
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("n")?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn memory_store() -> SqlitePriceStore {
        SqlitePriceStore::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory SQLite")
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let store = memory_store().await;
        let now = Utc::now();

        let obs = PriceObservation::new(now, "BTC/USD", 101.0, 99.0);
        store.append(&obs).await.unwrap();

        let loaded = store
            .observations_since("BTC/USD", now - Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].bid, 99.0);
        assert_eq!(loaded[0].mid, 100.0);
        assert_eq!(loaded[0].timestamp.timestamp_millis(), now.timestamp_millis());
    }

    #[tokio::test]
    async fn test_window_boundary_is_inclusive() {
        let store = memory_store().await;
        let now = Utc::now();
        let boundary = now - Duration::minutes(60);

        for ts in [boundary - Duration::minutes(10), boundary, now] {
            store
                .append(&PriceObservation::new(ts, "BTC/USD", 1.0, 1.0))
                .await
                .unwrap();
        }

        let loaded = store.observations_since("BTC/USD", boundary).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].timestamp <= loaded[1].timestamp);
    }

    #[tokio::test]
    async fn test_count_is_per_pair() {
        let store = memory_store().await;
        let now = Utc::now();

        store.append(&PriceObservation::new(now, "BTC/USD", 1.0, 1.0)).await.unwrap();
        store.append(&PriceObservation::new(now, "BTC/USD", 2.0, 2.0)).await.unwrap();
        store.append(&PriceObservation::new(now, "ETH/USD", 3.0, 3.0)).await.unwrap();

        assert_eq!(store.count("BTC/USD").await.unwrap(), 2);
        assert_eq!(store.count("ETH/USD").await.unwrap(), 1);
        assert_eq!(store.count("SOL/USD").await.unwrap(), 0);
    }
}
