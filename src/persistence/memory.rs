use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

use super::{PriceHistoryStore, StoreError};
use crate::models::PriceObservation;

/// Process-local store for paper runs and tests
#[derive(Debug, Default)]
pub struct InMemoryPriceStore {
    observations: Mutex<Vec<PriceObservation>>,
    fail_reads: Mutex<bool>,
}

impl InMemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observations(observations: Vec<PriceObservation>) -> Self {
        let store = Self::new();
        if let Ok(mut guard) = store.observations.lock() {
            *guard = observations;
        }
        store
    }

    /// Make every subsequent read fail, to simulate an outage
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut guard) = self.fail_reads.lock() {
            *guard = unavailable;
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let down = self.fail_reads.lock().map(|g| *g).unwrap_or(true);
        if down {
            return Err(StoreError::Connection("in-memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<PriceObservation>>, StoreError> {
        self.observations
            .lock()
            .map_err(|_| StoreError::Query("price store lock poisoned".into()))
    }
}

#[async_trait]
impl PriceHistoryStore for InMemoryPriceStore {
    async fn append(&self, observation: &PriceObservation) -> Result<(), StoreError> {
        self.lock()?.push(observation.clone());
        Ok(())
    }

    async fn observations_since(
        &self,
        pair: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        self.check_available()?;
        let mut matching: Vec<PriceObservation> = self
            .lock()?
            .iter()
            .filter(|o| o.pair == pair && o.timestamp >= since)
            .cloned()
            .collect();
        matching.sort_by_key(|o| o.timestamp);
        Ok(matching)
    }

    async fn count(&self, pair: &str) -> Result<usize, StoreError> {
        self.check_available()?;
        Ok(self.lock()?.iter().filter(|o| o.pair == pair).count())
    }
}
