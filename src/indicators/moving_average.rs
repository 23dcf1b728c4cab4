use chrono::{DateTime, Duration, Utc};

use crate::models::{CoverageStatus, MovingAverageResult, PriceObservation};
use crate::persistence::PriceHistoryStore;

/// Share of the expected window points that must be present
pub const MIN_WINDOW_COVERAGE: f64 = 0.65;

/// Calculate Simple Moving Average (SMA) over the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// `now - minutes`, clamped to the earliest representable time
pub fn window_start(now: DateTime<Utc>, minutes: u64) -> DateTime<Utc> {
    i64::try_from(minutes)
        .ok()
        .and_then(Duration::try_minutes)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Mean bid over `window`, with the data-sufficiency verdict
///
/// `window` holds the observations inside the rolling window and
/// `total_count` is every observation stored for the pair. Two checks
/// must pass: enough history overall (bootstrap) and enough points inside
/// the window (coverage).
pub fn rolling_bid_average(
    window: &[PriceObservation],
    rolling_window_minutes: u64,
    sampling_interval_minutes: u64,
    total_count: usize,
) -> MovingAverageResult {
    let samples = window.len();
    let expected = rolling_window_minutes as f64 / sampling_interval_minutes.max(1) as f64;

    if (total_count as f64) < expected - 1.0 {
        return MovingAverageResult::insufficient(CoverageStatus::StillCollecting, samples);
    }

    if samples as f64 <= MIN_WINDOW_COVERAGE * expected {
        return MovingAverageResult::insufficient(CoverageStatus::MissingData, samples);
    }

    let bids: Vec<f64> = window.iter().map(|o| o.bid).collect();
    match calculate_sma(&bids, samples) {
        Some(value) => MovingAverageResult {
            value,
            sufficient: true,
            samples,
            status: CoverageStatus::Sufficient,
        },
        None => MovingAverageResult::insufficient(CoverageStatus::MissingData, samples),
    }
}

/// Reads the window from a price store and averages it
pub struct MovingAverageAggregator<S> {
    store: S,
    pair: String,
    rolling_window_minutes: u64,
}

impl<S: PriceHistoryStore> MovingAverageAggregator<S> {
    pub fn new(store: S, pair: impl Into<String>, rolling_window_minutes: u64) -> Self {
        Self {
            store,
            pair: pair.into(),
            rolling_window_minutes,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Never fails: a store outage is reported as `StoreUnavailable`
    pub async fn compute(
        &self,
        now: DateTime<Utc>,
        sampling_interval_minutes: u64,
    ) -> MovingAverageResult {
        let since = window_start(now, self.rolling_window_minutes);

        let window = match self.store.observations_since(&self.pair, since).await {
            Ok(window) => window,
            Err(e) => {
                tracing::error!(pair = %self.pair, "Failed to read price window: {}", e);
                return MovingAverageResult::insufficient(CoverageStatus::StoreUnavailable, 0);
            }
        };

        let total = match self.store.count(&self.pair).await {
            Ok(total) => total,
            Err(e) => {
                tracing::error!(pair = %self.pair, "Failed to count price history: {}", e);
                return MovingAverageResult::insufficient(
                    CoverageStatus::StoreUnavailable,
                    window.len(),
                );
            }
        };

        let result = rolling_bid_average(
            &window,
            self.rolling_window_minutes,
            sampling_interval_minutes,
            total,
        );

        match result.status {
            CoverageStatus::StillCollecting => tracing::info!(
                "⏳ Still collecting price history for {} ({} stored)",
                self.pair,
                total
            ),
            CoverageStatus::MissingData => tracing::warn!(
                "Missing price data for {}: {} points in the last {} minutes",
                self.pair,
                result.samples,
                self.rolling_window_minutes
            ),
            _ => tracing::debug!(
                "Moving average for {}: {:.4} over {} points",
                self.pair,
                result.value,
                result.samples
            ),
        }

        result
    }
}
