use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::api::{ExchangeClient, ExchangeError, OrderAck};
use crate::models::{AccountBalances, Ticker, TradingPair};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // Start with 2 seconds

/// How reads are retried; writes always get a single attempt
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Jitter as a fraction of the delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no sleeping between attempts
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            jitter_factor: 0.0,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based): base * 2^(attempt-1) +/- jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));

        let jitter_range = exp.as_secs_f64() * self.jitter_factor.max(0.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_secs_f64((exp.as_secs_f64() + jitter).max(0.0))
    }
}

/// Exchange client wrapper with bounded read retries and failure logging
///
/// Ticker and balance reads are retried; order placement and
/// cancellation are not, since a lost response may still have reached
/// the venue.
pub struct ResilientExchange<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ExchangeClient> ResilientExchange<C> {
    pub fn new(inner: C) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        self.with_retry("fetch_ticker", move || self.inner.fetch_ticker(pair))
            .await
    }

    pub async fn fetch_balance(&self) -> Result<AccountBalances, ExchangeError> {
        self.with_retry("fetch_balance", move || self.inner.fetch_balance())
            .await
    }

    pub async fn create_limit_buy_order(
        &self,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError> {
        let result = self.inner.create_limit_buy_order(pair, quantity, price).await;
        log_single_attempt("create_limit_buy_order", &result);
        result
    }

    pub async fn create_limit_sell_order(
        &self,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError> {
        let result = self.inner.create_limit_sell_order(pair, quantity, price).await;
        log_single_attempt("create_limit_sell_order", &result);
        result
    }

    pub async fn cancel_order(&self, order_id: &str, pair: &TradingPair) -> Result<(), ExchangeError> {
        let result = self.inner.cancel_order(order_id, pair).await;
        log_single_attempt("cancel_order", &result);
        result
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("✓ {} succeeded after {} attempts", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts => {
                    let backoff = self.policy.backoff(attempt);
                    tracing::warn!(
                        operation,
                        kind = %e.kind(),
                        "Attempt {}/{} failed: {}. Retrying in {}ms...",
                        attempt,
                        max_attempts,
                        e.message(),
                        backoff.as_millis()
                    );
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        operation,
                        kind = %e.kind(),
                        "All {} attempts failed: {}",
                        max_attempts,
                        e.message()
                    );
                    return Err(e);
                }
            }
        }
    }
}

fn log_single_attempt<T>(operation: &str, result: &Result<T, ExchangeError>) {
    if let Err(e) = result {
        tracing::error!(operation, kind = %e.kind(), "{} failed: {}", operation, e.message());
    }
}
