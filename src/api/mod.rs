// Exchange capability and its venue adapters
pub mod coinbase;
pub mod credentials;

pub use coinbase::CoinbaseClient;
pub use credentials::ApiCredentials;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{AccountBalances, Ticker, TradingPair};

/// Coarse classification of a failed exchange call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport trouble: connect, timeout, venue unavailable
    Network,
    /// The venue understood and rejected the request
    Exchange,
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Network => "network",
            FailureKind::Exchange => "exchange",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Errors returned by an [`ExchangeClient`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("exchange rejected request: {0}")]
    Exchange(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ExchangeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExchangeError::Network(_) => FailureKind::Network,
            ExchangeError::Exchange(_) => FailureKind::Exchange,
            ExchangeError::Unknown(_) => FailureKind::Unknown,
        }
    }

    /// Raw message as reported by the transport or venue
    pub fn message(&self) -> &str {
        match self {
            ExchangeError::Network(m) | ExchangeError::Exchange(m) | ExchangeError::Unknown(m) => m,
        }
    }
}

/// Acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub id: String,
}

/// What the trading core needs from an exchange account
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError>;

    async fn fetch_balance(&self) -> Result<AccountBalances, ExchangeError>;

    async fn create_limit_buy_order(
        &self,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError>;

    async fn create_limit_sell_order(
        &self,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError>;

    async fn cancel_order(&self, order_id: &str, pair: &TradingPair) -> Result<(), ExchangeError>;
}

#[async_trait]
impl<T: ExchangeClient + ?Sized> ExchangeClient for Arc<T> {
    async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        (**self).fetch_ticker(pair).await
    }

    async fn fetch_balance(&self) -> Result<AccountBalances, ExchangeError> {
        (**self).fetch_balance().await
    }

    async fn create_limit_buy_order(
        &self,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError> {
        (**self).create_limit_buy_order(pair, quantity, price).await
    }

    async fn create_limit_sell_order(
        &self,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError> {
        (**self).create_limit_sell_order(pair, quantity, price).await
    }

    async fn cancel_order(&self, order_id: &str, pair: &TradingPair) -> Result<(), ExchangeError> {
        (**self).cancel_order(order_id, pair).await
    }
}
