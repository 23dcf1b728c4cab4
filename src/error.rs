use thiserror::Error;

use crate::api::ExchangeError;
use crate::persistence::StoreError;

/// Errors surfaced by the trader outside the per-call exchange taxonomy
#[derive(Debug, Error)]
pub enum TraderError {
    /// Strategy parameters failed validation; fatal at startup
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The control source could not produce a snapshot this cycle
    #[error("Configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// API credentials could not be loaded
    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Price store error: {0}")]
    Store(#[from] StoreError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}
