// Trading strategy module
pub mod mean_reversion;

pub use mean_reversion::MeanReversionStrategy;

use crate::models::{AssetBalance, MovingAverageResult, Position, Signal, Ticker};

/// Everything a strategy sees in one cycle
#[derive(Debug, Clone)]
pub struct CycleContext<'a> {
    pub average: &'a MovingAverageResult,
    pub ticker: Ticker,
    pub coin: AssetBalance,
    pub quote: AssetBalance,
    /// Open position, if the account is holding coin bought by this process
    pub position: Option<&'a Position>,
    pub has_pending_order: bool,
}

/// Base trait for trading strategies
pub trait Strategy: Send + Sync {
    /// Decide the next action; must not perform I/O
    fn decide(&self, ctx: &CycleContext<'_>) -> Signal;

    /// Get strategy name
    fn name(&self) -> &str;
}
