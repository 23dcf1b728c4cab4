use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::TraderError;

/// Below this coin balance the account is treated as flat
pub const DUST_THRESHOLD: f64 = 0.002;

/// Longest accepted moving-average window (366 days)
pub const MAX_ROLLING_WINDOW_MINUTES: u64 = 366 * 24 * 60;

/// Longest accepted sampling interval (one day)
pub const MAX_SAMPLING_INTERVAL_MINUTES: u64 = 24 * 60;

/// A base/quote trading pair (e.g. BTC/USD)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Venue product identifier, e.g. `BTC-USD`
    pub fn product_id(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// One row of the price history written by the external collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub timestamp: DateTime<Utc>,
    pub pair: String,
    pub ask: f64,
    pub bid: f64,
    pub mid: f64,
}

impl PriceObservation {
    pub fn new(timestamp: DateTime<Utc>, pair: impl Into<String>, ask: f64, bid: f64) -> Self {
        Self {
            timestamp,
            pair: pair.into(),
            ask,
            bid,
            mid: (ask + bid) / 2.0,
        }
    }
}

/// Strategy parameters fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParameters {
    /// Length of the moving-average window, in minutes
    pub rolling_window_minutes: u64,

    /// Buy when ask <= average * buy_threshold (e.g. 0.97 = 3% below)
    pub buy_threshold: f64,

    /// Take profit at entry * sell_threshold (e.g. 1.03 = +3%)
    pub sell_threshold: f64,

    /// Stop out at entry * stop_loss (e.g. 0.90 = -10%)
    pub stop_loss: f64,

    /// Fraction of free quote balance committed per buy, in (0, 1]
    pub buy_size_fraction: f64,

    /// Coin symbol traded against the quote currency
    pub coin: String,
}

impl StrategyParameters {
    /// Reject parameter sets the trading loop must never start with
    pub fn validate(&self) -> Result<(), TraderError> {
        if !(self.buy_size_fraction > 0.0 && self.buy_size_fraction <= 1.0) {
            return Err(TraderError::InvalidParameters(format!(
                "buy size must be in (0, 1], got {}",
                self.buy_size_fraction
            )));
        }
        if self.rolling_window_minutes == 0 {
            return Err(TraderError::InvalidParameters(
                "rolling window must be at least one minute".to_string(),
            ));
        }
        if self.rolling_window_minutes > MAX_ROLLING_WINDOW_MINUTES {
            return Err(TraderError::InvalidParameters(format!(
                "rolling window must be at most {} minutes, got {}",
                MAX_ROLLING_WINDOW_MINUTES, self.rolling_window_minutes
            )));
        }
        if !(self.buy_threshold > 0.0 && self.buy_threshold < 1.0) {
            return Err(TraderError::InvalidParameters(format!(
                "buy threshold must be in (0, 1), got {}",
                self.buy_threshold
            )));
        }
        if !(self.sell_threshold >= 1.0) {
            return Err(TraderError::InvalidParameters(format!(
                "sell threshold must be >= 1, got {}",
                self.sell_threshold
            )));
        }
        if !(self.stop_loss > 0.0 && self.stop_loss < 1.0) {
            return Err(TraderError::InvalidParameters(format!(
                "stop loss must be in (0, 1), got {}",
                self.stop_loss
            )));
        }
        if self.coin.trim().is_empty() {
            return Err(TraderError::InvalidParameters(
                "coin symbol must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Control flags re-read at the start of every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSignals {
    pub trade_enabled: bool,
    pub script_running: bool,
    /// Starting capital the portfolio is measured against
    pub total_invested: f64,
    pub sampling_interval_minutes: u64,
}

impl Default for ControlSignals {
    fn default() -> Self {
        Self {
            trade_enabled: true,
            script_running: true,
            total_invested: 0.0,
            sampling_interval_minutes: 10,
        }
    }
}

/// Why a moving average is (or isn't) usable this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverageStatus {
    /// Fewer observations stored in total than a full window needs
    StillCollecting,
    /// The window itself has less than 65% of its expected points
    MissingData,
    /// The history store could not be read
    StoreUnavailable,
    Sufficient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageResult {
    pub value: f64,
    pub sufficient: bool,
    /// Observations inside the window
    pub samples: usize,
    pub status: CoverageStatus,
}

impl MovingAverageResult {
    pub fn insufficient(status: CoverageStatus, samples: usize) -> Self {
        Self {
            value: 0.0,
            sufficient: false,
            samples,
            status,
        }
    }
}

/// Best bid/ask from the exchange
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub ask: f64,
    pub bid: f64,
}

impl Ticker {
    pub fn mid(&self) -> f64 {
        (self.ask + self.bid) / 2.0
    }
}

/// Balance of a single asset; `used` is the amount reserved by open orders
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: f64,
    pub used: f64,
    pub total: f64,
}

/// Balances for every asset on the account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountBalances {
    assets: HashMap<String, AssetBalance>,
}

impl AccountBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, asset: &str, balance: AssetBalance) -> Self {
        self.insert(asset, balance);
        self
    }

    pub fn insert(&mut self, asset: &str, balance: AssetBalance) {
        self.assets.insert(asset.to_uppercase(), balance);
    }

    /// Balance for an asset; assets the exchange didn't report are zero
    pub fn get(&self, asset: &str) -> AssetBalance {
        self.assets
            .get(&asset.to_uppercase())
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Buy,
    TakeProfit,
    StopLoss,
}

impl OrderKind {
    pub fn is_sell(&self) -> bool {
        !matches!(self, OrderKind::Buy)
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderKind::Buy => "BUY",
            OrderKind::TakeProfit => "WIN",
            OrderKind::StopLoss => "LOSS",
        };
        f.write_str(label)
    }
}

/// The single outstanding order, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub id: String,
    pub kind: OrderKind,
    /// Limit price the order was placed at
    pub price: f64,
    pub quantity: f64,
    pub placed_at: DateTime<Utc>,
    pub wait_elapsed_minutes: u64,
}

/// An open position; only exists while holding coin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub entry_price: f64,
    pub target_sell_price: f64,
    pub quantity: f64,
}

/// Trading decision for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    PlaceBuy { quantity: f64, price: f64 },
    PlaceTakeProfit { quantity: f64, price: f64 },
    PlaceStopLoss { quantity: f64, price: f64 },
    Hold,
}

impl Signal {
    /// Order kind this signal would submit, `None` for Hold
    pub fn order_kind(&self) -> Option<OrderKind> {
        match self {
            Signal::PlaceBuy { .. } => Some(OrderKind::Buy),
            Signal::PlaceTakeProfit { .. } => Some(OrderKind::TakeProfit),
            Signal::PlaceStopLoss { .. } => Some(OrderKind::StopLoss),
            Signal::Hold => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(buy_size: f64) -> StrategyParameters {
        StrategyParameters {
            rolling_window_minutes: 6000,
            buy_threshold: 0.97,
            sell_threshold: 1.03,
            stop_loss: 0.90,
            buy_size_fraction: buy_size,
            coin: "BTC".to_string(),
        }
    }

    #[test]
    fn test_trading_pair_formats() {
        let pair = TradingPair::new("btc", "usd");
        assert_eq!(pair.to_string(), "BTC/USD");
        assert_eq!(pair.product_id(), "BTC-USD");
    }

    #[test]
    fn test_observation_mid() {
        let obs = PriceObservation::new(Utc::now(), "BTC/USD", 101.0, 99.0);
        assert_eq!(obs.mid, 100.0);
    }

    #[test]
    fn test_buy_size_bounds() {
        assert!(params(1.0).validate().is_ok());
        assert!(params(0.25).validate().is_ok());

        for bad in [0.0, -0.1, 1.5] {
            let err = params(bad).validate().unwrap_err();
            assert!(matches!(err, TraderError::InvalidParameters(_)));
            assert!(err.to_string().contains("buy size"));
        }
    }

    #[test]
    fn test_threshold_bounds() {
        let mut p = params(0.5);
        p.sell_threshold = 0.99;
        assert!(p.validate().is_err());

        let mut p = params(0.5);
        p.stop_loss = 1.2;
        assert!(p.validate().is_err());

        let mut p = params(0.5);
        p.buy_threshold = 1.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_rolling_window_bounds() {
        let mut p = params(0.5);
        p.rolling_window_minutes = MAX_ROLLING_WINDOW_MINUTES;
        assert!(p.validate().is_ok());

        for bad in [0, MAX_ROLLING_WINDOW_MINUTES + 1, u64::MAX] {
            p.rolling_window_minutes = bad;
            let err = p.validate().unwrap_err();
            assert!(matches!(err, TraderError::InvalidParameters(_)));
            assert!(err.to_string().contains("rolling window"));
        }
    }

    #[test]
    fn test_missing_asset_is_zero() {
        let balances = AccountBalances::new().with_asset(
            "usd",
            AssetBalance {
                free: 10.0,
                used: 0.0,
                total: 10.0,
            },
        );
        assert_eq!(balances.get("USD").free, 10.0);
        assert_eq!(balances.get("BTC"), AssetBalance::default());
    }
}
