//! Paper exchange with simulated limit-order fills.
//!
//! Holds a quote and a coin balance for one pair. Placing an order
//! reserves funds (reported as `used`); an order fills all-or-nothing as
//! soon as the ticker crosses its limit price, which releases the
//! reservation. Prices come either from `set_ticker` or from a live
//! public feed.
//!
//! ## Limitations
//!
//! - No fees, no partial fills, no market impact

use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::api::{ExchangeClient, ExchangeError, OrderAck};
use crate::models::{AccountBalances, AssetBalance, Ticker, TradingPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
struct RestingOrder {
    side: Side,
    quantity: Decimal,
    price: Decimal,
}

#[derive(Debug, Default, Clone, Copy)]
struct Wallet {
    free: Decimal,
    used: Decimal,
}

impl Wallet {
    fn to_balance(self) -> AssetBalance {
        let free = self.free.to_f64().unwrap_or(0.0);
        let used = self.used.to_f64().unwrap_or(0.0);
        AssetBalance {
            free,
            used,
            total: (self.free + self.used).to_f64().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    coin: Wallet,
    quote: Wallet,
    ticker: Option<Ticker>,
    orders: HashMap<String, RestingOrder>,
    next_order_id: u64,
}

impl PaperState {
    /// Fill every resting order the current ticker crosses
    fn match_orders(&mut self) {
        let Some(ticker) = self.ticker else {
            return;
        };

        let crossed: Vec<String> = self
            .orders
            .iter()
            .filter(|(_, o)| match o.side {
                Side::Buy => dec(ticker.ask) <= o.price,
                Side::Sell => dec(ticker.bid) >= o.price,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in crossed {
            if let Some(order) = self.orders.remove(&id) {
                let notional = order.quantity * order.price;
                match order.side {
                    Side::Buy => {
                        self.quote.used -= notional;
                        self.coin.free += order.quantity;
                    }
                    Side::Sell => {
                        self.coin.used -= order.quantity;
                        self.quote.free += notional;
                    }
                }
                tracing::info!(
                    order_id = %id,
                    "📝 Paper {:?} filled: {} @ {}",
                    order.side,
                    order.quantity,
                    order.price
                );
            }
        }
    }
}

fn dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Simulated exchange account for one trading pair
pub struct PaperExchange {
    pair: TradingPair,
    state: Mutex<PaperState>,
    price_feed: Option<Arc<dyn ExchangeClient>>,
}

impl PaperExchange {
    /// Start with `quote_balance` of the quote currency and no coin
    pub fn new(pair: TradingPair, quote_balance: f64) -> Self {
        let state = PaperState {
            quote: Wallet {
                free: dec(quote_balance),
                used: Decimal::ZERO,
            },
            next_order_id: 1,
            ..PaperState::default()
        };

        Self {
            pair,
            state: Mutex::new(state),
            price_feed: None,
        }
    }

    /// Pull tickers from a live client instead of `set_ticker`
    pub fn with_price_feed(mut self, feed: Arc<dyn ExchangeClient>) -> Self {
        self.price_feed = Some(feed);
        self
    }

    /// Move the simulated market; crossed orders fill immediately
    pub fn set_ticker(&self, ticker: Ticker) -> Result<(), ExchangeError> {
        let mut state = self.lock()?;
        state.ticker = Some(ticker);
        state.match_orders();
        Ok(())
    }

    pub fn open_orders(&self) -> usize {
        self.lock().map(|s| s.orders.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperState>, ExchangeError> {
        self.state
            .lock()
            .map_err(|_| ExchangeError::Unknown("paper exchange state poisoned".to_string()))
    }

    fn check_pair(&self, pair: &TradingPair) -> Result<(), ExchangeError> {
        if pair != &self.pair {
            return Err(ExchangeError::Exchange(format!("unknown product {}", pair.product_id())));
        }
        Ok(())
    }

    fn place(&self, side: Side, pair: &TradingPair, quantity: f64, price: f64) -> Result<OrderAck, ExchangeError> {
        self.check_pair(pair)?;
        if quantity <= 0.0 || price <= 0.0 {
            return Err(ExchangeError::Exchange("size and price must be positive".to_string()));
        }

        let mut state = self.lock()?;
        let quantity = dec(quantity);
        let price = dec(price);
        let notional = quantity * price;

        match side {
            Side::Buy => {
                if state.quote.free < notional {
                    return Err(ExchangeError::Exchange("Insufficient funds".to_string()));
                }
                state.quote.free -= notional;
                state.quote.used += notional;
            }
            Side::Sell => {
                if state.coin.free < quantity {
                    return Err(ExchangeError::Exchange("Insufficient funds".to_string()));
                }
                state.coin.free -= quantity;
                state.coin.used += quantity;
            }
        }

        let id = format!("paper-{}", state.next_order_id);
        state.next_order_id += 1;
        state.orders.insert(
            id.clone(),
            RestingOrder {
                side,
                quantity,
                price,
            },
        );

        tracing::debug!(order_id = %id, "Paper {:?} placed: {} @ {}", side, quantity, price);

        state.match_orders();
        Ok(OrderAck { id })
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        self.check_pair(pair)?;

        if let Some(feed) = &self.price_feed {
            let ticker = feed.fetch_ticker(pair).await?;
            self.set_ticker(ticker)?;
            return Ok(ticker);
        }

        self.lock()?
            .ticker
            .ok_or_else(|| ExchangeError::Network("no market price yet".to_string()))
    }

    async fn fetch_balance(&self) -> Result<AccountBalances, ExchangeError> {
        let state = self.lock()?;
        Ok(AccountBalances::new()
            .with_asset(&self.pair.base, state.coin.to_balance())
            .with_asset(&self.pair.quote, state.quote.to_balance()))
    }

    async fn create_limit_buy_order(
        &self,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError> {
        self.place(Side::Buy, pair, quantity, price)
    }

    async fn create_limit_sell_order(
        &self,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError> {
        self.place(Side::Sell, pair, quantity, price)
    }

    async fn cancel_order(&self, order_id: &str, pair: &TradingPair) -> Result<(), ExchangeError> {
        self.check_pair(pair)?;

        let mut state = self.lock()?;
        let order = state
            .orders
            .remove(order_id)
            .ok_or_else(|| ExchangeError::Exchange(format!("order {} not found", order_id)))?;

        match order.side {
            Side::Buy => {
                let notional = order.quantity * order.price;
                state.quote.used -= notional;
                state.quote.free += notional;
            }
            Side::Sell => {
                state.coin.used -= order.quantity;
                state.coin.free += order.quantity;
            }
        }

        tracing::info!(order_id, "Paper {:?} cancelled", order.side);
        Ok(())
    }
}
