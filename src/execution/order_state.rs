use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::api::OrderAck;
use crate::models::{
    AccountBalances, OrderKind, PendingOrder, Position, Signal, TradingPair, DUST_THRESHOLD,
};

/// An unfilled order is cancelled once it has waited this long
pub const CANCEL_AFTER_MINUTES: u64 = 30;

/// Lifecycle of the single position and its outstanding order
#[derive(Debug, Clone, PartialEq)]
pub enum OrderState {
    Flat,
    BuyPending { order: PendingOrder },
    Holding { position: Position },
    SellPending { position: Position, order: PendingOrder },
}

impl OrderState {
    fn label(&self) -> &'static str {
        match self {
            OrderState::Flat => "Flat",
            OrderState::BuyPending { .. } => "BuyPending",
            OrderState::Holding { .. } => "Holding",
            OrderState::SellPending { .. } => "SellPending",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} while {state}")]
pub struct InvalidTransition {
    pub action: &'static str,
    pub state: &'static str,
}

/// A pending order observed as filled
#[derive(Debug, Clone, PartialEq)]
pub struct FillEvent {
    pub kind: OrderKind,
    pub order_id: String,
    pub price: f64,
    pub quantity: f64,
    /// Entry price of the position this fill opened or closed
    pub entry_price: f64,
}

/// True once the exchange no longer reserves any coin or quote funds
///
/// With at most one order outstanding, zero reserved balance on both
/// sides means that order has filled.
pub fn detect_fill(balances: &AccountBalances, pair: &TradingPair) -> bool {
    balances.get(&pair.base).used <= 0.0 && balances.get(&pair.quote).used <= 0.0
}

/// Owns the order lifecycle; every change goes through a transition method
#[derive(Debug, Clone)]
pub struct OrderStateMachine {
    state: OrderState,
    sell_threshold: f64,
}

impl OrderStateMachine {
    pub fn new(sell_threshold: f64) -> Self {
        Self {
            state: OrderState::Flat,
            sell_threshold,
        }
    }

    pub fn state(&self) -> &OrderState {
        &self.state
    }

    pub fn pending_order(&self) -> Option<&PendingOrder> {
        match &self.state {
            OrderState::BuyPending { order } | OrderState::SellPending { order, .. } => Some(order),
            _ => None,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        match &self.state {
            OrderState::Holding { position } | OrderState::SellPending { position, .. } => {
                Some(position)
            }
            _ => None,
        }
    }

    /// Record an order the exchange accepted
    ///
    /// Buys are only valid while Flat, sells only while Holding.
    pub fn on_order_placed(
        &mut self,
        signal: &Signal,
        ack: OrderAck,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        let (kind, quantity, price) = match *signal {
            Signal::PlaceBuy { quantity, price } => (OrderKind::Buy, quantity, price),
            Signal::PlaceTakeProfit { quantity, price } => (OrderKind::TakeProfit, quantity, price),
            Signal::PlaceStopLoss { quantity, price } => (OrderKind::StopLoss, quantity, price),
            Signal::Hold => {
                return Err(InvalidTransition {
                    action: "record a hold as an order",
                    state: self.state.label(),
                })
            }
        };

        let order = PendingOrder {
            id: ack.id,
            kind,
            price,
            quantity,
            placed_at: now,
            wait_elapsed_minutes: 0,
        };

        self.state = match (&self.state, kind.is_sell()) {
            (OrderState::Flat, false) => OrderState::BuyPending { order },
            (OrderState::Holding { position }, true) => OrderState::SellPending {
                position: position.clone(),
                order,
            },
            (state, is_sell) => {
                return Err(InvalidTransition {
                    action: if is_sell { "place a sell" } else { "place a buy" },
                    state: state.label(),
                })
            }
        };

        Ok(())
    }

    /// Check a fresh balance snapshot for a fill of the pending order
    ///
    /// A sell that leaves more than dust behind keeps the position open
    /// with the same entry and target, so the remainder is sold later.
    pub fn check_fill(&mut self, balances: &AccountBalances, pair: &TradingPair) -> Option<FillEvent> {
        self.pending_order()?;
        if !detect_fill(balances, pair) {
            return None;
        }

        let (next, event) = match std::mem::replace(&mut self.state, OrderState::Flat) {
            OrderState::BuyPending { order } => {
                let position = Position {
                    entry_price: order.price,
                    target_sell_price: order.price * self.sell_threshold,
                    quantity: order.quantity,
                };
                let event = FillEvent {
                    kind: order.kind,
                    order_id: order.id,
                    price: order.price,
                    quantity: order.quantity,
                    entry_price: position.entry_price,
                };
                (OrderState::Holding { position }, event)
            }
            OrderState::SellPending { position, order } => {
                let event = FillEvent {
                    kind: order.kind,
                    order_id: order.id,
                    price: order.price,
                    quantity: order.quantity,
                    entry_price: position.entry_price,
                };
                let remaining = balances.get(&pair.base).total;
                if remaining > DUST_THRESHOLD {
                    let position = Position {
                        quantity: remaining,
                        ..position
                    };
                    (OrderState::Holding { position }, event)
                } else {
                    (OrderState::Flat, event)
                }
            }
            other => {
                self.state = other;
                return None;
            }
        };

        self.state = next;
        Some(event)
    }

    /// Count one more sampling interval against the pending order
    pub fn advance_wait(&mut self, interval_minutes: u64) {
        if let OrderState::BuyPending { order } | OrderState::SellPending { order, .. } =
            &mut self.state
        {
            order.wait_elapsed_minutes = order.wait_elapsed_minutes.saturating_add(interval_minutes);
        }
    }

    /// Pending order has waited long enough to be cancelled
    pub fn timed_out(&self) -> bool {
        self.pending_order()
            .is_some_and(|o| o.wait_elapsed_minutes >= CANCEL_AFTER_MINUTES)
    }

    /// The exchange confirmed the pending order is cancelled
    ///
    /// A cancelled sell goes back to Holding with the original entry.
    pub fn on_cancelled(&mut self) -> Result<PendingOrder, InvalidTransition> {
        match std::mem::replace(&mut self.state, OrderState::Flat) {
            OrderState::BuyPending { order } => Ok(order),
            OrderState::SellPending { position, order } => {
                self.state = OrderState::Holding { position };
                Ok(order)
            }
            other => {
                let state = other.label();
                self.state = other;
                Err(InvalidTransition {
                    action: "cancel",
                    state,
                })
            }
        }
    }

    /// Take ownership of coin left behind by a cancelled buy
    ///
    /// Only applies while Flat; the cancelled order's limit price becomes
    /// the entry. Returns true when a position was opened.
    pub fn adopt_residual(&mut self, cancelled: &PendingOrder, coin_total: f64) -> bool {
        if self.state != OrderState::Flat || cancelled.kind.is_sell() || coin_total <= DUST_THRESHOLD {
            return false;
        }

        self.state = OrderState::Holding {
            position: Position {
                entry_price: cancelled.price,
                target_sell_price: cancelled.price * self.sell_threshold,
                quantity: coin_total,
            },
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssetBalance;

    fn pair() -> TradingPair {
        TradingPair::new("BTC", "USD")
    }

    fn balances(coin_used: f64, quote_used: f64) -> AccountBalances {
        AccountBalances::new()
            .with_asset(
                "BTC",
                AssetBalance {
                    free: 0.0,
                    used: coin_used,
                    total: coin_used,
                },
            )
            .with_asset(
                "USD",
                AssetBalance {
                    free: 50.0,
                    used: quote_used,
                    total: 50.0 + quote_used,
                },
            )
    }

    fn ack(id: &str) -> OrderAck {
        OrderAck { id: id.to_string() }
    }

    fn buy() -> Signal {
        Signal::PlaceBuy {
            quantity: 0.5,
            price: 100.0,
        }
    }

    fn holding_machine() -> OrderStateMachine {
        let mut sm = OrderStateMachine::new(1.03);
        sm.on_order_placed(&buy(), ack("b1"), Utc::now()).unwrap();
        sm.check_fill(&balances(0.0, 0.0), &pair()).unwrap();
        sm
    }

    #[test]
    fn test_buy_fill_opens_position() {
        let mut sm = OrderStateMachine::new(1.03);
        sm.on_order_placed(&buy(), ack("b1"), Utc::now()).unwrap();
        assert_eq!(sm.state().to_string(), "BuyPending");
        assert_eq!(sm.pending_order().unwrap().id, "b1");

        // Funds still reserved: not filled
        assert!(sm.check_fill(&balances(0.0, 50.0), &pair()).is_none());

        let fill = sm.check_fill(&balances(0.0, 0.0), &pair()).unwrap();
        assert_eq!(fill.kind, OrderKind::Buy);

        let position = sm.position().unwrap();
        assert_eq!(position.entry_price, 100.0);
        assert!((position.target_sell_price - 103.0).abs() < 1e-9);
        assert!(sm.pending_order().is_none());
    }

    #[test]
    fn test_sell_fill_closes_position() {
        let mut sm = holding_machine();
        let sell = Signal::PlaceTakeProfit {
            quantity: 0.4975,
            price: 103.0,
        };
        sm.on_order_placed(&sell, ack("s1"), Utc::now()).unwrap();
        assert_eq!(sm.state().to_string(), "SellPending");

        assert!(sm.check_fill(&balances(0.4975, 0.0), &pair()).is_none());

        let fill = sm.check_fill(&balances(0.0, 0.0), &pair()).unwrap();
        assert_eq!(fill.kind, OrderKind::TakeProfit);
        assert_eq!(fill.entry_price, 100.0);
        assert_eq!(sm.state(), &OrderState::Flat);
    }

    #[test]
    fn test_sell_fill_with_remainder_keeps_holding() {
        let mut sm = holding_machine();
        let sell = Signal::PlaceTakeProfit {
            quantity: 104.21310058,
            price: 99.0,
        };
        sm.on_order_placed(&sell, ack("s1"), Utc::now()).unwrap();

        let after = balances(0.0, 0.0).with_asset(
            "BTC",
            AssetBalance {
                free: 0.52368392,
                used: 0.0,
                total: 0.52368392,
            },
        );
        let fill = sm.check_fill(&after, &pair()).unwrap();
        assert_eq!(fill.kind, OrderKind::TakeProfit);

        let position = sm.position().unwrap();
        assert_eq!(position.entry_price, 100.0);
        assert!((position.target_sell_price - 103.0).abs() < 1e-9);
        assert_eq!(position.quantity, 0.52368392);
        assert!(sm.pending_order().is_none());
    }

    #[test]
    fn test_cancelled_buy_residual_is_adopted() {
        let mut sm = OrderStateMachine::new(1.03);
        sm.on_order_placed(&buy(), ack("b1"), Utc::now()).unwrap();
        let cancelled = sm.on_cancelled().unwrap();

        // Dust is not worth tracking
        assert!(!sm.adopt_residual(&cancelled, 0.001));
        assert_eq!(sm.state(), &OrderState::Flat);

        assert!(sm.adopt_residual(&cancelled, 0.2));
        let position = sm.position().unwrap();
        assert_eq!(position.entry_price, 100.0);
        assert_eq!(position.quantity, 0.2);

        // Already holding
        assert!(!sm.adopt_residual(&cancelled, 0.3));
    }

    #[test]
    fn test_timeout_after_thirty_minutes() {
        let mut sm = OrderStateMachine::new(1.03);
        sm.on_order_placed(&buy(), ack("b1"), Utc::now()).unwrap();

        sm.advance_wait(10);
        assert!(!sm.timed_out());
        sm.advance_wait(10);
        assert!(!sm.timed_out());
        sm.advance_wait(10);
        assert!(sm.timed_out());
    }

    #[test]
    fn test_cancelled_buy_returns_to_flat() {
        let mut sm = OrderStateMachine::new(1.03);
        sm.on_order_placed(&buy(), ack("b1"), Utc::now()).unwrap();

        let cancelled = sm.on_cancelled().unwrap();
        assert_eq!(cancelled.id, "b1");
        assert_eq!(sm.state(), &OrderState::Flat);
    }

    #[test]
    fn test_cancelled_sell_restores_holding() {
        let mut sm = holding_machine();
        let before = sm.position().cloned().unwrap();

        let sell = Signal::PlaceStopLoss {
            quantity: 0.4975,
            price: 89.0,
        };
        sm.on_order_placed(&sell, ack("s1"), Utc::now()).unwrap();
        sm.on_cancelled().unwrap();

        assert_eq!(sm.state(), &OrderState::Holding { position: before });
    }

    #[test]
    fn test_invalid_transitions_leave_state_unchanged() {
        let mut sm = OrderStateMachine::new(1.03);
        let sell = Signal::PlaceTakeProfit {
            quantity: 1.0,
            price: 100.0,
        };
        assert!(sm.on_order_placed(&sell, ack("s1"), Utc::now()).is_err());
        assert!(sm.on_cancelled().is_err());
        assert_eq!(sm.state(), &OrderState::Flat);

        sm.on_order_placed(&buy(), ack("b1"), Utc::now()).unwrap();
        let snapshot = sm.state().clone();
        let err = sm.on_order_placed(&buy(), ack("b2"), Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "cannot place a buy while BuyPending");
        assert_eq!(sm.state(), &snapshot);
    }

    #[test]
    fn test_flat_ignores_balance_refresh() {
        let mut sm = OrderStateMachine::new(1.03);
        assert!(sm.check_fill(&balances(0.0, 0.0), &pair()).is_none());
        sm.advance_wait(100);
        assert!(!sm.timed_out());
    }
}
