use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{Signal, StrategyParameters, DUST_THRESHOLD};
use crate::strategy::{CycleContext, Strategy};

/// Mean reversion against a rolling bid average
///
/// Entry: flat (coin below dust) and best ask at or below
/// `average * buy_threshold`.
///
/// Exit (checked in order):
/// - Take profit when best bid reaches `entry * sell_threshold`
/// - Stop loss when best bid falls to `entry * stop_loss`
#[derive(Debug, Clone)]
pub struct MeanReversionStrategy {
    params: StrategyParameters,
}

impl MeanReversionStrategy {
    pub fn new(params: StrategyParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StrategyParameters {
        &self.params
    }
}

impl Strategy for MeanReversionStrategy {
    fn decide(&self, ctx: &CycleContext<'_>) -> Signal {
        if ctx.has_pending_order || !ctx.average.sufficient {
            return Signal::Hold;
        }

        let p = &self.params;
        let ask = ctx.ticker.ask;
        let bid = ctx.ticker.bid;

        if ctx.coin.total < DUST_THRESHOLD {
            let buy_below = ctx.average.value * p.buy_threshold;

            tracing::debug!(
                "Entry check: ask {:.4} vs {:.4} (avg {:.4} x {})",
                ask,
                buy_below,
                ctx.average.value,
                p.buy_threshold
            );

            if ask > buy_below {
                return Signal::Hold;
            }

            let quantity = submitted_quantity(buy_quantity(ctx.quote.free, p.buy_size_fraction, ask));
            if quantity <= 0.0 {
                tracing::warn!(
                    "Buy triggered at {:.4} but free balance {:.2} is too small to size an order",
                    ask,
                    ctx.quote.free
                );
                return Signal::Hold;
            }

            tracing::info!(
                "🎯 MEAN REVERSION BUY: ask {:.4} is {:.2}% below average {:.4}",
                ask,
                (1.0 - ask / ctx.average.value) * 100.0,
                ctx.average.value
            );
            return Signal::PlaceBuy { quantity, price: ask };
        }

        if ctx.coin.total <= DUST_THRESHOLD {
            return Signal::Hold;
        }

        let Some(position) = ctx.position else {
            tracing::warn!(
                "Holding {:.8} {} with no known entry price, not selling",
                ctx.coin.total,
                p.coin
            );
            return Signal::Hold;
        };

        let take_profit = bid >= position.target_sell_price;
        let stop_loss = !take_profit && position.entry_price * p.stop_loss >= bid;
        if !take_profit && !stop_loss {
            return Signal::Hold;
        }

        let quantity = submitted_quantity(ctx.coin.free);
        if quantity <= 0.0 {
            return Signal::Hold;
        }

        if take_profit {
            tracing::info!(
                "💰 TAKE PROFIT: bid {:.4} reached target {:.4} (entry {:.4})",
                bid,
                position.target_sell_price,
                position.entry_price
            );
            Signal::PlaceTakeProfit { quantity, price: bid }
        } else {
            tracing::info!(
                "🛑 STOP LOSS: bid {:.4} at or below {:.4} (entry {:.4})",
                bid,
                position.entry_price * p.stop_loss,
                position.entry_price
            );
            Signal::PlaceStopLoss { quantity, price: bid }
        }
    }

    fn name(&self) -> &str {
        "Mean Reversion"
    }
}

/// `free_quote * fraction / ask`, truncated to 4 decimals
pub fn buy_quantity(free_quote: f64, fraction: f64, ask: f64) -> f64 {
    if ask <= 0.0 || free_quote <= 0.0 {
        return 0.0;
    }

    Decimal::from_f64(free_quote * fraction / ask)
        .map(|q| q.round_dp_with_strategy(4, RoundingStrategy::ToZero))
        .and_then(|q| q.to_f64())
        .unwrap_or(0.0)
}

/// Reduce by 0.5% to leave room for fees, rounded to 8 decimals
pub fn submitted_quantity(quantity: f64) -> f64 {
    if quantity <= 0.0 {
        return 0.0;
    }

    Decimal::from_f64(quantity)
        .map(|q| (q * Decimal::new(995, 3)).round_dp(8))
        .and_then(|q| q.to_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetBalance, CoverageStatus, MovingAverageResult, Position, Ticker};

    fn params() -> StrategyParameters {
        StrategyParameters {
            rolling_window_minutes: 60,
            buy_threshold: 0.97,
            sell_threshold: 1.03,
            stop_loss: 0.90,
            buy_size_fraction: 0.25,
            coin: "BTC".to_string(),
        }
    }

    fn average(value: f64) -> MovingAverageResult {
        MovingAverageResult {
            value,
            sufficient: true,
            samples: 6,
            status: CoverageStatus::Sufficient,
        }
    }

    fn balance(free: f64, used: f64) -> AssetBalance {
        AssetBalance {
            free,
            used,
            total: free + used,
        }
    }

    fn flat_ctx<'a>(avg: &'a MovingAverageResult, price: f64) -> CycleContext<'a> {
        CycleContext {
            average: avg,
            ticker: Ticker { ask: price, bid: price },
            coin: balance(0.0, 0.0),
            quote: balance(100.0, 0.0),
            position: None,
            has_pending_order: false,
        }
    }

    fn holding_ctx<'a>(avg: &'a MovingAverageResult, pos: &'a Position, bid: f64) -> CycleContext<'a> {
        CycleContext {
            average: avg,
            ticker: Ticker { ask: bid, bid },
            coin: balance(pos.quantity, 0.0),
            quote: balance(0.0, 0.0),
            position: Some(pos),
            has_pending_order: false,
        }
    }

    fn position() -> Position {
        Position {
            entry_price: 100.0,
            target_sell_price: 103.0,
            quantity: 0.5,
        }
    }

    #[test]
    fn test_buy_trigger_at_threshold() {
        let strategy = MeanReversionStrategy::new(params());
        let avg = average(100.0);

        assert!(matches!(
            strategy.decide(&flat_ctx(&avg, 97.0)),
            Signal::PlaceBuy { price, .. } if price == 97.0
        ));
        assert!(matches!(strategy.decide(&flat_ctx(&avg, 96.0)), Signal::PlaceBuy { .. }));
        assert_eq!(strategy.decide(&flat_ctx(&avg, 97.01)), Signal::Hold);
    }

    #[test]
    fn test_buy_sizing() {
        let strategy = MeanReversionStrategy::new(params());
        let avg = average(100.0);

        // 100 * 0.25 / 95 = 0.263157.. -> 0.2631 -> * 0.995
        match strategy.decide(&flat_ctx(&avg, 95.0)) {
            Signal::PlaceBuy { quantity, price } => {
                assert_eq!(quantity, 0.2617845);
                assert_eq!(price, 95.0);
            }
            other => panic!("expected buy, got {:?}", other),
        }
    }

    #[test]
    fn test_take_profit_at_target() {
        let strategy = MeanReversionStrategy::new(params());
        let avg = average(100.0);
        let pos = position();

        assert!(matches!(
            strategy.decide(&holding_ctx(&avg, &pos, 103.0)),
            Signal::PlaceTakeProfit { quantity, price } if quantity == 0.4975 && price == 103.0
        ));
        assert_eq!(strategy.decide(&holding_ctx(&avg, &pos, 102.99)), Signal::Hold);
    }

    #[test]
    fn test_stop_loss_at_floor() {
        let strategy = MeanReversionStrategy::new(params());
        let avg = average(100.0);
        let pos = position();

        assert!(matches!(
            strategy.decide(&holding_ctx(&avg, &pos, 90.0)),
            Signal::PlaceStopLoss { .. }
        ));
        assert!(matches!(
            strategy.decide(&holding_ctx(&avg, &pos, 85.0)),
            Signal::PlaceStopLoss { .. }
        ));
        assert_eq!(strategy.decide(&holding_ctx(&avg, &pos, 90.01)), Signal::Hold);
    }

    #[test]
    fn test_take_profit_wins_over_stop_loss() {
        // Degenerate target below the stop floor: take profit must win
        let strategy = MeanReversionStrategy::new(params());
        let avg = average(100.0);
        let pos = Position {
            entry_price: 100.0,
            target_sell_price: 80.0,
            quantity: 0.5,
        };

        assert!(matches!(
            strategy.decide(&holding_ctx(&avg, &pos, 85.0)),
            Signal::PlaceTakeProfit { .. }
        ));
    }

    #[test]
    fn test_holds_without_sufficient_average() {
        let strategy = MeanReversionStrategy::new(params());
        let avg = MovingAverageResult::insufficient(CoverageStatus::MissingData, 2);
        assert_eq!(strategy.decide(&flat_ctx(&avg, 50.0)), Signal::Hold);
    }

    #[test]
    fn test_holds_while_order_pending() {
        let strategy = MeanReversionStrategy::new(params());
        let avg = average(100.0);
        let mut ctx = flat_ctx(&avg, 90.0);
        ctx.has_pending_order = true;
        assert_eq!(strategy.decide(&ctx), Signal::Hold);
    }

    #[test]
    fn test_holds_coin_without_known_entry() {
        let strategy = MeanReversionStrategy::new(params());
        let avg = average(100.0);
        let mut ctx = flat_ctx(&avg, 200.0);
        ctx.coin = balance(1.0, 0.0);
        assert_eq!(strategy.decide(&ctx), Signal::Hold);
    }

    #[test]
    fn test_dust_balance_counts_as_flat() {
        let strategy = MeanReversionStrategy::new(params());
        let avg = average(100.0);
        let mut ctx = flat_ctx(&avg, 95.0);
        ctx.coin = balance(0.0013, 0.0);
        assert!(matches!(strategy.decide(&ctx), Signal::PlaceBuy { .. }));
    }

    #[test]
    fn test_tiny_budget_holds() {
        let strategy = MeanReversionStrategy::new(params());
        let avg = average(100_000.0);
        let mut ctx = flat_ctx(&avg, 90_000.0);
        ctx.quote = balance(1.0, 0.0);
        assert_eq!(strategy.decide(&ctx), Signal::Hold);
    }

    #[test]
    fn test_quantity_helpers() {
        assert_eq!(buy_quantity(100.0, 0.25, 95.0), 0.2631);
        assert_eq!(buy_quantity(100.0, 0.25, 0.0), 0.0);
        assert_eq!(submitted_quantity(0.2617845), 0.26047558);
        assert_eq!(submitted_quantity(0.0), 0.0);
    }
}
