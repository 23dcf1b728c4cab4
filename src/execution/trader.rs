use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::api::ExchangeClient;
use crate::control::ControlSource;
use crate::error::TraderError;
use crate::execution::order_state::{FillEvent, OrderStateMachine};
use crate::execution::resilient::ResilientExchange;
use crate::execution::session::{PortfolioSnapshot, SessionStats, SessionSummary};
use crate::indicators::MovingAverageAggregator;
use crate::models::{
    AccountBalances, ControlSignals, PendingOrder, Signal, StrategyParameters, TradingPair,
};
use crate::persistence::PriceHistoryStore;
use crate::strategy::{CycleContext, MeanReversionStrategy, Strategy};

/// What the loop should do after a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Sleep for the interval, then run the next cycle
    Continue {
        interval_minutes: u64,
        summary: Option<SessionSummary>,
    },
    /// The control source asked the trader to stop
    Shutdown,
}

/// One trading pair, one account, one decision per sampling interval
pub struct Trader<C, S, K> {
    pair: TradingPair,
    exchange: ResilientExchange<C>,
    aggregator: MovingAverageAggregator<S>,
    control: K,
    strategy: Box<dyn Strategy>,
    orders: OrderStateMachine,
    stats: SessionStats,
    last_interval_minutes: u64,
}

impl<C, S, K> Trader<C, S, K>
where
    C: ExchangeClient,
    S: PriceHistoryStore,
    K: ControlSource,
{
    /// Fails fast on invalid parameters, before any exchange call
    pub fn new(
        quote: &str,
        params: StrategyParameters,
        exchange: ResilientExchange<C>,
        store: S,
        control: K,
    ) -> Result<Self, TraderError> {
        params.validate()?;

        let pair = TradingPair::new(&params.coin, quote);
        let aggregator =
            MovingAverageAggregator::new(store, pair.to_string(), params.rolling_window_minutes);
        let orders = OrderStateMachine::new(params.sell_threshold);

        Ok(Self {
            pair,
            exchange,
            aggregator,
            control,
            strategy: Box::new(MeanReversionStrategy::new(params)),
            orders,
            stats: SessionStats::new(),
            last_interval_minutes: ControlSignals::default().sampling_interval_minutes,
        })
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn orders(&self) -> &OrderStateMachine {
        &self.orders
    }

    pub fn exchange(&self) -> &ResilientExchange<C> {
        &self.exchange
    }

    /// Run cycles until the control source says stop
    pub async fn run(&mut self) {
        tracing::info!(
            "🚀 Trading {} with {} strategy",
            self.pair,
            self.strategy.name()
        );

        loop {
            let started = Instant::now();

            match self.run_cycle(Utc::now()).await {
                CycleOutcome::Shutdown => break,
                CycleOutcome::Continue {
                    interval_minutes, ..
                } => {
                    let interval = Duration::from_secs(interval_minutes.saturating_mul(60));
                    let sleep_for = interval.saturating_sub(started.elapsed());
                    tracing::debug!("Sleeping {}s until next cycle", sleep_for.as_secs());
                    tokio::time::sleep(sleep_for).await;
                }
            }
        }

        self.log_shutdown();
    }

    /// Warn about anything left open on the exchange
    pub fn log_shutdown(&self) {
        match self.orders.pending_order() {
            Some(order) => tracing::warn!(
                order_id = %order.id,
                "🛑 Shutting down with {} order still open ({} @ {})",
                order.kind,
                order.quantity,
                order.price
            ),
            None => tracing::info!("🛑 Trader shut down"),
        }
    }

    /// One decision cycle at `now`
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        // === 1. Control snapshot ===
        let signals = match self.control.snapshot() {
            Ok(signals) => signals,
            Err(e) => {
                tracing::warn!("Skipping cycle: {}", e);
                return self.continue_without_summary();
            }
        };
        self.last_interval_minutes = signals.sampling_interval_minutes;

        if !signals.trade_enabled {
            tracing::info!("⏸  Trading paused");
            return self.finish(&signals, None);
        }

        // === 2. Moving average ===
        let average = self
            .aggregator
            .compute(now, signals.sampling_interval_minutes)
            .await;
        if !average.sufficient {
            return self.finish(&signals, None);
        }
        tracing::info!("Moving average: {:.4} ({} points)", average.value, average.samples);

        // === 3. Pending order: fill or timeout ===
        let Ok(mut balances) = self.exchange.fetch_balance().await else {
            return self.finish(&signals, None);
        };

        if self.orders.pending_order().is_some() {
            if let Some(fill) = self.orders.check_fill(&balances, &self.pair) {
                self.record_fill(&fill);
            } else {
                self.orders.advance_wait(signals.sampling_interval_minutes);
                if self.orders.timed_out() {
                    let cancelled = self.cancel_pending().await;
                    // Cancellation changes reserved funds
                    if let Ok(fresh) = self.exchange.fetch_balance().await {
                        balances = fresh;
                    }
                    if let Some(order) = cancelled {
                        let coin_total = balances.get(&self.pair.base).total;
                        if self.orders.adopt_residual(&order, coin_total) {
                            tracing::info!(
                                "Holding {:.8} {} left by partly filled order {}",
                                coin_total,
                                self.pair.base,
                                order.id
                            );
                        }
                    }
                }
            }
        }

        let Ok(ticker) = self.exchange.fetch_ticker(&self.pair).await else {
            return self.finish(&signals, None);
        };

        // === 4. Decide and place ===
        if self.orders.pending_order().is_none() {
            let signal = self.strategy.decide(&CycleContext {
                average: &average,
                ticker,
                coin: balances.get(&self.pair.base),
                quote: balances.get(&self.pair.quote),
                position: self.orders.position(),
                has_pending_order: false,
            });

            if signal != Signal::Hold {
                self.place(&signal, now).await;

                // === 5. Same-cycle fill check ===
                if let Ok(fresh) = self.exchange.fetch_balance().await {
                    if let Some(fill) = self.orders.check_fill(&fresh, &self.pair) {
                        self.record_fill(&fill);
                    }
                    balances = fresh;
                }
            }
        }

        let summary = self.summarize(&balances, ticker.mid(), &signals);
        summary.emit();

        // === 6. Sleep or stop ===
        self.finish(&signals, Some(summary))
    }

    /// The stop flag is honoured only after the cycle has run
    fn finish(&self, signals: &ControlSignals, summary: Option<SessionSummary>) -> CycleOutcome {
        if !signals.script_running {
            tracing::info!("Trader script flag is off, stopping");
            return CycleOutcome::Shutdown;
        }

        CycleOutcome::Continue {
            interval_minutes: signals.sampling_interval_minutes,
            summary,
        }
    }

    fn continue_without_summary(&self) -> CycleOutcome {
        CycleOutcome::Continue {
            interval_minutes: self.last_interval_minutes,
            summary: None,
        }
    }

    async fn place(&mut self, signal: &Signal, now: DateTime<Utc>) {
        let (quantity, price) = match *signal {
            Signal::PlaceBuy { quantity, price }
            | Signal::PlaceTakeProfit { quantity, price }
            | Signal::PlaceStopLoss { quantity, price } => (quantity, price),
            Signal::Hold => return,
        };
        let Some(kind) = signal.order_kind() else {
            return;
        };

        tracing::info!(
            "Placing limit {} order: {} {} @ ${}",
            kind,
            quantity,
            self.pair.base,
            price
        );

        let result = if kind.is_sell() {
            self.exchange
                .create_limit_sell_order(&self.pair, quantity, price)
                .await
        } else {
            self.exchange
                .create_limit_buy_order(&self.pair, quantity, price)
                .await
        };

        let Ok(ack) = result else {
            // Already logged by the wrapper; nothing recorded locally
            return;
        };

        let order_id = ack.id.clone();
        match self.orders.on_order_placed(signal, ack, now) {
            Ok(()) => tracing::info!(order_id = %order_id, "Placed limit {} order", kind),
            Err(e) => tracing::error!(order_id = %order_id, "Order placed but not tracked: {}", e),
        }
    }

    async fn cancel_pending(&mut self) -> Option<PendingOrder> {
        let order = self.orders.pending_order().cloned()?;

        if self.exchange.cancel_order(&order.id, &self.pair).await.is_err() {
            // Retried on the next cycle since the wait stays past the limit
            return None;
        }

        match self.orders.on_cancelled() {
            Ok(cancelled) => {
                tracing::info!(
                    order_id = %cancelled.id,
                    "Cancelled {} order after {} minutes",
                    cancelled.kind,
                    cancelled.wait_elapsed_minutes
                );
                Some(cancelled)
            }
            Err(e) => {
                tracing::error!("Cancel confirmed but state not updated: {}", e);
                None
            }
        }
    }

    fn record_fill(&mut self, fill: &FillEvent) {
        self.stats.record_fill(fill.kind);
        tracing::info!(
            order_id = %fill.order_id,
            "✅ Order filled: {} {} @ {}",
            fill.kind,
            fill.quantity,
            fill.price
        );
    }

    fn summarize(
        &mut self,
        balances: &AccountBalances,
        market_price: f64,
        signals: &ControlSignals,
    ) -> SessionSummary {
        let snapshot = PortfolioSnapshot {
            coin: self.pair.base.clone(),
            fiat_total: balances.get(&self.pair.quote).total,
            coin_total: balances.get(&self.pair.base).total,
            market_price,
            entry_price: self.orders.position().map(|p| p.entry_price),
            total_invested: signals.total_invested,
        };
        self.stats.summarize(&snapshot)
    }
}
