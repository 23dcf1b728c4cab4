use std::fmt;

use crate::models::OrderKind;

/// Outcome counters for the lifetime of the process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub buys: u32,
    pub gains: u32,
    pub losses: u32,
    /// Portfolio value after every summarized cycle
    pub portfolio_history: Vec<f64>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fill(&mut self, kind: OrderKind) {
        match kind {
            OrderKind::Buy => self.buys += 1,
            OrderKind::TakeProfit => self.gains += 1,
            OrderKind::StopLoss => self.losses += 1,
        }
    }

    pub fn trades(&self) -> u32 {
        self.buys + self.gains + self.losses
    }

    /// Share of closed positions that were profitable; `None` before the first exit
    pub fn hit_rate(&self) -> Option<f64> {
        let closed = self.gains + self.losses;
        if closed == 0 {
            None
        } else {
            Some(self.gains as f64 / closed as f64)
        }
    }

    /// Build the end-of-cycle summary and append its portfolio value to the history
    pub fn summarize(&mut self, snapshot: &PortfolioSnapshot) -> SessionSummary {
        let portfolio_value = snapshot.fiat_total + snapshot.coin_total * snapshot.market_price;

        let position_change_pct = snapshot
            .entry_price
            .filter(|entry| *entry > 0.0)
            .map(|entry| round_to((snapshot.market_price / entry - 1.0) * 100.0, 3));

        let portfolio_change_pct = (snapshot.total_invested > 0.0)
            .then(|| round_to((portfolio_value / snapshot.total_invested - 1.0) * 100.0, 2));

        self.portfolio_history.push(portfolio_value);

        SessionSummary {
            coin: snapshot.coin.clone(),
            trades: self.trades(),
            hit_rate: self.hit_rate(),
            fiat: snapshot.fiat_total,
            position: snapshot.coin_total,
            entry_price: snapshot.entry_price,
            position_change_pct,
            portfolio_value,
            portfolio_change_pct,
        }
    }
}

/// Balances and prices the summary is computed from
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub coin: String,
    pub fiat_total: f64,
    pub coin_total: f64,
    pub market_price: f64,
    pub entry_price: Option<f64>,
    pub total_invested: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub coin: String,
    pub trades: u32,
    pub hit_rate: Option<f64>,
    pub fiat: f64,
    pub position: f64,
    pub entry_price: Option<f64>,
    pub position_change_pct: Option<f64>,
    pub portfolio_value: f64,
    pub portfolio_change_pct: Option<f64>,
}

impl SessionSummary {
    /// Write the summary to the log and the console
    pub fn emit(&self) {
        tracing::info!(
            trades = self.trades,
            portfolio_value = self.portfolio_value,
            "📊 Session summary"
        );
        for line in self.to_string().lines() {
            tracing::info!("{}", line);
        }
        println!("{}", self);
        println!();
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Trades: {}", self.trades)?;
        match self.hit_rate {
            Some(rate) => writeln!(f, "Hit Rate: {:.2}", rate)?,
            None => writeln!(f, "Hit Rate: N/A")?,
        }
        writeln!(f, "Fiat: ${:.2}", self.fiat)?;
        writeln!(f, "Position: {:.8} {}", self.position, self.coin)?;
        if let Some(entry) = self.entry_price {
            writeln!(f, "Entry Price: ${:.2}", entry)?;
        }
        if let Some(change) = self.position_change_pct {
            writeln!(f, "Position Change: {}%", change)?;
        }
        match self.portfolio_change_pct {
            Some(change) => write!(f, "Portfolio Worth: ${:.2} ({}%)", self.portfolio_value, change),
            None => write!(f, "Portfolio Worth: ${:.2}", self.portfolio_value),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entry: Option<f64>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            coin: "BTC".to_string(),
            fiat_total: 75.0,
            coin_total: 0.25,
            market_price: 110.0,
            entry_price: entry,
            total_invested: 100.0,
        }
    }

    #[test]
    fn test_hit_rate_not_available_before_first_exit() {
        let mut stats = SessionStats::new();
        stats.record_fill(OrderKind::Buy);
        assert_eq!(stats.trades(), 1);
        assert_eq!(stats.hit_rate(), None);

        stats.record_fill(OrderKind::TakeProfit);
        stats.record_fill(OrderKind::Buy);
        stats.record_fill(OrderKind::StopLoss);
        assert_eq!(stats.trades(), 4);
        assert_eq!(stats.hit_rate(), Some(0.5));
    }

    #[test]
    fn test_summary_values() {
        let mut stats = SessionStats::new();
        let summary = stats.summarize(&snapshot(Some(100.0)));

        // 75 + 0.25 * 110
        assert_eq!(summary.portfolio_value, 102.5);
        assert_eq!(summary.portfolio_change_pct, Some(2.5));
        assert_eq!(summary.position_change_pct, Some(10.0));
        assert_eq!(stats.portfolio_history, vec![102.5]);

        let text = summary.to_string();
        assert!(text.contains("Hit Rate: N/A"));
        assert!(text.contains("Entry Price: $100.00"));
        assert!(text.contains("Portfolio Worth: $102.50 (2.5%)"));
    }

    #[test]
    fn test_summary_without_position() {
        let mut stats = SessionStats::new();
        let summary = stats.summarize(&snapshot(None));

        assert_eq!(summary.position_change_pct, None);
        assert!(!summary.to_string().contains("Entry Price"));
    }

    #[test]
    fn test_history_grows_per_cycle() {
        let mut stats = SessionStats::new();
        stats.summarize(&snapshot(None));
        stats.summarize(&snapshot(None));
        assert_eq!(stats.portfolio_history.len(), 2);
    }
}
