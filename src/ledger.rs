//! Position accounting: per-side statistics and the shared portfolio ledger
//!
//! All mutation happens from the control loop on trade open/close; the
//! dashboard only ever sees published snapshots.

use serde::{Deserialize, Serialize};

/// Running aggregates for one side, updated on every trade close plus the
/// live per-tick fields the snapshot builder maintains.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SideStats {
    // Live per-tick fields
    pub current_price: f64,
    pub entry_price: f64,
    pub smma: f64,
    pub window: usize,
    pub range_percent: f64,
    pub high: f64,
    pub low: f64,
    pub unrealized_pnl: f64,
    pub max_margin_used: f64,

    // Trade aggregates
    pub total_trades: u32,
    pub win_trades: u32,
    pub lose_trades: u32,
    pub max_profit: f64,
    pub max_loss: f64,
    pub largest_winning_trade: f64,
    pub largest_losing_trade: f64,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub net_profit: f64,
    pub realized_profit: f64,
    pub gross_win: f64,
    pub gross_loss: f64,
}

impl SideStats {
    /// Fold one realized P&L into the aggregates
    pub fn record_close(&mut self, pnl: f64) {
        self.total_trades += 1;
        if pnl > 0.0 {
            self.win_trades += 1;
            self.gross_win += pnl;
            self.max_profit = self.max_profit.max(pnl);
            self.largest_winning_trade = self.largest_winning_trade.max(pnl);
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
        } else {
            self.lose_trades += 1;
            self.gross_loss += pnl.abs();
            self.max_loss = self.max_loss.min(pnl);
            self.largest_losing_trade = self.largest_losing_trade.min(pnl);
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
        }
        self.net_profit += pnl;
        self.realized_profit += pnl;
        self.unrealized_pnl = 0.0;
        self.entry_price = 0.0;
    }

    pub fn avg_win(&self) -> f64 {
        if self.win_trades > 0 {
            self.gross_win / self.win_trades as f64
        } else {
            0.0
        }
    }

    pub fn avg_loss(&self) -> f64 {
        if self.lose_trades > 0 {
            -(self.gross_loss / self.lose_trades as f64)
        } else {
            0.0
        }
    }

    /// Gross win over gross loss; 0 when no losses yet
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss > 0.0 {
            self.gross_win / self.gross_loss
        } else {
            0.0
        }
    }

    pub fn win_ratio(&self) -> f64 {
        if self.total_trades > 0 {
            self.win_trades as f64 / self.total_trades as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// Shared margin and P&L view across both sides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioLedger {
    pub available_balance: f64,
    pub used_margin: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

impl PortfolioLedger {
    pub fn new(capital: f64) -> Self {
        Self {
            available_balance: capital,
            used_margin: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
        }
    }

    /// Margin reserved on open = entry price x quantity
    pub fn reserve_margin(&mut self, amount: f64) {
        self.used_margin += amount;
    }

    /// Release exactly what the matching open reserved
    pub fn release_margin(&mut self, amount: f64) {
        self.used_margin -= amount;
    }

    pub fn realize(&mut self, pnl: f64) {
        self.realized_pnl += pnl;
    }

    pub fn free_margin(&self) -> f64 {
        self.available_balance - self.used_margin
    }

    pub fn total_pnl(&self) -> f64 {
        self.realized_pnl + self.unrealized_pnl
    }

    pub fn roi(&self, capital: f64) -> f64 {
        if capital > 0.0 {
            self.total_pnl() / capital * 100.0
        } else {
            0.0
        }
    }

    pub fn margin_utilization(&self) -> f64 {
        if self.available_balance > 0.0 {
            self.used_margin / self.available_balance * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaks_and_extremes() {
        let mut s = SideStats::default();
        s.record_close(100.0);
        s.record_close(250.0);
        assert_eq!(s.consecutive_wins, 2);
        assert_eq!(s.largest_winning_trade, 250.0);

        s.record_close(-80.0);
        assert_eq!(s.consecutive_wins, 0);
        assert_eq!(s.consecutive_losses, 1);
        assert_eq!(s.largest_losing_trade, -80.0);
        assert_eq!(s.max_loss, -80.0);
        assert_eq!(s.total_trades, 3);
    }

    #[test]
    fn test_profit_factor_zero_without_losses() {
        let mut s = SideStats::default();
        s.record_close(50.0);
        assert_eq!(s.profit_factor(), 0.0);

        s.record_close(-25.0);
        assert!((s.profit_factor() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_averages() {
        let mut s = SideStats::default();
        s.record_close(100.0);
        s.record_close(200.0);
        s.record_close(-50.0);
        assert!((s.avg_win() - 150.0).abs() < 1e-9);
        assert!((s.avg_loss() + 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_realized_matches_trade_sum() {
        let mut s = SideStats::default();
        let pnls = [120.0, -45.0, 10.0, -5.5, 0.0];
        for pnl in pnls {
            s.record_close(pnl);
        }
        let sum: f64 = pnls.iter().sum();
        assert!((s.realized_profit - sum).abs() < 1e-9);
        // Zero-P&L trades count as losses, matching the win/lose split
        assert_eq!(s.win_trades + s.lose_trades, s.total_trades);
    }

    #[test]
    fn test_margin_reserve_release_round_trip() {
        let mut ledger = PortfolioLedger::new(100_000.0);
        ledger.reserve_margin(150.0 * 20.0);
        assert_eq!(ledger.free_margin(), 97_000.0);
        assert!((ledger.margin_utilization() - 3.0).abs() < 1e-9);

        ledger.release_margin(150.0 * 20.0);
        ledger.realize(200.0);
        assert_eq!(ledger.used_margin, 0.0);
        assert_eq!(ledger.total_pnl(), 200.0);
        assert!((ledger.roi(100_000.0) - 0.2).abs() < 1e-9);
    }
}
