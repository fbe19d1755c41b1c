//! Pair rebalance: swap a diverged CE/PE pair for fresh strikes
//!
//! When one leg's premium runs far away from the other's, both legs are
//! squared off, replacement instruments are picked near the target
//! premium, and price history is rescaled so the trend survives the
//! instrument change instead of restarting from empty.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::engine::TradingEngine;
use crate::history::{LIVE_CAPACITY, REBALANCE_CAPACITY};
use crate::indicators::range_stats;
use crate::types::{Instrument, OptionSide, Severity};

/// Floor applied to every rescaled price and entry price
pub const RESCALE_FLOOR: f64 = 0.1;

/// Phase of the rebalance workflow, published with every status snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceState {
    Idle,
    SquaringOff,
    Updating,
    Resuming,
}

impl RebalanceState {
    pub fn is_idle(self) -> bool {
        matches!(self, RebalanceState::Idle)
    }
}

/// Divergence between the legs as a percent of their average premium
pub fn divergence_percent(ce_price: f64, pe_price: f64) -> f64 {
    let avg = (ce_price + pe_price) / 2.0;
    if avg <= 0.0 {
        return 0.0;
    }
    (ce_price - pe_price).abs() / avg * 100.0
}

/// Scale a price series onto a replacement instrument's premium level.
/// `adjustment_percent` is the old-to-new premium change; every sample is
/// multiplied by the same factor and floored so the series never goes
/// non-positive.
pub fn rescale_prices(prices: &[f64], adjustment_percent: f64) -> Vec<f64> {
    let factor = 1.0 + adjustment_percent / 100.0;
    prices
        .iter()
        .map(|p| (p * factor).max(RESCALE_FLOOR))
        .collect()
}

/// Pick the quoted candidate whose premium is closest to `target_ltp`
pub fn nearest_to_target(quoted: &[(Instrument, f64)], target_ltp: f64) -> Option<(Instrument, f64)> {
    quoted
        .iter()
        .min_by(|a, b| {
            (a.1 - target_ltp)
                .abs()
                .total_cmp(&(b.1 - target_ltp).abs())
        })
        .cloned()
}

impl TradingEngine {
    /// Divergence check gate. Rate-limited, skipped while both legs hold
    /// positions (configurable), and a no-op below the threshold.
    pub(crate) async fn maybe_rebalance(&mut self) -> Result<()> {
        if !self.config.rebalance.enabled || !self.rebalance_state.is_idle() {
            return Ok(());
        }

        let now = tokio::time::Instant::now();
        let interval = Duration::from_secs(self.config.rebalance.min_check_interval_secs);
        if let Some(last) = self.last_rebalance_check {
            if now.duration_since(last) < interval {
                return Ok(());
            }
        }
        self.last_rebalance_check = Some(now);

        if self.config.rebalance.skip_when_both_open
            && self.ctx(OptionSide::Ce).position.is_some()
            && self.ctx(OptionSide::Pe).position.is_some()
        {
            debug!("Both legs open, skipping divergence check");
            return Ok(());
        }

        let exchange = self.config.trading.exchange;
        let ce_code = self.config.trading.ce_code;
        let pe_code = self.config.trading.pe_code;
        if ce_code == 0 || pe_code == 0 {
            return Ok(());
        }
        let ce_price = match self.feed.last_traded_price(ce_code, exchange).await? {
            Some(p) if p > 0.0 => p,
            _ => return Ok(()),
        };
        let pe_price = match self.feed.last_traded_price(pe_code, exchange).await? {
            Some(p) if p > 0.0 => p,
            _ => return Ok(()),
        };

        let divergence = divergence_percent(ce_price, pe_price);
        if divergence <= self.config.rebalance.price_difference_threshold {
            return Ok(());
        }

        info!(
            ce_price,
            pe_price,
            divergence = format!("{divergence:.1}%"),
            "Pair diverged, rebalancing"
        );
        self.alerts.raise(
            "rebalance",
            "Pair rebalance started",
            &format!(
                "CE {ce_price:.2} vs PE {pe_price:.2} diverged {divergence:.1}%"
            ),
            Severity::Warning,
        );

        self.rebalance_state = RebalanceState::SquaringOff;
        self.publish();
        let started = tokio::time::Instant::now();

        let result = self.rebalance_pair(ce_price, pe_price).await;

        // Hold the workflow in Resuming for the minimum wall-clock window
        // so downstream consumers reliably observe the pause.
        self.rebalance_state = RebalanceState::Resuming;
        self.publish();
        let floor = Duration::from_secs(self.config.rebalance.cooldown_floor_secs);
        let elapsed = started.elapsed();
        if elapsed < floor {
            tokio::time::sleep(floor - elapsed).await;
        }

        // Back to Idle on every path, including errors
        self.rebalance_state = RebalanceState::Idle;
        self.publish();
        result
    }

    async fn rebalance_pair(&mut self, ce_price: f64, pe_price: f64) -> Result<()> {
        let legs = [(OptionSide::Ce, ce_price), (OptionSide::Pe, pe_price)];

        // Best-effort square-off; a rejected exit leaves the position in
        // place and the entry price gets rescaled along with the history.
        for (side, price) in legs {
            if self.ctx(side).position.is_some() {
                if let Err(e) = self.close_position(side, price, false).await {
                    warn!(%side, "Square-off failed, carrying position through: {e}");
                }
            }
        }

        self.rebalance_state = RebalanceState::Updating;
        for (side, old_price) in legs {
            match self.select_replacement(side).await {
                Ok(Some((instrument, new_price))) => {
                    let adjustment = (new_price - old_price) / old_price * 100.0;
                    info!(
                        %side,
                        code = instrument.code,
                        name = %instrument.name,
                        new_price,
                        adjustment = format!("{adjustment:+.1}%"),
                        "Switching instrument"
                    );
                    self.apply_replacement(side, instrument, adjustment);
                }
                Ok(None) => {
                    warn!(%side, "No quoted replacement candidate, keeping instrument");
                }
                Err(e) => {
                    warn!(%side, "Candidate scan failed, keeping instrument: {e}");
                }
            }
        }

        self.alerts.raise(
            "rebalance",
            "Pair rebalance finished",
            &format!(
                "Now tracking CE {} / PE {}",
                self.config.trading.ce_name, self.config.trading.pe_name
            ),
            Severity::Success,
        );
        Ok(())
    }

    /// Quote every candidate for this side and keep the one nearest the
    /// target premium. The per-candidate delay keeps the feed vendor happy.
    async fn select_replacement(&self, side: OptionSide) -> Result<Option<(Instrument, f64)>> {
        let current = self.config.trading.instrument_code(side);
        let exchange = self.config.trading.exchange;
        let delay = Duration::from_millis(self.config.rebalance.candidate_delay_ms);

        let mut quoted = Vec::new();
        for candidate in self.directory.candidates(side) {
            if candidate.code == current {
                continue;
            }
            match self.feed.last_traded_price(candidate.code, exchange).await {
                Ok(Some(p)) if p > 0.0 => quoted.push((candidate, p)),
                Ok(_) => debug!(code = candidate.code, "Candidate has no quote"),
                Err(e) => debug!(code = candidate.code, "Candidate quote failed: {e}"),
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(nearest_to_target(&quoted, self.config.rebalance.target_ltp))
    }

    /// Rescale the side's state onto the replacement instrument
    fn apply_replacement(&mut self, side: OptionSide, instrument: Instrument, adjustment: f64) {
        let factor = 1.0 + adjustment / 100.0;
        let ctx = self.ctx_mut(side);

        let rescaled = rescale_prices(&ctx.history.snapshot(), adjustment);
        ctx.history.resize(REBALANCE_CAPACITY);
        ctx.history.replace(rescaled);
        ctx.history.resize(LIVE_CAPACITY);

        // Live stats track the rescaled series, not the old premium level
        let (high, low, range_percent) = range_stats(&ctx.history.last_n(ctx.window));
        ctx.stats.high = high;
        ctx.stats.low = low;
        ctx.stats.range_percent = range_percent;

        if let Some(pos) = ctx.position.as_mut() {
            pos.entry_price = (pos.entry_price * factor).max(RESCALE_FLOOR);
            ctx.stats.entry_price = pos.entry_price;
        }

        self.config
            .trading
            .set_instrument(side, instrument.code, instrument.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertManager;
    use crate::broker::{BrokerError, InstrumentDirectory, MarketFeed};
    use crate::engine::tests::{test_config, RecordingGateway};
    use crate::engine::TradingEngine;
    use crate::types::Exchange;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct MapFeed {
        quotes: HashMap<u32, f64>,
    }

    #[async_trait]
    impl MarketFeed for MapFeed {
        async fn last_traded_price(
            &self,
            instrument_code: u32,
            _exchange: Exchange,
        ) -> Result<Option<f64>, BrokerError> {
            Ok(self.quotes.get(&instrument_code).copied())
        }
    }

    struct FixedDirectory {
        ce: Vec<Instrument>,
        pe: Vec<Instrument>,
    }

    impl InstrumentDirectory for FixedDirectory {
        fn name_of(&self, instrument_code: u32) -> Option<String> {
            self.ce
                .iter()
                .chain(self.pe.iter())
                .find(|i| i.code == instrument_code)
                .map(|i| i.name.clone())
        }
        fn candidates(&self, side: OptionSide) -> Vec<Instrument> {
            match side {
                OptionSide::Ce => self.ce.clone(),
                OptionSide::Pe => self.pe.clone(),
            }
        }
    }

    fn instrument(code: u32, name: &str, side: OptionSide) -> Instrument {
        Instrument {
            code,
            name: name.to_string(),
            side,
        }
    }

    fn rebalance_engine(quotes: HashMap<u32, f64>) -> TradingEngine {
        let mut config = test_config();
        config.rebalance.enabled = true;
        config.rebalance.cooldown_floor_secs = 0;
        config.rebalance.candidate_delay_ms = 0;
        let directory = FixedDirectory {
            ce: vec![
                instrument(301, "NEW CE 210", OptionSide::Ce),
                instrument(302, "NEW CE 150", OptionSide::Ce),
            ],
            pe: vec![instrument(401, "NEW PE 190", OptionSide::Pe)],
        };
        let (engine, _rx) = TradingEngine::new(
            config,
            Arc::new(MapFeed { quotes }),
            Arc::new(RecordingGateway::default()),
            Arc::new(directory),
            Arc::new(AlertManager::new()),
            None,
        );
        engine
    }

    #[test]
    fn test_divergence_percent() {
        // |300-100| / 200 * 100
        assert!((divergence_percent(300.0, 100.0) - 100.0).abs() < 1e-9);
        assert_eq!(divergence_percent(100.0, 100.0), 0.0);
        assert_eq!(divergence_percent(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_rescale_floor() {
        let out = rescale_prices(&[100.0, 0.05, 2.0], -99.9);
        assert!(out.iter().all(|p| *p >= RESCALE_FLOOR));
        assert!((out[0] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_rescale_round_trip() {
        // +25% then its inverse restores the series (away from the floor)
        let original = vec![180.0, 200.0, 220.0];
        let up = rescale_prices(&original, 25.0);
        let factor_back = (1.0 / 1.25 - 1.0) * 100.0;
        let back = rescale_prices(&up, factor_back);
        for (a, b) in original.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_nearest_to_target() {
        let quoted = vec![
            (instrument(1, "A", OptionSide::Ce), 150.0),
            (instrument(2, "B", OptionSide::Ce), 210.0),
            (instrument(3, "C", OptionSide::Ce), 260.0),
        ];
        let picked = nearest_to_target(&quoted, 200.0).unwrap();
        assert_eq!(picked.0.code, 2);
        assert!(nearest_to_target(&[], 200.0).is_none());
    }

    #[tokio::test]
    async fn test_diverged_pair_swaps_both_legs() {
        let quotes = HashMap::from([
            (111, 300.0), // current CE
            (222, 100.0), // current PE, 100% divergence
            (301, 210.0),
            (302, 150.0),
            (401, 190.0),
        ]);
        let mut engine = rebalance_engine(quotes);
        // Seed CE history at the old premium level
        for _ in 0..10 {
            engine.ctx_mut(OptionSide::Ce).history.append(300.0);
        }

        engine.maybe_rebalance().await.unwrap();

        assert_eq!(engine.config.trading.ce_code, 301);
        assert_eq!(engine.config.trading.ce_name, "NEW CE 210");
        assert_eq!(engine.config.trading.pe_code, 401);
        assert!(engine.rebalance_state.is_idle());

        // History rescaled from 300 onto the 210 premium level
        let rescaled = engine.ctx(OptionSide::Ce).history.snapshot();
        assert!((rescaled[0] - 210.0).abs() < 1e-6);
        assert_eq!(engine.ctx(OptionSide::Ce).history.capacity(), LIVE_CAPACITY);
    }

    #[tokio::test]
    async fn test_converged_pair_is_untouched() {
        let quotes = HashMap::from([(111, 200.0), (222, 190.0)]);
        let mut engine = rebalance_engine(quotes);
        engine.maybe_rebalance().await.unwrap();
        assert_eq!(engine.config.trading.ce_code, 111);
        assert_eq!(engine.config.trading.pe_code, 222);
    }

    #[tokio::test]
    async fn test_check_is_rate_limited() {
        let quotes = HashMap::from([
            (111, 300.0),
            (222, 100.0),
            (301, 210.0),
            (302, 150.0),
            (401, 190.0),
        ]);
        let mut engine = rebalance_engine(quotes);
        engine.maybe_rebalance().await.unwrap();
        assert_eq!(engine.config.trading.ce_code, 301);

        // Second check inside the interval is a no-op even though the new
        // pair would also screen as diverged (301 has no quote -> skip).
        engine.config.trading.set_instrument(OptionSide::Ce, 111, "TEST CE".into());
        engine.config.trading.set_instrument(OptionSide::Pe, 222, "TEST PE".into());
        engine.maybe_rebalance().await.unwrap();
        assert_eq!(engine.config.trading.ce_code, 111);
    }

    #[tokio::test]
    async fn test_both_legs_open_skips_check() {
        let quotes = HashMap::from([(111, 300.0), (222, 100.0)]);
        let mut engine = rebalance_engine(quotes);
        for side in OptionSide::BOTH {
            engine.ctx_mut(side).position = Some(crate::types::Position {
                entry_price: 100.0,
                quantity: 20,
                opened_at: chrono::Utc::now(),
            });
        }
        engine.maybe_rebalance().await.unwrap();
        assert_eq!(engine.config.trading.ce_code, 111);
        assert_eq!(engine.config.trading.pe_code, 222);
    }
}
