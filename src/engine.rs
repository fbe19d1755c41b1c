//! Control loop: owns all mutable trading state and drives both legs
//!
//! One tokio task runs the loop; the dashboard and anything else that
//! wants to observe the engine reads the latest published snapshot from
//! a watch channel instead of taking locks on live state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDate, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::AlertManager;
use crate::broker::{InstrumentDirectory, MarketFeed, OrderGateway};
use crate::config::AppConfig;
use crate::history::{PriceHistory, LIVE_CAPACITY};
use crate::indicators::{adaptive_window, range_stats, smma, DEFAULT_WINDOW};
use crate::ledger::{PortfolioLedger, SideStats};
use crate::persistence::CsvPersistence;
use crate::rebalance::RebalanceState;
use crate::strategy::{evaluate, settle_stop_flag, Action};
use crate::types::{
    MarketSnapshot, OptionSide, OrderRecord, OrderSide, Position, Severity, StopFlag, TradeRecord,
};

/// Everything one leg needs to make decisions tick to tick
#[derive(Debug)]
pub struct StrategyContext {
    pub side: OptionSide,
    pub history: PriceHistory,
    /// Last computed adaptive window, also the fallback when history is empty
    pub window: usize,
    pub stop_flag: StopFlag,
    pub position: Option<Position>,
    pub stats: SideStats,
    volatility_alerted: bool,
    drawdown_alerted: bool,
    target_alerted: bool,
}

impl StrategyContext {
    fn new(side: OptionSide) -> Self {
        Self {
            side,
            history: PriceHistory::new(LIVE_CAPACITY),
            window: DEFAULT_WINDOW,
            stop_flag: StopFlag::Clear,
            position: None,
            stats: SideStats::default(),
            volatility_alerted: false,
            drawdown_alerted: false,
            target_alerted: false,
        }
    }
}

/// Per-side slice of a published snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct SideStatus {
    pub instrument_code: u32,
    pub instrument_name: String,
    pub stats: SideStats,
    pub position: Option<Position>,
    pub stop_armed: bool,
}

/// Read-only view of engine state, published once per loop iteration.
/// Readers may observe a snapshot one tick stale; that is fine.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub timestamp: chrono::DateTime<Utc>,
    pub paused: bool,
    pub rebalance_state: RebalanceState,
    pub rebalancing: bool,
    pub trades_today: u32,
    pub total_trades: u32,
    pub capital: f64,
    pub ledger: PortfolioLedger,
    pub free_margin: f64,
    pub total_pnl: f64,
    pub roi: f64,
    pub margin_utilization: f64,
    pub ce: SideStatus,
    pub pe: SideStatus,
}

pub struct TradingEngine {
    pub(crate) config: AppConfig,
    pub(crate) feed: Arc<dyn MarketFeed>,
    pub(crate) orders: Arc<dyn OrderGateway>,
    pub(crate) directory: Arc<dyn InstrumentDirectory>,
    pub(crate) alerts: Arc<AlertManager>,
    persistence: Option<CsvPersistence>,
    pub(crate) ledger: PortfolioLedger,
    ce: StrategyContext,
    pe: StrategyContext,
    trades_today: u32,
    trade_day: NaiveDate,
    limit_alerted: bool,
    paused: bool,
    pub(crate) rebalance_state: RebalanceState,
    pub(crate) last_rebalance_check: Option<tokio::time::Instant>,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl TradingEngine {
    pub fn new(
        config: AppConfig,
        feed: Arc<dyn MarketFeed>,
        orders: Arc<dyn OrderGateway>,
        directory: Arc<dyn InstrumentDirectory>,
        alerts: Arc<AlertManager>,
        persistence: Option<CsvPersistence>,
    ) -> (Self, watch::Receiver<StatusSnapshot>) {
        let ledger = PortfolioLedger::new(config.trading.capital);
        let ce = StrategyContext::new(OptionSide::Ce);
        let pe = StrategyContext::new(OptionSide::Pe);
        let initial = Self::snapshot_of(&config, &ledger, &ce, &pe, false, RebalanceState::Idle, 0);
        let (status_tx, status_rx) = watch::channel(initial);
        let engine = Self {
            config,
            feed,
            orders,
            directory,
            alerts,
            persistence,
            ledger,
            ce,
            pe,
            trades_today: 0,
            trade_day: Local::now().date_naive(),
            limit_alerted: false,
            paused: false,
            rebalance_state: RebalanceState::Idle,
            last_rebalance_check: None,
            status_tx,
        };
        (engine, status_rx)
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            info!(paused, "Trading pause flag changed");
            self.paused = paused;
        }
    }

    pub(crate) fn ctx(&self, side: OptionSide) -> &StrategyContext {
        match side {
            OptionSide::Ce => &self.ce,
            OptionSide::Pe => &self.pe,
        }
    }

    pub(crate) fn ctx_mut(&mut self, side: OptionSide) -> &mut StrategyContext {
        match side {
            OptionSide::Ce => &mut self.ce,
            OptionSide::Pe => &mut self.pe,
        }
    }

    /// Contracts for the next entry: the configured fixed quantity, or
    /// half the capital at the current price rounded to whole lots.
    pub(crate) fn resolve_quantity(&self, price: f64) -> u32 {
        if self.config.trading.quantity > 0 {
            return self.config.trading.quantity;
        }
        let lot = self.config.trading.exchange.lot_size();
        let lots = ((self.config.trading.capital * 0.5) / price / lot as f64).round() as u32;
        lots.max(1) * lot
    }

    fn within_trading_hours(&self) -> bool {
        match self.config.trading.trading_hours() {
            Ok((start, end)) => {
                let now = Local::now().time();
                now >= start && now <= end
            }
            Err(e) => {
                warn!("Trading hours misconfigured, blocking entries: {e:#}");
                false
            }
        }
    }

    fn reset_daily_counter(&mut self) {
        let today = Local::now().date_naive();
        if today != self.trade_day {
            info!(trades = self.trades_today, "New session day, resetting trade counter");
            self.trade_day = today;
            self.trades_today = 0;
            self.limit_alerted = false;
        }
    }

    /// One full pass for one leg: fetch, derive, alert, decide, execute.
    pub async fn tick_side(&mut self, side: OptionSide) -> Result<()> {
        let code = self.config.trading.instrument_code(side);
        let exchange = self.config.trading.exchange;
        if code == 0 {
            debug!(%side, "No instrument configured, skipping");
            return Ok(());
        }

        let price = match self.feed.last_traded_price(code, exchange).await {
            Ok(Some(p)) if p > 0.0 => p,
            Ok(_) => {
                debug!(%side, code, "No usable quote this tick");
                return Ok(());
            }
            Err(e) => {
                warn!(%side, code, "Quote fetch failed: {e}");
                return Ok(());
            }
        };

        let snapshot = self.build_snapshot(side, price);
        self.refresh_live_stats(side, &snapshot);
        self.check_alerts(side, &snapshot);

        let trend = match snapshot.trend {
            Some(t) => t,
            // SMMA still warming up, nothing to act on
            None => return Ok(()),
        };

        if !self.within_trading_hours() {
            debug!(%side, "Outside trading hours, no-op tick");
            return Ok(());
        }

        // At the limit the whole tick freezes, exits included
        if self.trades_today >= self.config.trading.max_trades_per_day {
            if !self.limit_alerted {
                self.limit_alerted = true;
                warn!(trades = self.trades_today, "Daily trade limit reached");
                self.alerts.raise(
                    "limit",
                    "Daily trade limit reached",
                    &format!(
                        "{} of {} trades used, trading frozen for the day",
                        self.trades_today, self.config.trading.max_trades_per_day
                    ),
                    Severity::Warning,
                );
            }
            return Ok(());
        }

        {
            let ctx = self.ctx_mut(side);
            ctx.stop_flag = settle_stop_flag(ctx.stop_flag, price, trend);
        }

        let ctx = self.ctx(side);
        let action = evaluate(&snapshot, trend, ctx.position.as_ref(), ctx.stop_flag);
        match action {
            Action::Hold => Ok(()),
            Action::Open => self.open_position(side, price).await,
            Action::Close { arm_stop } => self.close_position(side, price, arm_stop).await,
        }
    }

    /// Append the price and derive the per-tick market view
    fn build_snapshot(&mut self, side: OptionSide, price: f64) -> MarketSnapshot {
        let main_time_period = self.config.trading.main_time_period;
        let ctx = self.ctx_mut(side);
        ctx.history.append(price);

        let estimate = adaptive_window(&ctx.history, main_time_period, ctx.window);
        ctx.window = estimate.window;

        let trend = smma(&ctx.history.snapshot(), estimate.window);
        let recent = ctx.history.last_n(estimate.window);
        let (high, low, _) = range_stats(&recent);

        MarketSnapshot {
            price,
            trend,
            window: estimate.window,
            high,
            low,
            range: high - low,
            range_percent: estimate.range_percent,
        }
    }

    fn refresh_live_stats(&mut self, side: OptionSide, snapshot: &MarketSnapshot) {
        let ctx = self.ctx_mut(side);
        let stats = &mut ctx.stats;
        stats.current_price = snapshot.price;
        stats.smma = snapshot.trend.unwrap_or(0.0);
        stats.window = snapshot.window;
        stats.range_percent = snapshot.range_percent;
        stats.high = snapshot.high;
        stats.low = snapshot.low;
        stats.unrealized_pnl = match &ctx.position {
            Some(pos) => (snapshot.price - pos.entry_price) * pos.quantity as f64,
            None => 0.0,
        };
        self.ledger.unrealized_pnl = self.ce.stats.unrealized_pnl + self.pe.stats.unrealized_pnl;
    }

    /// Advisory alerts only; position exits stay with the strategy rules
    fn check_alerts(&mut self, side: OptionSide, snapshot: &MarketSnapshot) {
        let strategy_range = self.config.trading.strategy_range;
        let stop_loss_percent = self.config.trading.stop_loss_percent;
        let target_profit_percent = self.config.trading.target_profit_percent;
        let ctx = self.ctx_mut(side);

        if snapshot.range_percent > strategy_range {
            if !ctx.volatility_alerted {
                ctx.volatility_alerted = true;
                self.alerts.raise(
                    "volatility",
                    &format!("{side} volatility spike"),
                    &format!(
                        "Range {:.2}% exceeds the {strategy_range:.2}% threshold",
                        snapshot.range_percent
                    ),
                    Severity::Warning,
                );
            }
        } else {
            ctx.volatility_alerted = false;
        }

        let ctx = self.ctx_mut(side);
        match ctx.position.as_ref().map(|p| p.entry_price) {
            Some(entry_price) => {
                let floor = entry_price * (1.0 - stop_loss_percent / 100.0);
                if snapshot.price <= floor {
                    if !ctx.drawdown_alerted {
                        ctx.drawdown_alerted = true;
                        self.alerts.raise(
                            "risk",
                            &format!("{side} drawdown"),
                            &format!(
                                "Price {:.2} below {stop_loss_percent:.1}% of entry {entry_price:.2}",
                                snapshot.price
                            ),
                            Severity::Error,
                        );
                    }
                } else {
                    ctx.drawdown_alerted = false;
                }
            }
            None => ctx.drawdown_alerted = false,
        }

        let ctx = self.ctx_mut(side);
        match ctx.position.as_ref().map(|p| p.entry_price) {
            Some(entry_price) => {
                let target = entry_price * (1.0 + target_profit_percent / 100.0);
                if snapshot.price >= target {
                    if !ctx.target_alerted {
                        ctx.target_alerted = true;
                        self.alerts.raise(
                            "risk",
                            &format!("{side} target reached"),
                            &format!(
                                "Price {:.2} at {target_profit_percent:.1}% over entry {entry_price:.2}",
                                snapshot.price
                            ),
                            Severity::Success,
                        );
                    }
                } else {
                    ctx.target_alerted = false;
                }
            }
            None => ctx.target_alerted = false,
        }
    }

    async fn open_position(&mut self, side: OptionSide, price: f64) -> Result<()> {
        if self.ctx(side).position.is_some() {
            return Ok(());
        }

        let code = self.config.trading.instrument_code(side);
        let name = self.config.trading.instrument_name(side).to_string();
        let exchange = self.config.trading.exchange;
        let quantity = self.resolve_quantity(price);

        let accepted = self
            .orders
            .place_order(OrderSide::Buy, code, quantity, exchange)
            .await?;
        if !accepted {
            warn!(%side, code, "Entry order rejected");
            self.alerts.raise(
                "order",
                &format!("{side} entry rejected"),
                &format!("Broker declined BUY {quantity} x {code}"),
                Severity::Error,
            );
            return Ok(());
        }

        let margin = price * quantity as f64;
        self.ledger.reserve_margin(margin);
        self.trades_today += 1;

        let ctx = self.ctx_mut(side);
        ctx.position = Some(Position {
            entry_price: price,
            quantity,
            opened_at: Utc::now(),
        });
        ctx.stats.entry_price = price;
        ctx.stats.max_margin_used = ctx.stats.max_margin_used.max(margin);

        info!(%side, code, price, quantity, "Opened position");
        self.alerts.raise(
            "trade",
            &format!("{side} entry"),
            &format!("Bought {quantity} {name} @ {price:.2}"),
            Severity::Success,
        );
        self.record_order(OrderRecord {
            timestamp: Utc::now(),
            side,
            order_side: OrderSide::Buy,
            instrument_code: code,
            instrument_name: name,
            quantity,
            price,
            value: margin,
            pnl: 0.0,
        });
        Ok(())
    }

    pub(crate) async fn close_position(
        &mut self,
        side: OptionSide,
        price: f64,
        arm_stop: bool,
    ) -> Result<()> {
        let pos = match self.ctx(side).position.clone() {
            Some(p) => p,
            None => return Ok(()),
        };
        let code = self.config.trading.instrument_code(side);
        let name = self.config.trading.instrument_name(side).to_string();
        let exchange = self.config.trading.exchange;

        let accepted = self
            .orders
            .place_order(OrderSide::Sell, code, pos.quantity, exchange)
            .await?;
        if !accepted {
            warn!(%side, code, "Exit order rejected, position stays open");
            self.alerts.raise(
                "order",
                &format!("{side} exit rejected"),
                &format!("Broker declined SELL {} x {code}", pos.quantity),
                Severity::Warning,
            );
            return Ok(());
        }

        let pnl = (price - pos.entry_price) * pos.quantity as f64;
        // Release exactly what the open reserved
        self.ledger.release_margin(pos.entry_price * pos.quantity as f64);
        self.ledger.realize(pnl);

        let ctx = self.ctx_mut(side);
        ctx.position = None;
        ctx.stats.record_close(pnl);
        if arm_stop {
            ctx.stop_flag = StopFlag::Armed;
        }

        info!(%side, code, price, pnl, arm_stop, "Closed position");
        let severity = if pnl >= 0.0 {
            Severity::Success
        } else {
            Severity::Warning
        };
        self.alerts.raise(
            "trade",
            &format!("{side} exit"),
            &format!("Sold {} {name} @ {price:.2}, P&L {pnl:.2}", pos.quantity),
            severity,
        );
        self.record_order(OrderRecord {
            timestamp: Utc::now(),
            side,
            order_side: OrderSide::Sell,
            instrument_code: code,
            instrument_name: name.clone(),
            quantity: pos.quantity,
            price,
            value: price * pos.quantity as f64,
            pnl,
        });
        self.record_trade(TradeRecord {
            id: Uuid::new_v4().to_string(),
            side,
            instrument_name: name,
            entry_price: pos.entry_price,
            exit_price: price,
            quantity: pos.quantity,
            pnl,
            opened_at: pos.opened_at,
            closed_at: Utc::now(),
        });
        Ok(())
    }

    fn record_order(&mut self, record: OrderRecord) {
        if let Some(p) = self.persistence.as_mut() {
            if let Err(e) = p.record_order(&record) {
                error!("Failed to persist order record: {e:#}");
            }
        }
    }

    pub(crate) fn record_trade(&mut self, record: TradeRecord) {
        if let Some(p) = self.persistence.as_mut() {
            if let Err(e) = p.record_trade(&record) {
                error!("Failed to persist trade record: {e:#}");
            }
        }
    }

    fn snapshot_of(
        config: &AppConfig,
        ledger: &PortfolioLedger,
        ce: &StrategyContext,
        pe: &StrategyContext,
        paused: bool,
        rebalance_state: RebalanceState,
        trades_today: u32,
    ) -> StatusSnapshot {
        let side_status = |ctx: &StrategyContext| SideStatus {
            instrument_code: config.trading.instrument_code(ctx.side),
            instrument_name: config.trading.instrument_name(ctx.side).to_string(),
            stats: ctx.stats.clone(),
            position: ctx.position.clone(),
            stop_armed: ctx.stop_flag.is_armed(),
        };
        StatusSnapshot {
            timestamp: Utc::now(),
            paused,
            rebalance_state,
            rebalancing: !rebalance_state.is_idle(),
            trades_today,
            total_trades: ce.stats.total_trades + pe.stats.total_trades,
            capital: config.trading.capital,
            ledger: ledger.clone(),
            free_margin: ledger.free_margin(),
            total_pnl: ledger.total_pnl(),
            roi: ledger.roi(config.trading.capital),
            margin_utilization: ledger.margin_utilization(),
            ce: side_status(ce),
            pe: side_status(pe),
        }
    }

    pub fn publish(&self) {
        let snapshot = Self::snapshot_of(
            &self.config,
            &self.ledger,
            &self.ce,
            &self.pe,
            self.paused,
            self.rebalance_state,
            self.trades_today,
        );
        // Nobody listening is fine
        let _ = self.status_tx.send(snapshot);
    }

    /// Main loop. Runs until the task is aborted or dropped.
    pub async fn run(&mut self) {
        info!(config = %self.config.digest(), "Trading engine started");
        loop {
            let tick = Duration::from_secs(self.config.bot.tick_interval_secs);
            if self.paused {
                self.publish();
                tokio::time::sleep(tick).await;
                continue;
            }

            self.reset_daily_counter();

            if let Err(e) = self.maybe_rebalance().await {
                error!("Rebalance workflow failed: {e:#}");
                self.alerts.raise(
                    "rebalance",
                    "Rebalance failed",
                    &format!("{e:#}"),
                    Severity::Error,
                );
            }

            let mut errored = false;
            for side in OptionSide::BOTH {
                if let Err(e) = self.tick_side(side).await {
                    error!(%side, "Tick failed: {e:#}");
                    self.alerts.raise(
                        "engine",
                        &format!("{side} tick failed"),
                        &format!("{e:#}"),
                        Severity::Error,
                    );
                    errored = true;
                }
            }

            self.publish();

            if errored {
                tokio::time::sleep(Duration::from_secs(self.config.bot.error_backoff_secs)).await;
            } else {
                tokio::time::sleep(tick).await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::types::{Exchange, Instrument};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Feed that replays a fixed price script, then repeats the last price
    pub(crate) struct ScriptedFeed {
        prices: Mutex<Vec<f64>>,
    }

    impl ScriptedFeed {
        pub(crate) fn new(mut prices: Vec<f64>) -> Self {
            prices.reverse();
            Self {
                prices: Mutex::new(prices),
            }
        }
    }

    #[async_trait]
    impl MarketFeed for ScriptedFeed {
        async fn last_traded_price(
            &self,
            _instrument_code: u32,
            _exchange: Exchange,
        ) -> Result<Option<f64>, BrokerError> {
            let mut prices = self.prices.lock().unwrap();
            Ok(if prices.len() > 1 {
                prices.pop()
            } else {
                prices.last().copied()
            })
        }
    }

    /// Gateway that accepts everything and remembers what was sent
    #[derive(Default)]
    pub(crate) struct RecordingGateway {
        pub(crate) orders: Mutex<Vec<(OrderSide, u32, u32)>>,
    }

    #[async_trait]
    impl OrderGateway for RecordingGateway {
        async fn place_order(
            &self,
            order_side: OrderSide,
            instrument_code: u32,
            quantity: u32,
            _exchange: Exchange,
        ) -> Result<bool, BrokerError> {
            self.orders
                .lock()
                .unwrap()
                .push((order_side, instrument_code, quantity));
            Ok(true)
        }
    }

    pub(crate) struct EmptyDirectory;

    impl InstrumentDirectory for EmptyDirectory {
        fn name_of(&self, _instrument_code: u32) -> Option<String> {
            None
        }
        fn candidates(&self, _side: OptionSide) -> Vec<Instrument> {
            Vec::new()
        }
    }

    pub(crate) fn test_config() -> AppConfig {
        // Env-driven load is exercised elsewhere; tests build the struct
        // directly so they never depend on files or the clock's market hours.
        AppConfig {
            bot: crate::config::BotConfig {
                tag: "test".into(),
                tick_interval_secs: 1,
                error_backoff_secs: 5,
                dry_run: true,
            },
            broker: crate::config::BrokerConfig {
                feed_url: String::new(),
                orders_url: String::new(),
                feed_key: String::new(),
                client_id: String::new(),
                timeout_ms: 1000,
                scripmaster_path: String::new(),
            },
            trading: crate::config::TradingConfig {
                ce_code: 111,
                ce_name: "TEST CE".into(),
                pe_code: 222,
                pe_name: "TEST PE".into(),
                quantity: 20,
                capital: 100_000.0,
                stop_loss_percent: 5.0,
                target_profit_percent: 10.0,
                max_trades_per_day: 1000,
                start_time: "00:00".into(),
                end_time: "23:59".into(),
                exchange: Exchange::Bse,
                strategy_range: 8.0,
                main_time_period: 300,
            },
            rebalance: crate::config::RebalanceConfig {
                enabled: false,
                price_difference_threshold: 40.0,
                target_ltp: 200.0,
                min_check_interval_secs: 30,
                candidate_delay_ms: 0,
                cooldown_floor_secs: 0,
                skip_when_both_open: true,
            },
            persistence: crate::config::PersistenceConfig {
                data_dir: "./data".into(),
                csv_enabled: false,
            },
            dashboard: crate::config::DashboardConfig { port: 0 },
        }
    }

    pub(crate) fn test_engine(
        config: AppConfig,
        prices: Vec<f64>,
    ) -> (TradingEngine, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let (engine, _rx) = TradingEngine::new(
            config,
            Arc::new(ScriptedFeed::new(prices)),
            gateway.clone(),
            Arc::new(EmptyDirectory),
            Arc::new(AlertManager::new()),
            None,
        );
        (engine, gateway)
    }

    #[test]
    fn test_quantity_fixed_when_configured() {
        let (engine, _) = test_engine(test_config(), vec![]);
        assert_eq!(engine.resolve_quantity(100.0), 20);
    }

    #[test]
    fn test_quantity_auto_sizes_whole_lots() {
        let mut config = test_config();
        config.trading.quantity = 0;
        let (engine, _) = test_engine(config, vec![]);
        // 50_000 / 250 / 20 = 10 lots of 20
        assert_eq!(engine.resolve_quantity(250.0), 200);
        // Expensive premium still yields at least one lot
        assert_eq!(engine.resolve_quantity(50_000.0), 20);
    }

    #[tokio::test]
    async fn test_skips_non_positive_quotes() {
        let (mut engine, gateway) = test_engine(test_config(), vec![0.0, -5.0]);
        engine.tick_side(OptionSide::Ce).await.unwrap();
        engine.tick_side(OptionSide::Ce).await.unwrap();
        assert!(engine.ctx(OptionSide::Ce).history.is_empty());
        assert!(gateway.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rising_series_opens_then_spike_exit_arms_stop() {
        // A steadily rising series widens range% enough to shrink the
        // window below the sample count, produce a trend, and open above
        // it; the final jump clears the 10% spike exit.
        let mut prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 2.0).collect();
        prices.push(500.0);
        let (mut engine, gateway) = test_engine(test_config(), prices);

        for _ in 0..41 {
            engine.tick_side(OptionSide::Ce).await.unwrap();
        }
        let orders = gateway.orders.lock().unwrap();
        assert!(orders.len() >= 2, "expected an entry and a spike exit");
        assert_eq!(orders[0].0, OrderSide::Buy);
        assert_eq!(orders[0].1, 111);
        assert_eq!(orders.last().unwrap().0, OrderSide::Sell);
        assert!(engine.ctx(OptionSide::Ce).position.is_none());
        assert!(engine.ctx(OptionSide::Ce).stop_flag.is_armed());
        assert!(engine.ledger.realized_pnl > 0.0);
    }

    #[tokio::test]
    async fn test_close_releases_margin_and_records_stats() {
        let (mut engine, gateway) = test_engine(test_config(), vec![]);
        // Seed an open position directly and drive a close
        engine.ledger.reserve_margin(100.0 * 20.0);
        engine.ctx_mut(OptionSide::Pe).position = Some(Position {
            entry_price: 100.0,
            quantity: 20,
            opened_at: Utc::now(),
        });

        engine.close_position(OptionSide::Pe, 110.0, true).await.unwrap();

        assert!(engine.ctx(OptionSide::Pe).position.is_none());
        assert_eq!(engine.ctx(OptionSide::Pe).stop_flag, StopFlag::Armed);
        assert_eq!(engine.ledger.used_margin, 0.0);
        assert!((engine.ledger.realized_pnl - 200.0).abs() < 1e-9);
        assert_eq!(engine.ctx(OptionSide::Pe).stats.total_trades, 1);
        let orders = gateway.orders.lock().unwrap();
        assert_eq!(orders.last().unwrap().0, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_open_is_noop_while_position_held() {
        let (mut engine, gateway) = test_engine(test_config(), vec![]);
        engine.ctx_mut(OptionSide::Ce).position = Some(Position {
            entry_price: 100.0,
            quantity: 20,
            opened_at: Utc::now(),
        });

        engine.open_position(OptionSide::Ce, 120.0).await.unwrap();

        assert!(gateway.orders.lock().unwrap().is_empty());
        let pos = engine.ctx(OptionSide::Ce).position.as_ref().unwrap();
        assert_eq!(pos.entry_price, 100.0);
    }

    #[tokio::test]
    async fn test_daily_limit_freezes_the_whole_tick() {
        let mut config = test_config();
        config.trading.max_trades_per_day = 0;
        // Rising series produces a trend; the final crash price would be a
        // stop-loss exit on any held position.
        let mut prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 2.0).collect();
        prices.push(100.0);
        let (mut engine, gateway) = test_engine(config, prices);

        for _ in 0..40 {
            engine.tick_side(OptionSide::Ce).await.unwrap();
        }
        assert!(engine.ctx(OptionSide::Ce).position.is_none());

        // Even a held position stays untouched at the limit
        engine.ctx_mut(OptionSide::Ce).position = Some(Position {
            entry_price: 170.0,
            quantity: 20,
            opened_at: Utc::now(),
        });
        engine.tick_side(OptionSide::Ce).await.unwrap();

        assert!(gateway.orders.lock().unwrap().is_empty());
        assert!(engine.ctx(OptionSide::Ce).position.is_some());
        let alerts = engine.alerts.recent(10);
        assert!(alerts.iter().any(|a| a.category == "limit"));
        // One-shot within the same session day
        assert_eq!(alerts.iter().filter(|a| a.category == "limit").count(), 1);
    }
}
