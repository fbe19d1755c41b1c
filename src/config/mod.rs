//! Configuration management for straddlebot
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::types::Exchange;

/// Main application configuration, loaded once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub broker: BrokerConfig,
    pub trading: TradingConfig,
    pub rebalance: RebalanceConfig,
    pub persistence: PersistenceConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Version tag for logging
    pub tag: String,
    /// Tick interval in seconds
    pub tick_interval_secs: u64,
    /// Backoff after an unexpected tick error in seconds
    pub error_backoff_secs: u64,
    /// Dry run mode (no real orders)
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Market feed endpoint
    pub feed_url: String,
    /// Order placement endpoint
    pub orders_url: String,
    /// Vendor key sent with market feed requests
    pub feed_key: String,
    /// Broker client id for order payloads
    pub client_id: String,
    /// HTTP timeout in milliseconds
    pub timeout_ms: u64,
    /// Path to the scrip master CSV
    pub scripmaster_path: String,
}

/// The trading parameters an operator may change mid-run.
///
/// The engine owns a mutable copy; the rebalance workflow rewrites the
/// instrument identity fields in place.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    pub ce_code: u32,
    pub ce_name: String,
    pub pe_code: u32,
    pub pe_name: String,
    /// Contracts per order; 0 = auto-size from capital
    pub quantity: u32,
    pub capital: f64,
    pub stop_loss_percent: f64,
    pub target_profit_percent: f64,
    pub max_trades_per_day: u32,
    /// "HH:MM"
    pub start_time: String,
    /// "HH:MM"
    pub end_time: String,
    pub exchange: Exchange,
    /// Range% above which a high-volatility alert fires
    pub strategy_range: f64,
    /// Samples feeding the adaptive window estimate
    pub main_time_period: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceConfig {
    /// Auto-rebalance on divergence
    pub enabled: bool,
    /// CE/PE price divergence % that triggers the workflow
    pub price_difference_threshold: f64,
    /// Preferred premium for replacement instruments
    pub target_ltp: f64,
    /// Minimum seconds between divergence checks
    pub min_check_interval_secs: u64,
    /// Delay between candidate price fetches in milliseconds
    pub candidate_delay_ms: u64,
    /// Minimum wall-clock seconds the workflow must take
    pub cooldown_floor_secs: u64,
    /// Skip the divergence check while both sides hold positions
    pub skip_when_both_open: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory for CSV output
    pub data_dir: String,
    /// Enable CSV logging
    pub csv_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Bind port for the read-only status API (dashboard feature)
    pub port: u16,
}

impl TradingConfig {
    /// Parsed trading-hours bounds; errors on malformed HH:MM
    pub fn trading_hours(&self) -> Result<(NaiveTime, NaiveTime)> {
        let start = NaiveTime::parse_from_str(&self.start_time, "%H:%M")
            .with_context(|| format!("Invalid trading start time {:?}", self.start_time))?;
        let end = NaiveTime::parse_from_str(&self.end_time, "%H:%M")
            .with_context(|| format!("Invalid trading end time {:?}", self.end_time))?;
        Ok((start, end))
    }

    pub fn instrument_code(&self, side: crate::types::OptionSide) -> u32 {
        match side {
            crate::types::OptionSide::Ce => self.ce_code,
            crate::types::OptionSide::Pe => self.pe_code,
        }
    }

    pub fn instrument_name(&self, side: crate::types::OptionSide) -> &str {
        match side {
            crate::types::OptionSide::Ce => &self.ce_name,
            crate::types::OptionSide::Pe => &self.pe_name,
        }
    }

    pub fn set_instrument(&mut self, side: crate::types::OptionSide, code: u32, name: String) {
        match side {
            crate::types::OptionSide::Ce => {
                self.ce_code = code;
                self.ce_name = name;
            }
            crate::types::OptionSide::Pe => {
                self.pe_code = code;
                self.pe_name = name;
            }
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.tick_interval_secs", 1)?
            .set_default("bot.error_backoff_secs", 5)?
            .set_default("bot.dry_run", true)?
            // Broker defaults
            .set_default("broker.feed_url", "https://openapi.example.com/marketfeed")?
            .set_default("broker.orders_url", "https://api.example.com/api/v1/orders")?
            .set_default("broker.feed_key", "")?
            .set_default("broker.client_id", "")?
            .set_default("broker.timeout_ms", 10_000)?
            .set_default("broker.scripmaster_path", "scripmaster.csv")?
            // Trading defaults
            .set_default("trading.ce_code", 0)?
            .set_default("trading.ce_name", "")?
            .set_default("trading.pe_code", 0)?
            .set_default("trading.pe_name", "")?
            .set_default("trading.quantity", 0)?
            .set_default("trading.capital", 100_000.0)?
            .set_default("trading.stop_loss_percent", 5.0)?
            .set_default("trading.target_profit_percent", 10.0)?
            .set_default("trading.max_trades_per_day", 1000)?
            .set_default("trading.start_time", "09:15")?
            .set_default("trading.end_time", "15:30")?
            .set_default("trading.exchange", "Bse")?
            .set_default("trading.strategy_range", 8.0)?
            .set_default("trading.main_time_period", 300)?
            // Rebalance defaults
            .set_default("rebalance.enabled", true)?
            .set_default("rebalance.price_difference_threshold", 40.0)?
            .set_default("rebalance.target_ltp", 200.0)?
            .set_default("rebalance.min_check_interval_secs", 30)?
            .set_default("rebalance.candidate_delay_ms", 100)?
            .set_default("rebalance.cooldown_floor_secs", 5)?
            .set_default("rebalance.skip_when_both_open", true)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // Dashboard defaults
            .set_default("dashboard.port", 5012)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (STRADDLEBOT_*)
            .add_source(Environment::with_prefix("STRADDLEBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.trading.trading_hours()?;
        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} ce={} pe={} exch={} dry_run={} rebalance={}",
            self.bot.tag,
            self.trading.ce_code,
            self.trading.pe_code,
            self.trading.exchange,
            self.bot.dry_run,
            self.rebalance.enabled
        )
    }

    /// Validate required environment variables for live trading
    pub fn validate_env(&self) -> Result<()> {
        if self.bot.dry_run {
            return Ok(());
        }
        for var in ["BROKER_ACCESS_TOKEN"] {
            match std::env::var(var) {
                Ok(v) if !v.trim().is_empty() => {}
                _ => bail!("Required environment variable {} is not set", var),
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
