//! Broker-facing contracts
//!
//! The engine talks to the outside world through three narrow traits: a
//! price feed, an order gateway, and an instrument directory. Calls are
//! awaited sequentially from the control loop; a slow call stalls the tick.

mod rest;

pub use rest::{BrokerRestClient, OrderPayload};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Exchange, Instrument, OptionSide, OrderSide};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("broker returned status {0}")]
    Status(u16),
    #[error("access token not available")]
    MissingToken,
    #[error("malformed broker response: {0}")]
    Malformed(String),
}

/// Last-traded-price feed. One call per side per tick, no batching.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// `Ok(None)` means the feed had no quote for the instrument.
    async fn last_traded_price(
        &self,
        instrument_code: u32,
        exchange: Exchange,
    ) -> Result<Option<f64>, BrokerError>;
}

/// Synchronous market-order placement. The core never retries; a `false`
/// return means the order was rejected and nothing may be mutated.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(
        &self,
        order_side: OrderSide,
        instrument_code: u32,
        quantity: u32,
        exchange: Exchange,
    ) -> Result<bool, BrokerError>;
}

/// Instrument metadata lookup backed by the scrip master.
pub trait InstrumentDirectory: Send + Sync {
    /// Human-readable name for a code, "Unknown" style fallback is the
    /// caller's choice.
    fn name_of(&self, instrument_code: u32) -> Option<String>;

    /// All candidate instruments of one option type, used by the
    /// rebalance replacement scan.
    fn candidates(&self, side: OptionSide) -> Vec<Instrument>;
}
