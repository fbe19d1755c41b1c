//! Core types used throughout straddlebot
//!
//! Defines the instrument sides, order primitives, and record structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two legs of the tracked option pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionSide {
    /// Call option leg
    Ce,
    /// Put option leg
    Pe,
}

impl OptionSide {
    pub const BOTH: [OptionSide; 2] = [OptionSide::Ce, OptionSide::Pe];

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CE" => Some(OptionSide::Ce),
            "PE" => Some(OptionSide::Pe),
            _ => None,
        }
    }
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionSide::Ce => write!(f, "CE"),
            OptionSide::Pe => write!(f, "PE"),
        }
    }
}

/// Order direction sent to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Exchange venue for the option contracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Nse,
    Bse,
    Mcx,
}

impl Default for Exchange {
    fn default() -> Self {
        Exchange::Bse
    }
}

impl Exchange {
    /// Single-letter market-feed code
    pub fn feed_code(&self) -> &'static str {
        match self {
            Exchange::Nse => "N",
            Exchange::Bse => "B",
            Exchange::Mcx => "M",
        }
    }

    /// Derivatives segment used on order placement
    pub fn order_segment(&self) -> &'static str {
        match self {
            Exchange::Nse => "NFO",
            Exchange::Bse | Exchange::Mcx => "BFO",
        }
    }

    /// Contract lot size per venue
    pub fn lot_size(&self) -> u32 {
        match self {
            Exchange::Nse => 75,
            Exchange::Bse | Exchange::Mcx => 20,
        }
    }

    /// Parse from the single-letter feed code
    pub fn from_code(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "N" => Some(Exchange::Nse),
            "B" => Some(Exchange::Bse),
            "M" => Some(Exchange::Mcx),
            _ => None,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.feed_code())
    }
}

/// Re-entry guard set by a profit-target exit.
///
/// `Armed` blocks new entries for the side until price falls back to or
/// below the trend value, at which point it flips to `Clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopFlag {
    Armed,
    Clear,
}

impl Default for StopFlag {
    fn default() -> Self {
        StopFlag::Clear
    }
}

impl StopFlag {
    pub fn is_armed(&self) -> bool {
        matches!(self, StopFlag::Armed)
    }
}

/// An open long position on one side. At most one exists per side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub entry_price: f64,
    pub quantity: u32,
    pub opened_at: DateTime<Utc>,
}

/// A tradable instrument known to the scrip directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub code: u32,
    pub name: String,
    pub side: OptionSide,
}

/// Per-tick derived market view for one side
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price: f64,
    /// Wilder SMMA over the adaptive window; absent until enough history
    pub trend: Option<f64>,
    pub window: usize,
    pub high: f64,
    pub low: f64,
    pub range: f64,
    pub range_percent: f64,
}

/// Executed order, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub timestamp: DateTime<Utc>,
    pub side: OptionSide,
    pub order_side: OrderSide,
    pub instrument_code: u32,
    pub instrument_name: String,
    pub quantity: u32,
    pub price: f64,
    pub value: f64,
    pub pnl: f64,
}

/// Completed round trip, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub side: OptionSide,
    pub instrument_name: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: u32,
    pub pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Alert severity for the notification sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Success => write!(f, "success"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Fire-and-forget notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub category: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}
