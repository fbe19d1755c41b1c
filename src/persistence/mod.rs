//! CSV persistence for the order and trade logs
//!
//! Append-only, one dated file per record type per session day. The
//! engine owns the writers; everything here is synchronous.

use anyhow::{Context, Result};
use chrono::Utc;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::types::{OrderRecord, TradeRecord};

/// Flat order row as written to CSV
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRow {
    pub timestamp: i64,
    pub side: String,
    pub order_side: String,
    pub instrument_code: u32,
    pub instrument_name: String,
    pub quantity: u32,
    pub price: f64,
    pub value: f64,
    pub pnl: f64,
}

impl From<&OrderRecord> for OrderRow {
    fn from(r: &OrderRecord) -> Self {
        Self {
            timestamp: r.timestamp.timestamp_millis(),
            side: r.side.to_string(),
            order_side: r.order_side.to_string(),
            instrument_code: r.instrument_code,
            instrument_name: r.instrument_name.clone(),
            quantity: r.quantity,
            price: r.price,
            value: r.value,
            pnl: r.pnl,
        }
    }
}

/// Flat round-trip row as written to CSV
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRow {
    pub id: String,
    pub side: String,
    pub instrument_name: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: u32,
    pub pnl: f64,
    pub opened_at: i64,
    pub closed_at: i64,
}

impl From<&TradeRecord> for TradeRow {
    fn from(r: &TradeRecord) -> Self {
        Self {
            id: r.id.clone(),
            side: r.side.to_string(),
            instrument_name: r.instrument_name.clone(),
            entry_price: r.entry_price,
            exit_price: r.exit_price,
            quantity: r.quantity,
            pnl: r.pnl,
            opened_at: r.opened_at.timestamp_millis(),
            closed_at: r.closed_at.timestamp_millis(),
        }
    }
}

/// CSV persistence manager
pub struct CsvPersistence {
    order_writer: csv::Writer<std::fs::File>,
    trade_writer: csv::Writer<std::fs::File>,
}

impl CsvPersistence {
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(data_dir.join("orders")).context("Failed to create orders directory")?;
        fs::create_dir_all(data_dir.join("trades")).context("Failed to create trades directory")?;

        let today = Utc::now().format("%Y-%m-%d");
        let order_writer =
            Self::create_writer(&data_dir.join("orders"), &format!("orders_{}.csv", today))?;
        let trade_writer =
            Self::create_writer(&data_dir.join("trades"), &format!("trades_{}.csv", today))?;

        Ok(Self {
            order_writer,
            trade_writer,
        })
    }

    /// Open in append mode; emit the header only when the file is empty
    fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<std::fs::File>> {
        let path = dir.join(filename);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open CSV file")?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    pub fn record_order(&mut self, record: &OrderRecord) -> Result<()> {
        self.order_writer
            .serialize(OrderRow::from(record))
            .context("Failed to write order record")?;
        self.order_writer
            .flush()
            .context("Failed to flush order writer")?;
        Ok(())
    }

    pub fn record_trade(&mut self, record: &TradeRecord) -> Result<()> {
        self.trade_writer
            .serialize(TradeRow::from(record))
            .context("Failed to write trade record")?;
        self.trade_writer
            .flush()
            .context("Failed to flush trade writer")?;
        Ok(())
    }
}
