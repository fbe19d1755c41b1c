//! straddlebot Library
//!
//! Automated option-pair trading: adaptive SMMA trend following over a
//! CE/PE straddle with divergence-driven pair rebalancing

pub mod alerts;
pub mod broker;
pub mod config;
pub mod engine;
pub mod history;
pub mod indicators;
pub mod ledger;
pub mod persistence;
pub mod rebalance;
pub mod scripmaster;
pub mod strategy;
pub mod types;

#[cfg(feature = "dashboard")]
pub mod dashboard;
