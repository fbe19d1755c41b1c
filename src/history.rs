//! Bounded price history buffer
//!
//! One per instrument side. Fixed capacity, oldest samples evicted on
//! overflow; no persistence beyond the buffer itself.

use std::collections::VecDeque;

/// Live-trading capacity
pub const LIVE_CAPACITY: usize = 600;
/// Reduced capacity applied while a pair rebalance rescales history,
/// sized to the adaptive window's worst case plus slack
pub const REBALANCE_CAPACITY: usize = 310;

#[derive(Debug, Clone)]
pub struct PriceHistory {
    prices: VecDeque<f64>,
    capacity: usize,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            prices: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one sample, evicting the oldest when full
    pub fn append(&mut self, price: f64) {
        if self.prices.len() == self.capacity {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
    }

    /// Ordered view, oldest first
    pub fn snapshot(&self) -> Vec<f64> {
        self.prices.iter().copied().collect()
    }

    /// The most recent `n` samples, oldest first
    pub fn last_n(&self, n: usize) -> Vec<f64> {
        let skip = self.prices.len().saturating_sub(n);
        self.prices.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.prices.clear();
    }

    /// Change capacity, dropping the oldest samples if shrinking.
    /// Only the rebalance workflow calls this.
    pub fn resize(&mut self, new_capacity: usize) {
        while self.prices.len() > new_capacity {
            self.prices.pop_front();
        }
        self.capacity = new_capacity;
    }

    /// Replace the whole series, truncating to capacity from the front
    pub fn replace(&mut self, prices: Vec<f64>) {
        self.prices.clear();
        for p in prices {
            self.append(p);
        }
    }
}

impl Default for PriceHistory {
    fn default() -> Self {
        Self::new(LIVE_CAPACITY)
    }
}
