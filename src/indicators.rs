//! Trend and window estimators
//!
//! - Wilder's smoothed moving average (SMMA), recomputed from scratch each
//!   tick so the value is a pure function of history + period.
//! - Volatility-adaptive lookback window: shorter in volatile regimes,
//!   fixed default in calm markets.

use crate::history::PriceHistory;

/// Lower clamp for the adaptive window
pub const MIN_WINDOW: usize = 30;
/// Upper clamp for the adaptive window
pub const MAX_WINDOW: usize = 500;
/// Window used when the market is near-flat
pub const DEFAULT_WINDOW: usize = 300;
/// Numerator of the volatility-to-window mapping
const WINDOW_SCALE: f64 = 2500.0;
/// Below this range% the market counts as calm
const CALM_RANGE_PERCENT: f64 = 0.1;

/// Wilder's moving average over the last `period` samples.
///
/// Seeds with the simple mean of the first `period` samples, then folds in
/// each remaining sample as `acc = (acc*(period-1) + price) / period`.
/// Returns `None` when the series is shorter than `period`.
pub fn smma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let mut acc = prices[..period].iter().sum::<f64>() / period as f64;
    for price in &prices[period..] {
        acc = (acc * (period as f64 - 1.0) + price) / period as f64;
    }
    Some(acc)
}

/// High, low, and range percent over a price slice.
/// Range percent is 0 when the low is non-positive.
pub fn range_stats(prices: &[f64]) -> (f64, f64, f64) {
    if prices.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let high = prices.iter().copied().fold(f64::MIN, f64::max);
    let low = prices.iter().copied().fold(f64::MAX, f64::min);
    let range_percent = if low > 0.0 {
        (high - low) / low * 100.0
    } else {
        0.0
    };
    (high, low, range_percent)
}

/// Adaptive lookback estimate for one tick
#[derive(Debug, Clone, Copy)]
pub struct WindowEstimate {
    pub window: usize,
    pub range_percent: f64,
}

/// Compute the adaptive window from the most recent
/// `min(main_time_period, len)` samples.
///
/// `window = clamp(2500 / range%, 30, 500)` when range% > 0.1, otherwise
/// the 300-sample default. An empty history yields `fallback_window`
/// (the side's last stored value) without touching anything else.
pub fn adaptive_window(
    history: &PriceHistory,
    main_time_period: usize,
    fallback_window: usize,
) -> WindowEstimate {
    if history.is_empty() {
        return WindowEstimate {
            window: fallback_window,
            range_percent: 0.0,
        };
    }

    let recent = history.last_n(main_time_period);
    let (_, _, range_percent) = range_stats(&recent);

    let window = if range_percent > CALM_RANGE_PERCENT {
        (WINDOW_SCALE / range_percent)
            .clamp(MIN_WINDOW as f64, MAX_WINDOW as f64)
            .trunc() as usize
    } else {
        DEFAULT_WINDOW
    };

    WindowEstimate {
        window,
        range_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smma_requires_full_period() {
        let prices = vec![100.0; 29];
        assert!(smma(&prices, 30).is_none());
        assert!(smma(&[], 1).is_none());
    }

    #[test]
    fn test_smma_flat_series_is_constant() {
        let prices = vec![100.0; 50];
        let v = smma(&prices, 30).unwrap();
        assert!((v - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_smma_is_deterministic() {
        let prices: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64 * 0.37).sin()).collect();
        let a = smma(&prices, 30).unwrap();
        let b = smma(&prices, 30).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_smma_folds_remaining_samples() {
        // seed = mean(10, 20) = 15; fold 30: (15*1 + 30)/2 = 22.5
        let v = smma(&[10.0, 20.0, 30.0], 2).unwrap();
        assert!((v - 22.5).abs() < 1e-9);
    }

    fn history_of(prices: &[f64]) -> PriceHistory {
        let mut h = PriceHistory::new(600);
        for &p in prices {
            h.append(p);
        }
        h
    }

    #[test]
    fn test_window_default_in_calm_market() {
        // range% = 0.05, below the 0.1 calm threshold
        let h = history_of(&[100.0, 100.05, 100.0, 100.02]);
        let est = adaptive_window(&h, 300, 300);
        assert_eq!(est.window, DEFAULT_WINDOW);
        assert!(est.range_percent <= 0.1);
    }

    #[test]
    fn test_window_clamped_low_in_volatile_market() {
        // range% = 100 -> 2500/100 = 25 -> clamp to 30
        let h = history_of(&[50.0, 100.0]);
        let est = adaptive_window(&h, 300, 300);
        assert_eq!(est.window, MIN_WINDOW);
    }

    #[test]
    fn test_window_clamped_high_in_quiet_market() {
        // range% = 0.2 -> 2500/0.2 = 12500 -> clamp to 500
        let h = history_of(&[100.0, 100.2]);
        let est = adaptive_window(&h, 300, 300);
        assert_eq!(est.window, MAX_WINDOW);
    }

    #[test]
    fn test_window_midrange_truncates() {
        // range% = 10 -> window 250
        let h = history_of(&[100.0, 110.0]);
        let est = adaptive_window(&h, 300, 300);
        assert_eq!(est.window, 250);
    }

    #[test]
    fn test_window_empty_history_returns_fallback() {
        let h = PriceHistory::new(600);
        let est = adaptive_window(&h, 300, 412);
        assert_eq!(est.window, 412);
    }

    #[test]
    fn test_window_always_within_bounds() {
        for spread in [0.0, 0.01, 0.5, 1.0, 5.0, 50.0, 400.0] {
            let h = history_of(&[100.0, 100.0 + spread]);
            let est = adaptive_window(&h, 300, 300);
            assert!(est.window >= MIN_WINDOW && est.window <= MAX_WINDOW);
        }
    }
}
