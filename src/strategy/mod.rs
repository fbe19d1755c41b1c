//! Trend-following entry/exit rules for a single option leg
//!
//! The adaptive window length picks one of three regimes. Early and mid
//! regimes buy strength above the smoothed trend and exit on a pullback
//! or a profit spike; the late regime buys dips near the session low and
//! exits on the first close back above trend. Decisions are pure: the
//! control loop owns all side effects.

use crate::types::{MarketSnapshot, Position, StopFlag};

/// Regime boundary: windows at or below this are "early"
pub const EARLY_WINDOW_MAX: usize = 300;
/// Windows above EARLY and at or below this are "mid"
pub const MID_WINDOW_MAX: usize = 400;

// Early-regime thresholds
const EARLY_EXIT_RATIO: f64 = 0.96;
const EARLY_SPIKE_RATIO: f64 = 1.10;
// Mid-regime thresholds
const MID_EXIT_RATIO: f64 = 0.98;
const MID_SPIKE_RATIO: f64 = 1.03;
// Late-regime thresholds
const LATE_DIP_CEILING: f64 = 1.02;
const LATE_ENTRY_RATIO: f64 = 0.98;
const LATE_EXIT_RATIO: f64 = 0.995;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Early,
    Mid,
    Late,
}

impl Regime {
    pub fn from_window(window: usize) -> Self {
        if window <= EARLY_WINDOW_MAX {
            Regime::Early
        } else if window <= MID_WINDOW_MAX {
            Regime::Mid
        } else {
            Regime::Late
        }
    }
}

/// What the control loop should do with this leg on this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Hold,
    Open,
    /// Close the position; `arm_stop` additionally latches the stop flag
    /// so re-entry waits for price to come back under trend.
    Close { arm_stop: bool },
}

/// Reset an armed stop once price has pulled back to or under the trend.
/// Runs before the regime decision on every tick.
pub fn settle_stop_flag(flag: StopFlag, price: f64, trend: f64) -> StopFlag {
    match flag {
        StopFlag::Armed if price <= trend => StopFlag::Clear,
        other => other,
    }
}

/// Pure regime decision for one leg on one tick. `trend` must already be
/// available; callers skip the tick entirely while the SMMA is warming up.
pub fn evaluate(
    snapshot: &MarketSnapshot,
    trend: f64,
    position: Option<&Position>,
    stop_flag: StopFlag,
) -> Action {
    let price = snapshot.price;
    match Regime::from_window(snapshot.window) {
        Regime::Early => match position {
            None => {
                if stop_flag == StopFlag::Clear && price > trend {
                    Action::Open
                } else {
                    Action::Hold
                }
            }
            Some(pos) => {
                if price <= trend * EARLY_EXIT_RATIO {
                    Action::Close { arm_stop: false }
                } else if price >= pos.entry_price * EARLY_SPIKE_RATIO {
                    Action::Close { arm_stop: true }
                } else {
                    Action::Hold
                }
            }
        },
        Regime::Mid => match position {
            None => {
                if stop_flag == StopFlag::Clear && price > trend {
                    Action::Open
                } else {
                    Action::Hold
                }
            }
            Some(_) => {
                if price <= trend * MID_EXIT_RATIO {
                    Action::Close { arm_stop: false }
                } else if price >= trend * MID_SPIKE_RATIO {
                    Action::Close { arm_stop: true }
                } else {
                    Action::Hold
                }
            }
        },
        Regime::Late => match position {
            None => {
                let near_low = price > snapshot.low && price < snapshot.low * LATE_DIP_CEILING;
                if stop_flag == StopFlag::Clear && near_low && price < trend * LATE_ENTRY_RATIO {
                    Action::Open
                } else {
                    Action::Hold
                }
            }
            // No spike leg here: dip entries ride until price recovers
            // above trend, however long that takes.
            Some(_) => {
                if price > trend * LATE_EXIT_RATIO {
                    Action::Close { arm_stop: false }
                } else {
                    Action::Hold
                }
            }
        },
    }
}
