//! TradeRecord: a completed round trip with full attribution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{BreakoutId, Direction, PositionId};
use crate::components::regime::RegimeState;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeExit,
    /// Closed by the host (end of data, shutdown).
    Flatten,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "StopLoss"),
            ExitReason::TakeProfit => write!(f, "TakeProfit"),
            ExitReason::TimeExit => write!(f, "TimeExit"),
            ExitReason::Flatten => write!(f, "Flatten"),
        }
    }
}

/// A complete round-trip trade record: entry → exit.
///
/// `realized_pnl` includes any partial close taken along the way; `size` is
/// the size at entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    // ── Identification ──
    pub position_id: PositionId,
    pub breakout_id: BreakoutId,
    pub direction: Direction,

    // ── Entry ──
    pub entry_bar: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub target_price: f64,

    // ── Exit ──
    pub exit_bar: usize,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    // ── Size / PnL ──
    pub size: u64,
    pub realized_pnl: f64,
    pub bars_held: usize,

    // ── Attribution ──
    pub breakout_level: f64,
    pub regime_at_entry: RegimeState,
    pub partial_taken: bool,
}

impl TradeRecord {
    /// Return on the trade as a fraction of entry notional.
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 || self.size == 0 {
            return 0.0;
        }
        self.realized_pnl / (self.entry_price * self.size as f64)
    }

    pub fn is_winner(&self) -> bool {
        self.realized_pnl > 0.0
    }

    /// Realized P&L in units of initial risk.
    pub fn r_multiple(&self) -> f64 {
        let risk = (self.entry_price - self.initial_stop).abs() * self.size as f64;
        if risk <= 0.0 {
            return 0.0;
        }
        self.realized_pnl / risk
    }
}
