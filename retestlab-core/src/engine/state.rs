//! Engine state: everything one engine instance owns.
//!
//! The whole struct is serde-serializable: checkpoint it between bars and a
//! restored engine makes the same decisions on the same follow-on bars.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::components::breakout::BreakoutBook;
use crate::components::levels::LevelBook;
use crate::components::position::Position;
use crate::components::regime::RegimeState;
use crate::components::risk::{RecentEntry, RiskState};
use crate::components::swing::SwingTracker;
use crate::config::StrategyConfig;
use crate::domain::{Bar, BarWindow, IdGenerator, PositionId, TradeRecord};
use crate::error::EngineError;

/// A change to the position/risk book.
///
/// Steps record every book change as a commit so the driver can rebuild
/// the book exactly when a broker call fails part-way through a bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Commit {
    Open {
        position: Position,
        entry: RecentEntry,
    },
    Reduce {
        position_id: PositionId,
        size: u64,
        pnl: f64,
    },
    TightenStop {
        position_id: PositionId,
        to: f64,
    },
    Close {
        position_id: PositionId,
        trade: TradeRecord,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub window: BarWindow,
    pub swings: SwingTracker,
    pub levels: LevelBook,
    pub breakouts: BreakoutBook,
    pub regime: RegimeState,
    pub positions: Vec<Position>,
    pub risk: RiskState,
    pub ids: IdGenerator,
    /// Bars admitted so far; also the index the next bar will get.
    pub bars_seen: usize,
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl EngineState {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            window: BarWindow::new(window_capacity(config)),
            swings: SwingTracker::new(),
            levels: LevelBook::new(),
            breakouts: BreakoutBook::new(),
            regime: RegimeState::unknown(),
            positions: Vec::new(),
            risk: RiskState::default(),
            ids: IdGenerator::default(),
            bars_seen: 0,
            last_timestamp: None,
        }
    }

    /// Reject a bar that is not sane or not strictly after the last one.
    pub fn validate_bar(&self, bar: &Bar) -> Result<(), EngineError> {
        if !bar.is_sane() {
            return Err(EngineError::InvalidBar {
                index: self.bars_seen,
                reason: format!(
                    "malformed OHLCV o={} h={} l={} c={} v={}",
                    bar.open, bar.high, bar.low, bar.close, bar.volume
                ),
            });
        }
        if let Some(last) = self.last_timestamp {
            if bar.timestamp <= last {
                return Err(EngineError::InvalidBar {
                    index: self.bars_seen,
                    reason: format!("timestamp {} is not after {}", bar.timestamp, last),
                });
            }
        }
        Ok(())
    }

    /// Apply one book change.
    pub fn apply(&mut self, commit: &Commit) {
        match commit {
            Commit::Open { position, entry } => {
                self.positions.push(position.clone());
                self.risk.record_entry(*entry);
            }
            Commit::Reduce { position_id, size, pnl } => {
                if let Some(p) = self.position_mut(*position_id) {
                    p.size = p.size.saturating_sub(*size);
                    p.realized_pnl += pnl;
                    p.partial_taken = true;
                }
            }
            Commit::TightenStop { position_id, to } => {
                if let Some(p) = self.position_mut(*position_id) {
                    p.stop_price = *to;
                }
            }
            Commit::Close { position_id, trade } => {
                self.positions.retain(|p| p.id != *position_id);
                self.risk.record_close(trade.realized_pnl);
            }
        }
    }

    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    fn position_mut(&mut self, id: PositionId) -> Option<&mut Position> {
        self.positions.iter_mut().find(|p| p.id == id)
    }

    /// Currency at risk across open positions.
    pub fn open_risk(&self) -> f64 {
        self.positions.iter().map(Position::open_risk).sum()
    }
}

/// Bars kept in the window: enough for swing confirmation and the regime fit.
pub fn window_capacity(config: &StrategyConfig) -> usize {
    config.swing_warmup().max(config.regime_lookback) + 1
}
