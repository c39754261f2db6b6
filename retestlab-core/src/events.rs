//! Structured per-stage events.
//!
//! Every step returns the events it produced, in the order they happened.
//! [`EngineEvent::log`] forwards each one to `tracing`: detection stages at
//! `debug`, trade lifecycle at `info`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::components::confirmation::ConfirmationFailure;
use crate::components::regime::RegimeState;
use crate::components::risk::RejectionReason;
use crate::components::swing::SwingKind;
use crate::domain::{BreakoutId, Direction, ExitReason, PositionId, TradeRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    SwingFound {
        bar_index: usize,
        kind: SwingKind,
        price: f64,
        strength: f64,
    },
    LevelsUpdated {
        bar_index: usize,
        support: Vec<f64>,
        resistance: Vec<f64>,
    },
    BreakoutFlagged {
        bar_index: usize,
        breakout_id: BreakoutId,
        direction: Direction,
        level_price: f64,
        breakout_price: f64,
        strength: f64,
    },
    BreakoutExpired {
        bar_index: usize,
        breakout_id: BreakoutId,
        level_price: f64,
        age: usize,
    },
    RetestConfirmed {
        bar_index: usize,
        breakout_id: BreakoutId,
        direction: Direction,
        level_price: f64,
        fraction: f64,
        required: f64,
        regime: RegimeState,
    },
    RetestRejected {
        bar_index: usize,
        breakout_id: BreakoutId,
        level_price: f64,
        fraction: f64,
        required: f64,
        failed: Vec<ConfirmationFailure>,
    },
    EntryRejected {
        bar_index: usize,
        breakout_id: BreakoutId,
        reason: RejectionReason,
        context: String,
    },
    PositionOpened {
        bar_index: usize,
        position_id: PositionId,
        breakout_id: BreakoutId,
        direction: Direction,
        entry_price: f64,
        size: u64,
        stop_price: f64,
        target_price: f64,
        level_price: f64,
        regime: RegimeState,
    },
    PartialClosed {
        bar_index: usize,
        position_id: PositionId,
        size: u64,
        price: f64,
        pnl: f64,
    },
    StopTightened {
        bar_index: usize,
        position_id: PositionId,
        from: f64,
        to: f64,
    },
    PositionClosed {
        bar_index: usize,
        reason: ExitReason,
        trade: TradeRecord,
    },
}

impl EngineEvent {
    pub fn bar_index(&self) -> usize {
        match self {
            EngineEvent::SwingFound { bar_index, .. }
            | EngineEvent::LevelsUpdated { bar_index, .. }
            | EngineEvent::BreakoutFlagged { bar_index, .. }
            | EngineEvent::BreakoutExpired { bar_index, .. }
            | EngineEvent::RetestConfirmed { bar_index, .. }
            | EngineEvent::RetestRejected { bar_index, .. }
            | EngineEvent::EntryRejected { bar_index, .. }
            | EngineEvent::PositionOpened { bar_index, .. }
            | EngineEvent::PartialClosed { bar_index, .. }
            | EngineEvent::StopTightened { bar_index, .. }
            | EngineEvent::PositionClosed { bar_index, .. } => *bar_index,
        }
    }

    /// Emit this event through `tracing`.
    pub fn log(&self) {
        match self {
            EngineEvent::SwingFound { bar_index, kind, price, strength } => {
                debug!(bar_index, ?kind, price, strength, "swing found");
            }
            EngineEvent::LevelsUpdated { bar_index, support, resistance } => {
                debug!(bar_index, support = support.len(), resistance = resistance.len(), "levels updated");
            }
            EngineEvent::BreakoutFlagged { bar_index, breakout_id, direction, level_price, strength, .. } => {
                debug!(bar_index, %breakout_id, %direction, level_price, strength, "breakout flagged");
            }
            EngineEvent::BreakoutExpired { bar_index, breakout_id, level_price, age } => {
                debug!(bar_index, %breakout_id, level_price, age, "breakout expired");
            }
            EngineEvent::RetestConfirmed { bar_index, breakout_id, direction, fraction, required, regime, .. } => {
                info!(
                    bar_index,
                    %breakout_id,
                    %direction,
                    fraction,
                    required,
                    trend = %regime.trend_class,
                    "retest confirmed"
                );
            }
            EngineEvent::RetestRejected { bar_index, breakout_id, fraction, required, failed, .. } => {
                debug!(bar_index, %breakout_id, fraction, required, ?failed, "retest rejected");
            }
            EngineEvent::EntryRejected { bar_index, breakout_id, reason, context } => {
                info!(bar_index, %breakout_id, %reason, context = context.as_str(), "entry rejected");
            }
            EngineEvent::PositionOpened {
                bar_index, position_id, direction, entry_price, size, stop_price, target_price, ..
            } => {
                info!(
                    bar_index,
                    %position_id,
                    %direction,
                    entry_price,
                    size,
                    stop_price,
                    target_price,
                    "position opened"
                );
            }
            EngineEvent::PartialClosed { bar_index, position_id, size, price, pnl } => {
                info!(bar_index, %position_id, size, price, pnl, "partial profit taken");
            }
            EngineEvent::StopTightened { bar_index, position_id, from, to } => {
                debug!(bar_index, %position_id, from, to, "stop tightened");
            }
            EngineEvent::PositionClosed { bar_index, reason, trade } => {
                info!(
                    bar_index,
                    position_id = %trade.position_id,
                    %reason,
                    exit_price = trade.exit_price,
                    pnl = trade.realized_pnl,
                    bars_held = trade.bars_held,
                    "position closed"
                );
            }
        }
    }
}
