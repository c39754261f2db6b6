//! Open position and per-bar position management.
//!
//! Evaluated on the bar close, in this order:
//! 1. time exit once `bars_held >= max_holding_days`
//! 2. stop-out when the close is through the stop
//! 3. target when the close is through the target
//! 4. one-time partial close once the open gain reaches
//!    `partial_profit_level` of the planned reward
//! 5. trailing stop: ATR trail and structure trail, through the ratchet
//!
//! An exit ends the evaluation for that bar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::confirmation::ConfirmationScore;
use super::ratchet;
use super::regime::RegimeState;
use super::risk::structure_level;
use super::swing::SwingTracker;
use crate::config::StrategyConfig;
use crate::domain::{BarRecord, BreakoutId, Direction, ExitReason, PositionId, TradeRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub breakout_id: BreakoutId,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_bar: usize,
    /// Units still open.
    pub size: u64,
    pub initial_size: u64,
    pub stop_price: f64,
    pub initial_stop: f64,
    pub target_price: f64,
    pub breakout_level: f64,
    pub regime_snapshot: RegimeState,
    pub confirmation: ConfirmationScore,
    pub partial_taken: bool,
    /// P&L already realized by partial closes.
    pub realized_pnl: f64,
}

impl Position {
    /// Profit per unit if closed at `price`.
    pub fn pnl_per_unit(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.direction.sign()
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.pnl_per_unit(price) * self.size as f64
    }

    /// Currency still at risk if the stop is hit; zero once the stop locks in profit.
    pub fn open_risk(&self) -> f64 {
        let per_unit = (self.entry_price - self.stop_price) * self.direction.sign();
        per_unit.max(0.0) * self.size as f64
    }

    pub fn bars_held(&self, bar_index: usize) -> usize {
        bar_index.saturating_sub(self.entry_bar)
    }

    /// Planned reward per unit at entry.
    pub fn planned_reward(&self) -> f64 {
        (self.target_price - self.entry_price).abs()
    }

    /// Close the remaining size at `exit_price` and produce the trade record.
    pub fn close(&self, record: &BarRecord, exit_price: f64, reason: ExitReason) -> TradeRecord {
        TradeRecord {
            position_id: self.id,
            breakout_id: self.breakout_id,
            direction: self.direction,
            entry_bar: self.entry_bar,
            entry_time: self.entry_time,
            entry_price: self.entry_price,
            initial_stop: self.initial_stop,
            target_price: self.target_price,
            exit_bar: record.index,
            exit_time: record.bar.timestamp,
            exit_price,
            exit_reason: reason,
            size: self.initial_size,
            realized_pnl: self.realized_pnl + self.unrealized_pnl(exit_price),
            bars_held: self.bars_held(record.index),
            breakout_level: self.breakout_level,
            regime_at_entry: self.regime_snapshot,
            partial_taken: self.partial_taken,
        }
    }
}

/// What position management decided on one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositionAction {
    Exit { reason: ExitReason, price: f64 },
    PartialExit { size: u64, price: f64, pnl: f64 },
    StopTightened { from: f64, to: f64 },
}

/// Evaluate an open position against the current bar.
///
/// Partial closes and stop moves are applied to `position` directly; an
/// `Exit` is returned for the caller to carry out.
pub fn manage(
    position: &mut Position,
    record: &BarRecord,
    swings: &SwingTracker,
    config: &StrategyConfig,
) -> Vec<PositionAction> {
    let mut actions = Vec::new();
    let close = record.bar.close;
    let dir = position.direction;

    if position.bars_held(record.index) >= config.max_holding_days {
        actions.push(PositionAction::Exit {
            reason: ExitReason::TimeExit,
            price: close,
        });
        return actions;
    }

    let stopped = match dir {
        Direction::Long => close <= position.stop_price,
        Direction::Short => close >= position.stop_price,
    };
    if stopped {
        actions.push(PositionAction::Exit {
            reason: ExitReason::StopLoss,
            price: close,
        });
        return actions;
    }

    let hit_target = match dir {
        Direction::Long => close >= position.target_price,
        Direction::Short => close <= position.target_price,
    };
    if hit_target {
        actions.push(PositionAction::Exit {
            reason: ExitReason::TakeProfit,
            price: close,
        });
        return actions;
    }

    if !position.partial_taken {
        let gain = position.pnl_per_unit(close);
        if gain > 0.0 && gain >= config.partial_profit_level * position.planned_reward() {
            let size = (position.size as f64 * config.partial_profit_fraction).floor() as u64;
            if size >= 1 && size < position.size {
                let pnl = gain * size as f64;
                position.size -= size;
                position.realized_pnl += pnl;
                position.partial_taken = true;
                actions.push(PositionAction::PartialExit { size, price: close, pnl });
            }
        }
    }

    let mut proposals = Vec::with_capacity(2);
    if config.enable_trailing_stop {
        if let Some(atr) = record.indicators.atr().filter(|a| *a > 0.0) {
            proposals.push(close - dir.sign() * atr * config.trailing_stop_atr_mult);
        }
    }
    if config.use_structure_stops {
        if let Some(level) = structure_level(dir, close, swings, config.structure_stop_buffer) {
            proposals.push(level);
        }
    }
    if let Some(best) = proposals.into_iter().reduce(|a, b| ratchet::tightest(dir, a, b)) {
        if let Some(to) = ratchet::tighten(dir, position.stop_price, best, close) {
            actions.push(PositionAction::StopTightened {
                from: position.stop_price,
                to,
            });
            position.stop_price = to;
        }
    }
    actions
}
