//! Breakout detector and pending-breakout backlog.
//!
//! A resistance level breaks upward (long) and a support level breaks
//! downward (short) when, on the same bar:
//! - the previous close was on the near side of the level (a cross)
//! - the close sits beyond the level by at least `1.2 × min_breakout_strength`
//! - the bar's extreme in that direction also clears the level
//! - volume is at least `breakout_volume_factor ×` its average
//!
//! Strength is the level's strength plus a volume bonus (+1.0 above 2× average,
//! +0.5 above 1.5×) and an ATR bonus (+0.5 when the close is more than 2 ATR
//! past the level). Pending breakouts age by one each bar and are purged once
//! `age > max_breakout_age`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::levels::{Level, LevelBook, LevelKind};
use crate::config::StrategyConfig;
use crate::domain::{BarRecord, BreakoutId, Direction, IdGenerator};

/// Pending breakouts retained; the oldest is evicted beyond this.
pub const MAX_PENDING_BREAKOUTS: usize = 32;

/// Buffer over `min_breakout_strength` that filters marginal closes.
const FALSE_BREAKOUT_BUFFER: f64 = 1.2;

/// A confirmed level break waiting for its retest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakout {
    pub id: BreakoutId,
    pub level_price: f64,
    pub level_strength: f64,
    pub breakout_price: f64,
    pub direction: Direction,
    pub strength: f64,
    /// Bars elapsed since the breakout bar.
    pub age: usize,
    pub flagged_at: usize,
    pub flagged_time: DateTime<Utc>,
}

/// Test one level against the current bar.
///
/// Returns the breakout direction and strength when every break condition
/// holds. Missing average volume means the volume condition cannot be met.
pub fn detect_break(
    level: &Level,
    prev_close: f64,
    record: &BarRecord,
    config: &StrategyConfig,
) -> Option<(Direction, f64)> {
    let bar = &record.bar;
    let l = level.price;
    if l <= 0.0 {
        return None;
    }
    let avg_volume = record.indicators.avg_volume().filter(|v| *v > 0.0)?;
    if bar.volume < config.breakout_volume_factor * avg_volume {
        return None;
    }
    let min_excess = config.min_breakout_strength * FALSE_BREAKOUT_BUFFER;

    let direction = match level.kind {
        LevelKind::Resistance => {
            let excess = (bar.close - l) / l;
            if prev_close > l || excess < min_excess || bar.high <= l {
                return None;
            }
            Direction::Long
        }
        LevelKind::Support => {
            let excess = (l - bar.close) / l;
            if prev_close < l || excess < min_excess || bar.low >= l {
                return None;
            }
            Direction::Short
        }
    };

    let mut strength = level.strength;
    let volume_ratio = bar.volume / avg_volume;
    if volume_ratio > 2.0 {
        strength += 1.0;
    } else if volume_ratio > 1.5 {
        strength += 0.5;
    }
    if let Some(atr) = record.indicators.atr().filter(|a| *a > 0.0) {
        if (bar.close - l).abs() / atr > 2.0 {
            strength += 0.5;
        }
    }
    Some((direction, strength))
}

/// Ordered backlog of pending breakouts, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakoutBook {
    pending: VecDeque<Breakout>,
}

impl BreakoutBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Age every pending breakout by one bar and remove the expired ones.
    pub fn age_and_expire(&mut self, max_age: usize) -> Vec<Breakout> {
        for b in self.pending.iter_mut() {
            b.age += 1;
        }
        let (expired, kept): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|b| b.age > max_age);
        self.pending = kept.into();
        expired
    }

    /// Scan all active levels for breaks on this bar.
    ///
    /// Returns the breakouts added to the backlog (duplicates of a pending
    /// breakout in the same direction within `level_tolerance` are skipped)
    /// together with any breakouts evicted to respect the capacity.
    pub fn scan(
        &mut self,
        levels: &LevelBook,
        prev_close: f64,
        record: &BarRecord,
        config: &StrategyConfig,
        ids: &mut IdGenerator,
    ) -> (Vec<Breakout>, Vec<Breakout>) {
        let mut added = Vec::new();
        let mut evicted = Vec::new();
        for level in levels.iter() {
            let Some((direction, strength)) = detect_break(level, prev_close, record, config) else {
                continue;
            };
            if self.is_duplicate(level.price, direction, config.level_tolerance) {
                continue;
            }
            let breakout = Breakout {
                id: ids.next_breakout(),
                level_price: level.price,
                level_strength: level.strength,
                breakout_price: record.bar.close,
                direction,
                strength,
                age: 0,
                flagged_at: record.index,
                flagged_time: record.bar.timestamp,
            };
            if self.pending.len() == MAX_PENDING_BREAKOUTS {
                if let Some(old) = self.pending.pop_front() {
                    evicted.push(old);
                }
            }
            self.pending.push_back(breakout.clone());
            added.push(breakout);
        }
        (added, evicted)
    }

    fn is_duplicate(&self, level_price: f64, direction: Direction, tolerance: f64) -> bool {
        self.pending.iter().any(|b| {
            b.direction == direction && (b.level_price - level_price).abs() / level_price <= tolerance
        })
    }

    /// Remove a breakout (consumed by a confirmed retest).
    pub fn take(&mut self, id: BreakoutId) -> Option<Breakout> {
        let pos = self.pending.iter().position(|b| b.id == id)?;
        self.pending.remove(pos)
    }

    pub fn pending(&self) -> impl Iterator<Item = &Breakout> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
