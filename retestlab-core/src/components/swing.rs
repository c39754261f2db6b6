//! Swing point tracker.
//!
//! A bar is a swing high when its high is strictly greater than the highs of
//! the `lookback` bars on either side (mirrored for lows). Because the right
//! half of the window is future bars, a swing is confirmed `lookback` bars
//! after the extremum, and nothing is emitted until `2 * lookback + 1` bars
//! are available.
//!
//! Strength starts at 1.0 and earns:
//! - +0.5 when the extremum bar's volume exceeds 1.2× its average
//! - +0.3 when it sits ≥2% (mean relative distance) from the last 5 swings
//!   of the same kind
//! - +0.2 when the extremum lies more than 1.5 ATR from the prior close
//!
//! capped at 3.0. Swings also require volume ≥ 0.8× average.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::BarWindow;

/// Maximum swings retained per kind; older ones are dropped FIFO.
pub const MAX_SWINGS_PER_KIND: usize = 50;

const MIN_VOLUME_RATIO: f64 = 0.8;
const STRONG_VOLUME_RATIO: f64 = 1.2;
const DISTINCT_DISTANCE: f64 = 0.02;
const DISTINCT_LOOKBACK: usize = 5;
const ATR_MOVE_MULTIPLE: f64 = 1.5;
const MAX_STRENGTH: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

/// A confirmed local extremum. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub kind: SwingKind,
    /// Stream index of the extremum bar.
    pub bar_index: usize,
    /// Stream index of the bar that confirmed it.
    pub confirmed_at: usize,
    pub volume_confirmed: bool,
    pub strength: f64,
}

/// Bounded swing-high and swing-low histories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwingTracker {
    highs: VecDeque<SwingPoint>,
    lows: VecDeque<SwingPoint>,
}

impl SwingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirm swings whose right-hand window just completed.
    ///
    /// Returns the newly confirmed swings (zero, one, or a high and a low).
    /// A window shorter than `2 * lookback + 1` is a no-op.
    pub fn update(&mut self, window: &BarWindow, lookback: usize) -> Vec<SwingPoint> {
        let mut found = Vec::new();
        let n = window.len();
        if lookback == 0 || n < 2 * lookback + 1 {
            return found;
        }
        let candidate = n - 1 - lookback;

        for kind in [SwingKind::High, SwingKind::Low] {
            if !is_extremum(window, candidate, lookback, kind) {
                continue;
            }
            let Some(swing) = self.build_swing(window, candidate, kind) else {
                continue;
            };
            self.insert(swing.clone());
            found.push(swing);
        }
        found
    }

    pub fn highs(&self) -> &VecDeque<SwingPoint> {
        &self.highs
    }

    pub fn lows(&self) -> &VecDeque<SwingPoint> {
        &self.lows
    }

    pub fn of_kind(&self, kind: SwingKind) -> &VecDeque<SwingPoint> {
        match kind {
            SwingKind::High => &self.highs,
            SwingKind::Low => &self.lows,
        }
    }

    /// The most recent `n` swings of `kind`, oldest first.
    pub fn recent(&self, kind: SwingKind, n: usize) -> impl Iterator<Item = &SwingPoint> {
        let list = self.of_kind(kind);
        list.iter().skip(list.len().saturating_sub(n))
    }

    /// Append a swing, evicting the oldest of its kind at capacity.
    pub fn insert(&mut self, swing: SwingPoint) {
        let list = match swing.kind {
            SwingKind::High => &mut self.highs,
            SwingKind::Low => &mut self.lows,
        };
        if list.len() == MAX_SWINGS_PER_KIND {
            list.pop_front();
        }
        list.push_back(swing);
    }

    fn build_swing(&self, window: &BarWindow, candidate: usize, kind: SwingKind) -> Option<SwingPoint> {
        let record = window.get(candidate)?;
        let bar = &record.bar;
        let avg_volume = record.indicators.avg_volume();

        if let Some(avg) = avg_volume {
            if bar.volume < avg * MIN_VOLUME_RATIO {
                return None;
            }
        }

        let price = match kind {
            SwingKind::High => bar.high,
            SwingKind::Low => bar.low,
        };

        let mut strength = 1.0;
        if let Some(avg) = avg_volume {
            if bar.volume > avg * STRONG_VOLUME_RATIO {
                strength += 0.5;
            }
        }

        let recent: Vec<&SwingPoint> = self.recent(kind, DISTINCT_LOOKBACK).collect();
        if !recent.is_empty() {
            let mean_distance = recent
                .iter()
                .map(|s| (price - s.price).abs() / price)
                .sum::<f64>()
                / recent.len() as f64;
            if mean_distance >= DISTINCT_DISTANCE {
                strength += 0.3;
            }
        }

        if let (Some(atr), Some(prev)) = (record.indicators.atr(), candidate.checked_sub(1).and_then(|i| window.get(i))) {
            if atr > 0.0 && (price - prev.bar.close).abs() / atr > ATR_MOVE_MULTIPLE {
                strength += 0.2;
            }
        }

        Some(SwingPoint {
            price,
            timestamp: bar.timestamp,
            kind,
            bar_index: record.index,
            confirmed_at: window.last().map_or(record.index, |r| r.index),
            volume_confirmed: avg_volume.map_or(false, |avg| bar.volume > avg),
            strength: f64::min(strength, MAX_STRENGTH),
        })
    }
}

/// Strict extremum over `lookback` bars on both sides of `candidate`.
fn is_extremum(window: &BarWindow, candidate: usize, lookback: usize, kind: SwingKind) -> bool {
    let Some(center) = window.get(candidate) else {
        return false;
    };
    let lo = candidate - lookback;
    let hi = candidate + lookback;
    (lo..=hi).filter(|&i| i != candidate).all(|i| match window.get(i) {
        Some(other) => match kind {
            SwingKind::High => other.bar.high < center.bar.high,
            SwingKind::Low => other.bar.low > center.bar.low,
        },
        None => false,
    })
}
