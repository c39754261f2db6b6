//! Support/resistance level aggregation.
//!
//! Levels are a pure function of the recent swing history: each time a swing
//! is confirmed the book is rebuilt from the last `level_swing_window` swings
//! of each kind. Swing highs cluster into resistance, swing lows into support.
//!
//! A swing joins the first existing level that is within `level_tolerance`
//! of its price AND whose recomputed strength-weighted mean still lies within
//! tolerance of every member. Otherwise it founds a new level. This keeps the
//! level invariant (`|level.price - member.price| / level.price <= tolerance`)
//! true however the cluster drifts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::swing::{SwingKind, SwingPoint, SwingTracker};

/// Levels retained per kind after each rebuild.
pub const MAX_LEVELS_PER_KIND: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelKind {
    Support,
    Resistance,
}

impl LevelKind {
    pub fn swing_kind(self) -> SwingKind {
        match self {
            LevelKind::Support => SwingKind::Low,
            LevelKind::Resistance => SwingKind::High,
        }
    }
}

/// A clustered price band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Strength-weighted mean of member prices.
    pub price: f64,
    pub kind: LevelKind,
    /// Member swings in confirmation order.
    pub members: Vec<SwingPoint>,
    /// Sum of member strengths.
    pub strength: f64,
    pub last_touch: DateTime<Utc>,
    /// Stream index of the most recent member.
    pub last_touch_index: usize,
}

impl Level {
    fn founded_by(swing: &SwingPoint, kind: LevelKind) -> Self {
        Self {
            price: swing.price,
            kind,
            members: vec![swing.clone()],
            strength: swing.strength,
            last_touch: swing.timestamp,
            last_touch_index: swing.bar_index,
        }
    }

    pub fn touches(&self) -> usize {
        self.members.len()
    }

    /// Relative distance of `price` from this level.
    pub fn distance(&self, price: f64) -> f64 {
        (price - self.price).abs() / self.price
    }

    /// Largest relative distance from the level to any member.
    pub fn max_member_deviation(&self) -> f64 {
        self.members
            .iter()
            .map(|m| self.distance(m.price))
            .fold(0.0, f64::max)
    }

    /// Try to absorb `swing`. Returns false (and leaves the level untouched)
    /// when the recomputed mean would push any member out of tolerance.
    fn try_join(&mut self, swing: &SwingPoint, tolerance: f64) -> bool {
        if self.distance(swing.price) > tolerance {
            return false;
        }
        let strength = self.strength + swing.strength;
        if strength <= 0.0 {
            return false;
        }
        let weighted: f64 = self
            .members
            .iter()
            .chain(std::iter::once(swing))
            .map(|m| m.price * m.strength)
            .sum();
        let price = weighted / strength;
        let fits = self
            .members
            .iter()
            .chain(std::iter::once(swing))
            .all(|m| (price - m.price).abs() / price <= tolerance);
        if !fits {
            return false;
        }

        self.price = price;
        self.strength = strength;
        self.members.push(swing.clone());
        if swing.bar_index >= self.last_touch_index {
            self.last_touch = swing.timestamp;
            self.last_touch_index = swing.bar_index;
        }
        true
    }
}

/// Cluster swings of one kind into levels, filter, and rank.
///
/// Levels weaker than `min_strength` are dropped; at most
/// [`MAX_LEVELS_PER_KIND`] survive, strongest first, ties broken by the more
/// recent touch.
pub fn cluster_levels<'a>(
    swings: impl IntoIterator<Item = &'a SwingPoint>,
    kind: LevelKind,
    tolerance: f64,
    min_strength: f64,
) -> Vec<Level> {
    let mut levels: Vec<Level> = Vec::new();
    for swing in swings {
        if swing.price <= 0.0 || !swing.price.is_finite() {
            continue;
        }
        let joined = levels.iter_mut().any(|level| level.try_join(swing, tolerance));
        if !joined {
            levels.push(Level::founded_by(swing, kind));
        }
    }

    levels.retain(|l| l.strength >= min_strength);
    levels.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then(b.last_touch_index.cmp(&a.last_touch_index))
    });
    levels.truncate(MAX_LEVELS_PER_KIND);
    levels
}

/// Active support and resistance levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelBook {
    support: Vec<Level>,
    resistance: Vec<Level>,
}

impl LevelBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute both sides from the most recent `window` swings of each kind.
    pub fn rebuild(&mut self, swings: &SwingTracker, window: usize, tolerance: f64, min_strength: f64) {
        self.support = cluster_levels(
            swings.recent(SwingKind::Low, window),
            LevelKind::Support,
            tolerance,
            min_strength,
        );
        self.resistance = cluster_levels(
            swings.recent(SwingKind::High, window),
            LevelKind::Resistance,
            tolerance,
            min_strength,
        );
    }

    /// Build a book from precomputed levels.
    pub fn from_levels(support: Vec<Level>, resistance: Vec<Level>) -> Self {
        Self {
            support,
            resistance,
        }
    }

    pub fn support(&self) -> &[Level] {
        &self.support
    }

    pub fn resistance(&self) -> &[Level] {
        &self.resistance
    }

    pub fn of_kind(&self, kind: LevelKind) -> &[Level] {
        match kind {
            LevelKind::Support => &self.support,
            LevelKind::Resistance => &self.resistance,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Level> {
        self.resistance.iter().chain(self.support.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.support.is_empty() && self.resistance.is_empty()
    }
}
