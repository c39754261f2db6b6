//! Retest confirmation checks.
//!
//! Three independent binary checks, each a pure function:
//! - **Pattern**: engulfing, hammer / shooting star, or a simple reversal
//!   candle in the trade direction
//! - **Momentum**: the oscillator turned by at least `momentum_threshold` in
//!   the trade direction while sitting strictly between the floor and ceiling
//! - **Volume**: bar volume ≥ 0.8× its average
//!
//! The share of enabled checks that pass must reach a regime-dependent
//! threshold. Disabled checks leave the denominator; volume always counts.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::regime::{RegimeState, TrendClass};
use crate::config::StrategyConfig;
use crate::domain::{Bar, Direction};

const MAX_BODY_RATIO: f64 = 0.3;
const MIN_SHADOW_RATIO: f64 = 0.6;
const MIN_VOLUME_RATIO: f64 = 0.8;

/// A retest check that did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationFailure {
    /// Price touched the level but did not bounce far enough.
    NoBounce,
    Pattern,
    Momentum,
    Volume,
}

impl fmt::Display for ConfirmationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationFailure::NoBounce => write!(f, "NoBounce"),
            ConfirmationFailure::Pattern => write!(f, "Pattern"),
            ConfirmationFailure::Momentum => write!(f, "Momentum"),
            ConfirmationFailure::Volume => write!(f, "Volume"),
        }
    }
}

/// Outcome of scoring one retest bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationScore {
    pub passed: usize,
    pub total: usize,
    pub required: f64,
    pub failed: Vec<ConfirmationFailure>,
}

impl ConfirmationScore {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total as f64
    }

    pub fn is_confirmed(&self) -> bool {
        self.total > 0 && self.fraction() >= self.required
    }
}

// ─── Candlestick patterns ───────────────────────────────────────────

pub fn bullish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.is_bearish() && curr.is_bullish() && curr.open < prev.close && curr.close > prev.open
}

pub fn bearish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.is_bullish() && curr.is_bearish() && curr.open > prev.close && curr.close < prev.open
}

/// Small body with a long lower shadow.
pub fn hammer(bar: &Bar) -> bool {
    let range = bar.range();
    range > 0.0 && bar.body() / range < MAX_BODY_RATIO && bar.lower_shadow() / range > MIN_SHADOW_RATIO
}

/// Small body with a long upper shadow.
pub fn shooting_star(bar: &Bar) -> bool {
    let range = bar.range();
    range > 0.0 && bar.body() / range < MAX_BODY_RATIO && bar.upper_shadow() / range > MIN_SHADOW_RATIO
}

/// A candle in `direction` following one against it.
pub fn simple_reversal(prev: &Bar, curr: &Bar, direction: Direction) -> bool {
    match direction {
        Direction::Long => prev.is_bearish() && curr.is_bullish(),
        Direction::Short => prev.is_bullish() && curr.is_bearish(),
    }
}

/// Any directional pattern. Without a previous bar only single-candle
/// patterns can match.
pub fn pattern_confirms(prev: Option<&Bar>, curr: &Bar, direction: Direction) -> bool {
    let two_bar = prev.map_or(false, |p| match direction {
        Direction::Long => bullish_engulfing(p, curr) || simple_reversal(p, curr, direction),
        Direction::Short => bearish_engulfing(p, curr) || simple_reversal(p, curr, direction),
    });
    two_bar
        || match direction {
            Direction::Long => hammer(curr),
            Direction::Short => shooting_star(curr),
        }
}

// ─── Momentum / volume ──────────────────────────────────────────────

pub fn momentum_confirms(
    prev: Option<f64>,
    curr: Option<f64>,
    direction: Direction,
    config: &StrategyConfig,
) -> bool {
    let (Some(prev), Some(curr)) = (prev, curr) else {
        return false;
    };
    if curr <= config.momentum_floor || curr >= config.momentum_ceiling {
        return false;
    }
    let change = curr - prev;
    match direction {
        Direction::Long => change >= config.momentum_threshold,
        Direction::Short => -change >= config.momentum_threshold,
    }
}

pub fn volume_confirms(volume: f64, avg_volume: Option<f64>) -> bool {
    match avg_volume {
        Some(avg) if avg > 0.0 => volume >= MIN_VOLUME_RATIO * avg,
        _ => false,
    }
}

// ─── Thresholds ─────────────────────────────────────────────────────

/// Confirmed fraction required under `regime`.
pub fn required_fraction(regime: &RegimeState, config: &StrategyConfig) -> f64 {
    let t = &config.confirmation_thresholds;
    match regime.trend_class {
        TrendClass::Trending if regime.trend_strength >= config.strong_trend_threshold => {
            t.trending_strong
        }
        TrendClass::Trending => t.trending_weak,
        TrendClass::Ranging => t.ranging,
        TrendClass::Unknown => t.unknown,
    }
}

/// Inputs for scoring one retest bar.
#[derive(Debug, Clone, Copy)]
pub struct RetestBar<'a> {
    pub prev: Option<&'a Bar>,
    pub curr: &'a Bar,
    pub prev_momentum: Option<f64>,
    pub momentum: Option<f64>,
    pub avg_volume: Option<f64>,
}

/// Score the enabled checks for a retest in `direction`.
pub fn score(
    input: &RetestBar<'_>,
    direction: Direction,
    regime: &RegimeState,
    config: &StrategyConfig,
) -> ConfirmationScore {
    let mut passed = 0;
    let mut total = 0;
    let mut failed = Vec::new();

    if config.require_pattern_confirmation {
        total += 1;
        if pattern_confirms(input.prev, input.curr, direction) {
            passed += 1;
        } else {
            failed.push(ConfirmationFailure::Pattern);
        }
    }
    if config.require_momentum_confirmation {
        total += 1;
        if momentum_confirms(input.prev_momentum, input.momentum, direction, config) {
            passed += 1;
        } else {
            failed.push(ConfirmationFailure::Momentum);
        }
    }
    total += 1;
    if volume_confirms(input.curr.volume, input.avg_volume) {
        passed += 1;
    } else {
        failed.push(ConfirmationFailure::Volume);
    }

    ConfirmationScore {
        passed,
        total,
        required: required_fraction(regime, config),
        failed,
    }
}
