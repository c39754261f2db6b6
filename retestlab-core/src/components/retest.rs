//! Retest confirmation engine.
//!
//! Each bar, every pending breakout at least one bar old is checked for a
//! retest. A long retest touches when the bar's low comes within
//! `retest_tolerance` of the level (the high, for shorts). A touch must then
//! bounce: close beyond `level × (1 ± min_retest_bounce)` with a body in the
//! trade direction. A bouncing touch is scored by
//! [`confirmation::score`](super::confirmation::score); reaching the regime
//! threshold confirms the breakout and produces an [`EntryTrigger`].
//!
//! State machine per breakout: PENDING → CONFIRMED (removed, trigger
//! emitted) or PENDING → EXPIRED (removed by the breakout backlog). A failed
//! evaluation leaves it PENDING.

use serde::{Deserialize, Serialize};

use super::breakout::Breakout;
use super::confirmation::{self, ConfirmationFailure, ConfirmationScore, RetestBar};
use super::regime::RegimeState;
use crate::config::StrategyConfig;
use crate::domain::{Bar, Direction};

/// Result of evaluating one touched breakout on one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetestEvaluation {
    pub score: ConfirmationScore,
    pub bounced: bool,
}

impl RetestEvaluation {
    pub fn is_confirmed(&self) -> bool {
        self.bounced && self.score.is_confirmed()
    }
}

/// A confirmed retest handed to the risk manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryTrigger {
    pub breakout: Breakout,
    pub direction: Direction,
    pub level_price: f64,
    pub entry_price: f64,
    pub regime: RegimeState,
    pub score: ConfirmationScore,
}

/// Did the bar come back to the broken level?
pub fn touched(breakout: &Breakout, bar: &Bar, tolerance: f64) -> bool {
    let lo = breakout.level_price * (1.0 - tolerance);
    let hi = breakout.level_price * (1.0 + tolerance);
    let touch = match breakout.direction {
        Direction::Long => bar.low,
        Direction::Short => bar.high,
    };
    touch >= lo && touch <= hi
}

/// Did the bar close away from the level in the trade direction?
pub fn bounced(breakout: &Breakout, bar: &Bar, min_bounce: f64) -> bool {
    match breakout.direction {
        Direction::Long => {
            bar.close > breakout.level_price * (1.0 + min_bounce) && bar.is_bullish()
        }
        Direction::Short => {
            bar.close < breakout.level_price * (1.0 - min_bounce) && bar.is_bearish()
        }
    }
}

/// Evaluate a pending breakout against the current bar.
///
/// Returns `None` when the bar does not touch the level (nothing to report).
pub fn evaluate(
    breakout: &Breakout,
    input: &RetestBar<'_>,
    regime: &RegimeState,
    config: &StrategyConfig,
) -> Option<RetestEvaluation> {
    if breakout.age == 0 || !touched(breakout, input.curr, config.retest_tolerance) {
        return None;
    }
    if !bounced(breakout, input.curr, config.min_retest_bounce) {
        let total = 1
            + usize::from(config.require_pattern_confirmation)
            + usize::from(config.require_momentum_confirmation);
        return Some(RetestEvaluation {
            score: ConfirmationScore {
                passed: 0,
                total,
                required: confirmation::required_fraction(regime, config),
                failed: vec![ConfirmationFailure::NoBounce],
            },
            bounced: false,
        });
    }
    Some(RetestEvaluation {
        score: confirmation::score(input, breakout.direction, regime, config),
        bounced: true,
    })
}
