//! Stop ratchet.
//!
//! **Core rule:** stops may tighten, never loosen, even when ATR expands.
//! - Long: the stop can only rise
//! - Short: the stop can only fall
//!
//! A tightened stop must also stay on the loss side of the reference price,
//! otherwise it would close the position on the bar that moved it.

use crate::domain::Direction;

/// Apply the ratchet to a proposed stop.
///
/// Returns `Some(new_stop)` only when `proposed` tightens `current` and still
/// lies strictly on the loss side of `reference`.
pub fn tighten(direction: Direction, current: f64, proposed: f64, reference: f64) -> Option<f64> {
    if !proposed.is_finite() {
        return None;
    }
    let tighter = match direction {
        Direction::Long => proposed > current && proposed < reference,
        Direction::Short => proposed < current && proposed > reference,
    };
    tighter.then_some(proposed)
}

/// The tighter of two candidate stops.
pub fn tightest(direction: Direction, a: f64, b: f64) -> f64 {
    match direction {
        Direction::Long => a.max(b),
        Direction::Short => a.min(b),
    }
}
