//! Decision components, leaves first.
//!
//! Each stage is a plain data structure plus pure functions, so every stage
//! is testable without an engine or broker:
//! - [`swing`]: confirmed local extrema
//! - [`levels`]: support/resistance clustering
//! - [`regime`]: trend and volatility classification
//! - [`breakout`]: level breaks held pending retest
//! - [`confirmation`] and [`retest`]: regime-adaptive retest scoring
//! - [`risk`], [`position`], [`ratchet`]: gating, sizing, and exits

pub mod breakout;
pub mod confirmation;
pub mod levels;
pub mod position;
pub mod ratchet;
pub mod regime;
pub mod retest;
pub mod risk;
pub mod swing;

pub use breakout::{Breakout, BreakoutBook};
pub use confirmation::{ConfirmationFailure, ConfirmationScore};
pub use levels::{Level, LevelBook, LevelKind};
pub use position::{Position, PositionAction};
pub use regime::{RegimeState, TrendClass, VolatilityClass};
pub use retest::{EntryTrigger, RetestEvaluation};
pub use risk::{AccountSnapshot, Rejection, RejectionReason, RetestStats, RiskState};
pub use swing::{SwingKind, SwingPoint, SwingTracker};
