//! Domain types for the breakout-retest engine.

pub mod bar;
pub mod direction;
pub mod ids;
pub mod trade;
pub mod window;

pub use bar::Bar;
pub use direction::Direction;
pub use ids::{BreakoutId, IdGenerator, OrderId, PositionId};
pub use trade::{ExitReason, TradeRecord};
pub use window::{BarRecord, BarWindow};
