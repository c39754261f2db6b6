use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-assigned breakout identifier, unique within one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakoutId(pub u64);

impl fmt::Display for BreakoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "brk-{}", self.0)
    }
}

/// Engine-assigned position identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos-{}", self.0)
    }
}

/// Broker-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source owned by the engine state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdGenerator {
    next_breakout: u64,
    next_position: u64,
}

impl IdGenerator {
    pub fn next_breakout(&mut self) -> BreakoutId {
        self.next_breakout += 1;
        BreakoutId(self.next_breakout)
    }

    pub fn next_position(&mut self) -> PositionId {
        self.next_position += 1;
        PositionId(self.next_position)
    }
}
