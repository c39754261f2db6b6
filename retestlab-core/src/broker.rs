//! Broker/portfolio collaborator interface.
//!
//! The engine emits [`OrderIntent`]s; a [`Broker`] implementation executes
//! them. Backtests use an immediate-fill paper broker. Live adapters must
//! reconcile asynchronous fills before the next bar is processed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{Direction, OrderId, PositionId};
use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
    /// Close the remaining size of a position.
    Close,
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderAction::Buy => write!(f, "BUY"),
            OrderAction::Sell => write!(f, "SELL"),
            OrderAction::Close => write!(f, "CLOSE"),
        }
    }
}

/// An instruction for the broker. Stop and target are informational; the
/// engine manages exits itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub action: OrderAction,
    pub size: u64,
    pub position_id: PositionId,
    /// Close of the bar that produced the intent.
    pub reference_price: f64,
    pub stop_price: Option<f64>,
    pub target_price: Option<f64>,
    pub reason: String,
}

impl OrderIntent {
    /// Open a position in `direction`.
    pub fn entry(
        direction: Direction,
        size: u64,
        position_id: PositionId,
        price: f64,
        stop: f64,
        target: f64,
    ) -> Self {
        let action = match direction {
            Direction::Long => OrderAction::Buy,
            Direction::Short => OrderAction::Sell,
        };
        Self {
            action,
            size,
            position_id,
            reference_price: price,
            stop_price: Some(stop),
            target_price: Some(target),
            reason: format!("retest entry {direction}"),
        }
    }

    /// Reduce a position by `size` units (partial profit).
    pub fn reduce(direction: Direction, size: u64, position_id: PositionId, price: f64) -> Self {
        let action = match direction {
            Direction::Long => OrderAction::Sell,
            Direction::Short => OrderAction::Buy,
        };
        Self {
            action,
            size,
            position_id,
            reference_price: price,
            stop_price: None,
            target_price: None,
            reason: "partial profit".to_string(),
        }
    }

    pub fn close(size: u64, position_id: PositionId, price: f64, reason: impl Into<String>) -> Self {
        Self {
            action: OrderAction::Close,
            size,
            position_id,
            reference_price: price,
            stop_price: None,
            target_price: None,
            reason: reason.into(),
        }
    }
}

/// Position as the broker sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub position_id: PositionId,
    pub direction: Direction,
    pub size: u64,
    pub entry_price: f64,
}

/// Synchronous broker/portfolio interface.
pub trait Broker: Send {
    fn cash(&self) -> f64;

    fn portfolio_value(&self) -> f64;

    fn submit_order(&mut self, intent: &OrderIntent) -> Result<OrderId, BrokerError>;

    /// The broker's view of `position_id`, if it is open.
    fn open_position(&self, position_id: PositionId) -> Option<BrokerPosition>;

    fn close_position(&mut self, position_id: PositionId) -> Result<(), BrokerError>;

    /// Broker name for logging.
    fn name(&self) -> &str;
}
