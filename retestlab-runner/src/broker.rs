//! Paper broker for backtests.
//!
//! Fills are immediate at the intent's reference price (the bar close).
//! Close requests fill at the current mark, which the runner sets to the
//! bar close before handing the bar to the engine. No commission or
//! slippage is modeled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use retestlab_core::broker::{Broker, BrokerPosition, OrderAction, OrderIntent};
use retestlab_core::domain::{Direction, OrderId, PositionId};
use retestlab_core::BrokerError;

/// One executed fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub position_id: PositionId,
    /// `Buy`/`Sell` for entries and partial reduces, `Close` for exits.
    pub action: OrderAction,
    pub size: u64,
    pub price: f64,
}

/// In-memory broker keyed by the engine's position ids.
///
/// Cash accounting:
/// - a long entry debits its notional and is refused beyond available cash
/// - a short entry credits its proceeds; covering debits at the mark
/// - partial reduces settle at the intent's reference price
///
/// Portfolio value is cash plus longs minus shorts, all at the mark.
#[derive(Debug, Clone)]
pub struct PaperBroker {
    cash: f64,
    mark: Option<f64>,
    positions: BTreeMap<PositionId, BrokerPosition>,
    fills: Vec<Fill>,
    next_order: u64,
}

impl PaperBroker {
    /// Flat account holding `initial_capital` in cash. No mark is set.
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            mark: None,
            positions: BTreeMap::new(),
            fills: Vec::new(),
            next_order: 1,
        }
    }

    /// Set the price used for valuation and for close fills. Non-finite or
    /// non-positive prices are ignored and the previous mark stays.
    pub fn mark(&mut self, price: f64) {
        if price.is_finite() && price > 0.0 {
            self.mark = Some(price);
        }
    }

    /// Every fill so far, oldest first.
    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn open_positions(&self) -> usize {
        self.positions.len()
    }

    fn record_fill(&mut self, position_id: PositionId, action: OrderAction, size: u64, price: f64) -> OrderId {
        let order_id = OrderId(format!("paper-{}", self.next_order));
        self.next_order += 1;
        self.fills.push(Fill {
            order_id: order_id.clone(),
            position_id,
            action,
            size,
            price,
        });
        order_id
    }

    fn open(&mut self, intent: &OrderIntent, direction: Direction) -> Result<OrderId, BrokerError> {
        let notional = intent.size as f64 * intent.reference_price;
        match direction {
            Direction::Long => {
                if notional > self.cash {
                    return Err(BrokerError::Rejected {
                        reason: format!("insufficient cash: need {notional:.2}, have {:.2}", self.cash),
                    });
                }
                self.cash -= notional;
            }
            Direction::Short => self.cash += notional,
        }
        self.positions.insert(
            intent.position_id,
            BrokerPosition {
                position_id: intent.position_id,
                direction,
                size: intent.size,
                entry_price: intent.reference_price,
            },
        );
        Ok(self.record_fill(intent.position_id, intent.action, intent.size, intent.reference_price))
    }

    fn reduce(&mut self, intent: &OrderIntent) -> Result<OrderId, BrokerError> {
        let Some(pos) = self.positions.get_mut(&intent.position_id) else {
            return Err(unknown(intent.position_id));
        };
        if intent.size >= pos.size {
            return Err(BrokerError::Rejected {
                reason: format!(
                    "reduce of {} would not leave a remainder on {} (size {})",
                    intent.size, intent.position_id, pos.size
                ),
            });
        }
        let closing_side = match pos.direction {
            Direction::Long => OrderAction::Sell,
            Direction::Short => OrderAction::Buy,
        };
        if intent.action != closing_side {
            return Err(BrokerError::Rejected {
                reason: format!("{} would add to {}", intent.action, intent.position_id),
            });
        }
        pos.size -= intent.size;
        let notional = intent.size as f64 * intent.reference_price;
        match pos.direction {
            Direction::Long => self.cash += notional,
            Direction::Short => self.cash -= notional,
        }
        Ok(self.record_fill(intent.position_id, intent.action, intent.size, intent.reference_price))
    }
}

fn unknown(position_id: PositionId) -> BrokerError {
    BrokerError::Rejected {
        reason: format!("unknown position {position_id}"),
    }
}

impl Broker for PaperBroker {
    fn cash(&self) -> f64 {
        self.cash
    }

    fn portfolio_value(&self) -> f64 {
        let Some(mark) = self.mark else {
            return self.cash;
        };
        self.positions.values().fold(self.cash, |acc, p| match p.direction {
            Direction::Long => acc + p.size as f64 * mark,
            Direction::Short => acc - p.size as f64 * mark,
        })
    }

    fn submit_order(&mut self, intent: &OrderIntent) -> Result<OrderId, BrokerError> {
        if intent.size == 0 {
            return Err(BrokerError::Rejected {
                reason: "zero size".into(),
            });
        }
        if !(intent.reference_price.is_finite() && intent.reference_price > 0.0) {
            return Err(BrokerError::Rejected {
                reason: format!("bad reference price {}", intent.reference_price),
            });
        }
        if self.positions.contains_key(&intent.position_id) {
            return self.reduce(intent);
        }
        match intent.action {
            OrderAction::Buy => self.open(intent, Direction::Long),
            OrderAction::Sell => self.open(intent, Direction::Short),
            OrderAction::Close => Err(unknown(intent.position_id)),
        }
    }

    fn open_position(&self, position_id: PositionId) -> Option<BrokerPosition> {
        self.positions.get(&position_id).cloned()
    }

    fn close_position(&mut self, position_id: PositionId) -> Result<(), BrokerError> {
        let Some(price) = self.mark else {
            return Err(BrokerError::Unavailable("no mark price".into()));
        };
        let Some(pos) = self.positions.remove(&position_id) else {
            return Err(unknown(position_id));
        };
        let notional = pos.size as f64 * price;
        match pos.direction {
            Direction::Long => self.cash += notional,
            Direction::Short => self.cash -= notional,
        }
        self.record_fill(position_id, OrderAction::Close, pos.size, price);
        Ok(())
    }

    fn name(&self) -> &str {
        "paper"
    }
}
