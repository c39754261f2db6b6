//! Engine: the per-bar state machine and its broker driver.
//!
//! [`step`] is the whole decision pipeline as a deterministic transition
//! over [`EngineState`]. [`Engine`] owns a config and a state, feeds bars
//! through `step`, and carries the resulting order intents out on a
//! [`Broker`].
//!
//! # Broker failures
//!
//! When an intent fails, the bar has still been observed: the window,
//! swings, levels, breakout backlog and regime stay advanced. The
//! position/risk book is rebuilt from its pre-bar value by replaying only
//! the commits that were executed before the failing one. The error carries
//! that executed part of the output, so trades the broker already closed
//! are never lost. The next bar resumes from a consistent book.

pub mod state;
pub mod step;

pub use state::{window_capacity, Commit, EngineState};
pub use step::{flatten, step, StepAction, StepOutput};

use tracing::{debug, warn};

use crate::broker::{Broker, OrderAction, OrderIntent};
use crate::components::risk::AccountSnapshot;
use crate::config::StrategyConfig;
use crate::domain::Bar;
use crate::error::{BrokerError, ConfigError, EngineError, SnapshotError};
use crate::indicators::IndicatorSnapshot;

/// Functional form of [`step`]: returns the next state instead of mutating.
pub fn advance(
    config: &StrategyConfig,
    state: &EngineState,
    bar: &Bar,
    indicators: &IndicatorSnapshot,
    account: &AccountSnapshot,
) -> Result<(EngineState, StepOutput), EngineError> {
    let mut next = state.clone();
    let out = step(config, &mut next, bar, indicators, account)?;
    Ok((next, out))
}

#[derive(Debug, Clone)]
pub struct Engine {
    config: StrategyConfig,
    state: EngineState,
}

impl Engine {
    /// Build an engine; the config is validated before anything else.
    pub fn new(config: StrategyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = EngineState::new(&config);
        Ok(Self { config, state })
    }

    /// Resume from a previously saved state.
    pub fn from_state(config: StrategyConfig, state: EngineState) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, state })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Serialize the state to JSON.
    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.state)
    }

    /// Rebuild an engine from [`Engine::snapshot_json`] output.
    pub fn restore_json(config: StrategyConfig, json: &str) -> Result<Self, SnapshotError> {
        let state: EngineState = serde_json::from_str(json)?;
        Ok(Self::from_state(config, state)?)
    }

    /// Feed one bar and execute the resulting intents on `broker`.
    ///
    /// Intents run in order and stop at the first broker failure. The
    /// returned [`EngineError::Broker`] carries everything executed before
    /// it; trades in there are closed at the broker and booked here.
    pub fn on_bar(
        &mut self,
        bar: &Bar,
        indicators: &IndicatorSnapshot,
        broker: &mut dyn Broker,
    ) -> Result<StepOutput, EngineError> {
        let account = AccountSnapshot {
            cash: broker.cash(),
            portfolio_value: broker.portfolio_value(),
        };
        let before = self.state.clone();
        let out = step(&self.config, &mut self.state, bar, indicators, &account)?;
        self.carry_out(out, &before, broker)
    }

    /// Close everything at the last close (end of data or shutdown).
    pub fn flatten(&mut self, broker: &mut dyn Broker) -> Result<StepOutput, EngineError> {
        let before = self.state.clone();
        let out = flatten(&mut self.state);
        self.carry_out(out, &before, broker)
    }

    fn carry_out(
        &mut self,
        mut out: StepOutput,
        before: &EngineState,
        broker: &mut dyn Broker,
    ) -> Result<StepOutput, EngineError> {
        let mut failure = None;
        for (i, action) in out.actions.iter().enumerate() {
            let Some(intent) = &action.intent else {
                continue;
            };
            if let Err(err) = execute(broker, intent) {
                warn!(
                    broker = broker.name(),
                    bar_index = out.bar_index,
                    action = %intent.action,
                    position_id = %intent.position_id,
                    error = %err,
                    "broker rejected intent, rolling back book"
                );
                failure = Some((i, err));
                break;
            }
        }

        let Some((done, source)) = failure else {
            log_events(&out);
            return Ok(out);
        };
        self.rollback(before, &out.actions[..done]);
        out.truncate_actions(done);
        log_events(&out);
        Err(EngineError::Broker {
            source,
            executed: Box::new(out),
        })
    }

    /// Restore the position/risk book to `before` and replay `done`.
    fn rollback(&mut self, before: &EngineState, done: &[StepAction]) {
        let stats = self.state.risk.retest_stats;
        self.state.positions = before.positions.clone();
        self.state.risk = before.risk.clone();
        for action in done {
            self.state.apply(&action.commit);
        }
        // retest outcomes happened regardless of execution
        self.state.risk.retest_stats.attempts = stats.attempts;
        self.state.risk.retest_stats.confirmed = stats.confirmed;
        self.state.risk.retest_stats.rejected = stats.rejected;
        debug!(
            positions = self.state.positions.len(),
            replayed = done.len(),
            "book restored"
        );
    }
}

fn log_events(out: &StepOutput) {
    for event in &out.events {
        event.log();
    }
}

fn execute(broker: &mut dyn Broker, intent: &OrderIntent) -> Result<(), BrokerError> {
    match intent.action {
        OrderAction::Close => broker.close_position(intent.position_id),
        OrderAction::Buy | OrderAction::Sell => broker.submit_order(intent).map(|_| ()),
    }
}
