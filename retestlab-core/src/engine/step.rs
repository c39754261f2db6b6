//! One bar through the pipeline.
//!
//! Per bar, in order:
//! 1. admit the bar into the window
//! 2. classify the regime
//! 3. confirm swings, rebuild levels when any were found
//! 4. age the breakout backlog and purge expired breakouts
//! 5. scan for new breakouts
//! 6. evaluate retests; confirmed ones go through gating and sizing
//! 7. manage positions opened on earlier bars
//!
//! Gating in step 6 sees the positions open at the start of the bar, so a
//! position stopped out on this bar still holds its slot. Entry intents are
//! emitted ahead of exit intents, which keeps the account snapshot taken
//! before the bar valid for every entry the broker executes.
//!
//! [`step`] does no I/O and touches nothing outside `state`, so the same
//! state and inputs always give the same output.

use crate::broker::OrderIntent;
use crate::components::confirmation::RetestBar;
use crate::components::position::{self, PositionAction};
use crate::components::regime;
use crate::components::retest::{self, EntryTrigger};
use crate::components::risk::{self, AccountSnapshot, GateInput, RecentEntry, RejectionReason, SizingInput};
use crate::components::Position;
use crate::config::StrategyConfig;
use crate::domain::{Bar, BarRecord, ExitReason, TradeRecord};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::indicators::IndicatorSnapshot;

use super::state::{Commit, EngineState};

/// A book change and the order that carries it out, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct StepAction {
    pub commit: Commit,
    pub intent: Option<OrderIntent>,
}

impl StepAction {
    /// Does `event` report this action's book change?
    pub fn reports(&self, event: &EngineEvent) -> bool {
        match (&self.commit, event) {
            (Commit::Open { position, .. }, EngineEvent::PositionOpened { position_id, .. }) => {
                position.id == *position_id
            }
            (Commit::Reduce { position_id, .. }, EngineEvent::PartialClosed { position_id: id, .. }) => {
                position_id == id
            }
            (
                Commit::TightenStop { position_id, to },
                EngineEvent::StopTightened {
                    position_id: id,
                    to: new_stop,
                    ..
                },
            ) => position_id == id && to == new_stop,
            (Commit::Close { position_id, .. }, EngineEvent::PositionClosed { trade, .. }) => {
                *position_id == trade.position_id
            }
            _ => false,
        }
    }
}

/// Everything a step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub bar_index: usize,
    pub events: Vec<EngineEvent>,
    pub actions: Vec<StepAction>,
    pub closed_trades: Vec<TradeRecord>,
}

impl StepOutput {
    fn new(bar_index: usize) -> Self {
        Self {
            bar_index,
            ..Default::default()
        }
    }

    /// Orders to send to the broker, in execution order.
    pub fn intents(&self) -> impl Iterator<Item = &OrderIntent> {
        self.actions.iter().filter_map(|a| a.intent.as_ref())
    }

    pub fn entries(&self) -> impl Iterator<Item = &EngineEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, EngineEvent::PositionOpened { .. }))
    }

    /// Keep only the first `done` actions, plus the events and trades that
    /// report them. Market-side events (swings, levels, breakouts, retests,
    /// rejections) are kept whole.
    pub fn truncate_actions(&mut self, done: usize) {
        if done >= self.actions.len() {
            return;
        }
        let dropped = self.actions.split_off(done);
        self.events.retain(|e| !dropped.iter().any(|a| a.reports(e)));
        self.closed_trades.retain(|t| {
            !dropped
                .iter()
                .any(|a| matches!(&a.commit, Commit::Close { position_id, .. } if *position_id == t.position_id))
        });
    }
}

/// Advance `state` by one bar.
///
/// An invalid or out-of-order bar returns [`EngineError::InvalidBar`] and
/// leaves `state` untouched.
pub fn step(
    config: &StrategyConfig,
    state: &mut EngineState,
    bar: &Bar,
    indicators: &IndicatorSnapshot,
    account: &AccountSnapshot,
) -> Result<StepOutput, EngineError> {
    state.validate_bar(bar)?;

    let index = state.bars_seen;
    let prev_close = state.window.last().map(|r| r.bar.close);
    let record = BarRecord {
        index,
        bar: bar.clone(),
        indicators: *indicators,
    };
    state.window.push(record.clone());
    state.bars_seen += 1;
    state.last_timestamp = Some(bar.timestamp);

    let mut out = StepOutput::new(index);

    state.regime = regime::classify(&state.window.recent_closes(config.regime_lookback), config);

    let found = state.swings.update(&state.window, config.lookback_period);
    if !found.is_empty() {
        for s in &found {
            out.events.push(EngineEvent::SwingFound {
                bar_index: index,
                kind: s.kind,
                price: s.price,
                strength: s.strength,
            });
        }
        state.levels.rebuild(
            &state.swings,
            config.level_swing_window,
            config.level_tolerance,
            config.min_level_strength,
        );
        out.events.push(EngineEvent::LevelsUpdated {
            bar_index: index,
            support: state.levels.support().iter().map(|l| l.price).collect(),
            resistance: state.levels.resistance().iter().map(|l| l.price).collect(),
        });
    }

    for b in state.breakouts.age_and_expire(config.max_breakout_age) {
        out.events.push(EngineEvent::BreakoutExpired {
            bar_index: index,
            breakout_id: b.id,
            level_price: b.level_price,
            age: b.age,
        });
    }

    if let Some(prev_close) = prev_close {
        let (added, evicted) =
            state
                .breakouts
                .scan(&state.levels, prev_close, &record, config, &mut state.ids);
        for b in added {
            out.events.push(EngineEvent::BreakoutFlagged {
                bar_index: index,
                breakout_id: b.id,
                direction: b.direction,
                level_price: b.level_price,
                breakout_price: b.breakout_price,
                strength: b.strength,
            });
        }
        for b in evicted {
            out.events.push(EngineEvent::BreakoutExpired {
                bar_index: index,
                breakout_id: b.id,
                level_price: b.level_price,
                age: b.age,
            });
        }
    }

    for trigger in evaluate_retests(config, state, &record, &mut out) {
        try_enter(config, state, &record, trigger, account, &mut out);
    }

    manage_positions(config, state, &record, &mut out);

    Ok(out)
}

/// Close every open position at the last admitted close.
///
/// Used by hosts at end of data or shutdown. Returns an empty output when
/// nothing is open or no bar has been seen.
pub fn flatten(state: &mut EngineState) -> StepOutput {
    let Some(record) = state.window.last().cloned() else {
        return StepOutput::default();
    };
    let mut out = StepOutput::new(record.index);
    let open: Vec<Position> = state.positions.clone();
    for pos in open {
        close_position(state, &pos, &record, record.bar.close, ExitReason::Flatten, &mut out);
    }
    out
}

// ─── Stages ─────────────────────────────────────────────────────────

fn manage_positions(config: &StrategyConfig, state: &mut EngineState, record: &BarRecord, out: &mut StepOutput) {
    let ids: Vec<_> = state
        .positions
        .iter()
        .filter(|p| p.entry_bar < record.index)
        .map(|p| p.id)
        .collect();

    for id in ids {
        let Some(pos) = state.positions.iter_mut().find(|p| p.id == id) else {
            continue;
        };
        let actions = position::manage(pos, record, &state.swings, config);
        let snapshot = pos.clone();

        for action in actions {
            match action {
                PositionAction::PartialExit { size, price, pnl } => {
                    out.events.push(EngineEvent::PartialClosed {
                        bar_index: record.index,
                        position_id: id,
                        size,
                        price,
                        pnl,
                    });
                    out.actions.push(StepAction {
                        commit: Commit::Reduce {
                            position_id: id,
                            size,
                            pnl,
                        },
                        intent: Some(OrderIntent::reduce(snapshot.direction, size, id, price)),
                    });
                }
                PositionAction::StopTightened { from, to } => {
                    out.events.push(EngineEvent::StopTightened {
                        bar_index: record.index,
                        position_id: id,
                        from,
                        to,
                    });
                    out.actions.push(StepAction {
                        commit: Commit::TightenStop { position_id: id, to },
                        intent: None,
                    });
                }
                PositionAction::Exit { reason, price } => {
                    close_position(state, &snapshot, record, price, reason, out);
                }
            }
        }
    }
}

fn close_position(
    state: &mut EngineState,
    pos: &Position,
    record: &BarRecord,
    price: f64,
    reason: ExitReason,
    out: &mut StepOutput,
) {
    let trade = pos.close(record, price, reason);
    let commit = Commit::Close {
        position_id: pos.id,
        trade: trade.clone(),
    };
    state.apply(&commit);
    out.actions.push(StepAction {
        commit,
        intent: Some(OrderIntent::close(pos.size, pos.id, price, reason.to_string())),
    });
    out.events.push(EngineEvent::PositionClosed {
        bar_index: record.index,
        reason,
        trade: trade.clone(),
    });
    out.closed_trades.push(trade);
}

fn evaluate_retests(
    config: &StrategyConfig,
    state: &mut EngineState,
    record: &BarRecord,
    out: &mut StepOutput,
) -> Vec<EntryTrigger> {
    let prev = state.window.previous().cloned();
    let input = RetestBar {
        prev: prev.as_ref().map(|r| &r.bar),
        curr: &record.bar,
        prev_momentum: prev.as_ref().and_then(|r| r.indicators.momentum()),
        momentum: record.indicators.momentum(),
        avg_volume: record.indicators.avg_volume(),
    };

    let pending: Vec<_> = state.breakouts.pending().cloned().collect();
    let mut triggers = Vec::new();
    for breakout in pending {
        let Some(eval) = retest::evaluate(&breakout, &input, &state.regime, config) else {
            continue;
        };
        state.risk.retest_stats.attempts += 1;
        if eval.is_confirmed() {
            state.risk.retest_stats.confirmed += 1;
            state.breakouts.take(breakout.id);
            out.events.push(EngineEvent::RetestConfirmed {
                bar_index: record.index,
                breakout_id: breakout.id,
                direction: breakout.direction,
                level_price: breakout.level_price,
                fraction: eval.score.fraction(),
                required: eval.score.required,
                regime: state.regime,
            });
            triggers.push(EntryTrigger {
                direction: breakout.direction,
                level_price: breakout.level_price,
                entry_price: record.bar.close,
                regime: state.regime,
                score: eval.score,
                breakout,
            });
        } else {
            state.risk.retest_stats.rejected += 1;
            out.events.push(EngineEvent::RetestRejected {
                bar_index: record.index,
                breakout_id: breakout.id,
                level_price: breakout.level_price,
                fraction: eval.score.fraction(),
                required: eval.score.required,
                failed: eval.score.failed,
            });
        }
    }
    triggers
}

fn try_enter(
    config: &StrategyConfig,
    state: &mut EngineState,
    record: &BarRecord,
    trigger: EntryTrigger,
    account: &AccountSnapshot,
    out: &mut StepOutput,
) {
    let committed_cash: f64 = out
        .actions
        .iter()
        .filter_map(|a| match &a.commit {
            Commit::Open { position, .. } => Some(position.entry_price * position.size as f64),
            _ => None,
        })
        .sum();
    let cash = account.cash - committed_cash;

    let gate = GateInput {
        bar_index: record.index,
        direction: trigger.direction,
        price: trigger.entry_price,
        level_price: trigger.level_price,
        atr: record.indicators.atr(),
        trend_ma: record.indicators.trend_ma(),
        cash,
        open_positions: state.positions.len(),
    };
    if let Err(rejection) = risk::check_entry(&gate, &state.risk, config) {
        out.events.push(EngineEvent::EntryRejected {
            bar_index: record.index,
            breakout_id: trigger.breakout.id,
            reason: rejection.reason,
            context: rejection.context,
        });
        return;
    }
    let Some(atr) = gate.atr else {
        return;
    };

    let entry = trigger.entry_price;
    let stop = risk::initial_stop(trigger.direction, entry, atr, &state.swings, config);
    let target = risk::initial_target(trigger.direction, entry, stop, &state.levels, &state.swings, config);
    let size = risk::position_size(
        &SizingInput {
            portfolio_value: account.portfolio_value,
            cash,
            entry,
            stop,
            volatility_multiplier: trigger.regime.volatility_multiplier(),
            consecutive_losses: state.risk.consecutive_losses,
            open_risk: state.open_risk(),
        },
        config,
    );
    if size == 0 {
        out.events.push(EngineEvent::EntryRejected {
            bar_index: record.index,
            breakout_id: trigger.breakout.id,
            reason: RejectionReason::RiskLimitExceeded,
            context: format!(
                "entry={entry:.4}, stop={stop:.4}, open_risk={:.2}, portfolio={:.2}",
                state.open_risk(),
                account.portfolio_value
            ),
        });
        return;
    }

    let position = Position {
        id: state.ids.next_position(),
        breakout_id: trigger.breakout.id,
        direction: trigger.direction,
        entry_price: entry,
        entry_time: record.bar.timestamp,
        entry_bar: record.index,
        size,
        initial_size: size,
        stop_price: stop,
        initial_stop: stop,
        target_price: target,
        breakout_level: trigger.level_price,
        regime_snapshot: trigger.regime,
        confirmation: trigger.score,
        partial_taken: false,
        realized_pnl: 0.0,
    };
    out.events.push(EngineEvent::PositionOpened {
        bar_index: record.index,
        position_id: position.id,
        breakout_id: position.breakout_id,
        direction: position.direction,
        entry_price: entry,
        size,
        stop_price: stop,
        target_price: target,
        level_price: trigger.level_price,
        regime: trigger.regime,
    });
    let intent = OrderIntent::entry(position.direction, size, position.id, entry, stop, target);
    let commit = Commit::Open {
        entry: RecentEntry {
            bar_index: record.index,
            price: entry,
            level_price: trigger.level_price,
        },
        position,
    };
    state.apply(&commit);
    out.actions.push(StepAction {
        commit,
        intent: Some(intent),
    });
}
