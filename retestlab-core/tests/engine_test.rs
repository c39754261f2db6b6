//! Integration tests for the engine driver.
//!
//! Tests:
//! 1. Bar admission: malformed and out-of-order bars leave state untouched
//! 2. Broker failures: the book is rolled back, market state stays advanced,
//!    and whatever the broker did execute is handed back
//! 3. Position lifecycle through the broker: entry, time exit, flatten
//! 4. Same-bar ordering and portfolio risk with positions already open
//! 5. Snapshot/restore: a restored engine makes identical decisions

mod common;

use common::*;
use retestlab_core::broker::{Broker, BrokerPosition, OrderAction, OrderIntent};
use retestlab_core::components::{ConfirmationScore, Position, RegimeState, RejectionReason};
use retestlab_core::domain::{Bar, BreakoutId, Direction, ExitReason, OrderId, PositionId};
use retestlab_core::engine::{Commit, Engine};
use retestlab_core::events::EngineEvent;
use retestlab_core::indicators::IndicatorSnapshot;
use retestlab_core::{BrokerError, EngineError, StrategyConfig};

/// Records every call; optionally fails orders or closes.
#[derive(Default)]
struct RecordingBroker {
    orders: Vec<OrderIntent>,
    closes: Vec<PositionId>,
    fail_orders: bool,
    fail_closes: bool,
    /// Closes that succeed before every later one fails.
    close_budget: Option<usize>,
}

impl Broker for RecordingBroker {
    fn cash(&self) -> f64 {
        100_000.0
    }

    fn portfolio_value(&self) -> f64 {
        100_000.0
    }

    fn submit_order(&mut self, intent: &OrderIntent) -> Result<OrderId, BrokerError> {
        if self.fail_orders {
            return Err(BrokerError::Rejected {
                reason: "market closed".into(),
            });
        }
        self.orders.push(intent.clone());
        Ok(OrderId(format!("ord-{}", self.orders.len())))
    }

    fn open_position(&self, _position_id: PositionId) -> Option<BrokerPosition> {
        None
    }

    fn close_position(&mut self, position_id: PositionId) -> Result<(), BrokerError> {
        let over_budget = self.close_budget.is_some_and(|n| self.closes.len() >= n);
        if self.fail_closes || over_budget {
            return Err(BrokerError::Unavailable("gateway timeout".into()));
        }
        self.closes.push(position_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn trending_config() -> StrategyConfig {
    StrategyConfig {
        trending_threshold: 0.0,
        ..small_lookback()
    }
}

/// Rebuild `engine` with an extra position that was opened on `entry_bar`.
fn with_position(
    engine: Engine,
    direction: Direction,
    entry: f64,
    stop: f64,
    size: u64,
    entry_bar: usize,
) -> (Engine, PositionId) {
    let config = engine.config().clone();
    let mut state = engine.state().clone();
    let id = state.ids.next_position();
    let entry_time = state
        .window
        .last()
        .map(|r| r.bar.timestamp)
        .unwrap();
    state.positions.push(Position {
        id,
        breakout_id: BreakoutId(900),
        direction,
        entry_price: entry,
        entry_time,
        entry_bar,
        size,
        initial_size: size,
        stop_price: stop,
        initial_stop: stop,
        target_price: entry + direction.sign() * 100.0,
        breakout_level: entry,
        regime_snapshot: RegimeState::unknown(),
        confirmation: ConfirmationScore {
            passed: 3,
            total: 3,
            required: 0.6,
            failed: Vec::new(),
        },
        partial_taken: false,
        realized_pnl: 0.0,
    });
    (Engine::from_state(config, state).unwrap(), id)
}

fn opened(events: &[EngineEvent]) -> Vec<(PositionId, u64, f64, f64)> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::PositionOpened {
                position_id,
                size,
                entry_price,
                stop_price,
                ..
            } => Some((*position_id, *size, *entry_price, *stop_price)),
            _ => None,
        })
        .collect()
}

fn rejections(events: &[EngineEvent]) -> Vec<RejectionReason> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::EntryRejected { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

fn feed(engine: &mut Engine, broker: &mut RecordingBroker, bars: &[(Bar, IndicatorSnapshot)]) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    for (bar, ind) in bars {
        events.extend(engine.on_bar(bar, ind, broker).unwrap().events);
    }
    events
}

// ── 1. Bar admission ────────────────────────────────────────────────

#[test]
fn invalid_config_is_rejected_at_construction() {
    let config = StrategyConfig {
        position_size_pct: 0.0,
        ..Default::default()
    };
    assert!(Engine::new(config).is_err());
}

#[test]
fn malformed_bar_is_rejected_without_touching_state() {
    let series = breakout_retest_series(true);
    let mut engine = Engine::new(trending_config()).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..20]);
    let before = engine.state().clone();

    let mut bad = series[20].0.clone();
    bad.close = f64::NAN;
    let err = engine.on_bar(&bad, &series[20].1, &mut broker).unwrap_err();
    assert!(matches!(err, EngineError::InvalidBar { index: 20, .. }));
    assert_eq!(engine.state(), &before);

    // inverted range
    let mut bad = series[20].0.clone();
    bad.low = bad.high + 1.0;
    assert!(engine.on_bar(&bad, &series[20].1, &mut broker).is_err());
    assert_eq!(engine.state(), &before);

    // resumes on the next valid bar
    let out = engine.on_bar(&series[20].0, &series[20].1, &mut broker).unwrap();
    assert_eq!(out.bar_index, 20);
}

#[test]
fn out_of_order_bar_is_rejected() {
    let series = breakout_retest_series(true);
    let mut engine = Engine::new(trending_config()).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..10]);
    let before = engine.state().clone();

    let (stale, ind) = &series[5];
    assert!(matches!(
        engine.on_bar(stale, ind, &mut broker),
        Err(EngineError::InvalidBar { .. })
    ));
    // same timestamp as the last admitted bar
    let (dup, ind) = &series[9];
    assert!(engine.on_bar(dup, ind, &mut broker).is_err());
    assert_eq!(engine.state(), &before);
}

// ── 2. Broker failures ──────────────────────────────────────────────

#[test]
fn rejected_entry_rolls_back_the_book() {
    let series = breakout_retest_series(true);
    let mut engine = Engine::new(trending_config()).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..47]);

    broker.fail_orders = true;
    let err = engine.on_bar(&series[47].0, &series[47].1, &mut broker).unwrap_err();
    let EngineError::Broker { source, executed } = err else {
        panic!("expected a broker failure, got {err:?}");
    };
    assert!(matches!(source, BrokerError::Rejected { .. }));
    // the retest still happened; the entry did not
    assert!(executed.actions.is_empty());
    assert!(executed
        .events
        .iter()
        .any(|e| matches!(e, EngineEvent::RetestConfirmed { bar_index: 47, .. })));
    assert_eq!(executed.entries().count(), 0);

    let state = engine.state();
    // the bar itself was observed
    assert_eq!(state.bars_seen, 48);
    assert!(state.breakouts.is_empty());
    // but nothing was booked
    assert!(state.positions.is_empty());
    assert_eq!(state.risk.last_entry_bar, None);
    assert_eq!(state.risk.retest_stats.entries, 0);
    assert_eq!(state.risk.retest_stats.confirmed, 1);

    // later bars process normally
    broker.fail_orders = false;
    feed(&mut engine, &mut broker, &series[48..]);
    assert!(broker.orders.is_empty());
}

#[test]
fn failed_close_keeps_the_position_open() {
    let series = breakout_retest_series(true);
    let config = StrategyConfig {
        max_holding_days: 5,
        ..trending_config()
    };
    let mut engine = Engine::new(config).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..52]);
    assert_eq!(engine.state().positions.len(), 1);

    broker.fail_closes = true;
    let err = engine.on_bar(&series[52].0, &series[52].1, &mut broker).unwrap_err();
    assert!(matches!(err.broker_error(), Some(BrokerError::Unavailable(_))));
    assert_eq!(engine.state().positions.len(), 1);
    assert_eq!(engine.state().risk.trades, 0);

    // retried on the next bar
    broker.fail_closes = false;
    let out = engine.on_bar(&series[53].0, &series[53].1, &mut broker).unwrap();
    assert_eq!(out.closed_trades.len(), 1);
    assert_eq!(out.closed_trades[0].exit_reason, ExitReason::TimeExit);
    assert!(engine.state().positions.is_empty());
}

#[test]
fn flatten_hands_back_the_close_that_went_through() {
    let series = breakout_retest_series(true);
    let mut engine = Engine::new(trending_config()).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..50]);
    let first = engine.state().positions[0].id;
    let (mut engine, second) = with_position(engine, Direction::Long, 98.0, 96.0, 10, 49);

    broker.close_budget = Some(1);
    let err = engine.flatten(&mut broker).unwrap_err();
    let EngineError::Broker { source, executed } = err else {
        panic!("expected a broker failure, got {err:?}");
    };
    assert!(matches!(source, BrokerError::Unavailable(_)));
    assert_eq!(broker.closes, vec![first]);

    // the executed close is reported and booked exactly once
    assert_eq!(executed.closed_trades.len(), 1);
    assert_eq!(executed.closed_trades[0].position_id, first);
    assert_eq!(executed.closed_trades[0].exit_reason, ExitReason::Flatten);
    assert_eq!(executed.actions.len(), 1);
    let closed_events = executed
        .events
        .iter()
        .filter(|e| matches!(e, EngineEvent::PositionClosed { .. }))
        .count();
    assert_eq!(closed_events, 1);

    let state = engine.state();
    assert_eq!(state.risk.trades, 1);
    assert_eq!(state.risk.realized_pnl, executed.closed_trades[0].realized_pnl);
    assert_eq!(state.positions.len(), 1);
    assert_eq!(state.positions[0].id, second);

    // the refused one goes through on retry
    broker.close_budget = None;
    let out = engine.flatten(&mut broker).unwrap();
    assert_eq!(out.closed_trades.len(), 1);
    assert_eq!(out.closed_trades[0].position_id, second);
    assert!(engine.state().positions.is_empty());
    assert_eq!(engine.state().risk.trades, 2);
}

#[test]
fn failed_exit_after_an_entry_keeps_the_entry() {
    let series = breakout_retest_series(true);
    let config = StrategyConfig {
        max_concurrent_trades: 2,
        ..trending_config()
    };
    let mut engine = Engine::new(config).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..47]);
    // short from bar 40 whose stop the bar-47 close runs through
    let (mut engine, short) = with_position(engine, Direction::Short, 101.0, 101.5, 10, 40);

    broker.fail_closes = true;
    let err = engine.on_bar(&series[47].0, &series[47].1, &mut broker).unwrap_err();
    let EngineError::Broker { executed, .. } = err else {
        panic!("expected a broker failure, got {err:?}");
    };
    let entries = opened(&executed.events);
    assert_eq!(entries.len(), 1);
    assert!(executed.closed_trades.is_empty());
    assert_eq!(broker.orders.len(), 1);

    let state = engine.state();
    assert_eq!(state.positions.len(), 2);
    assert!(state.position(entries[0].0).is_some());
    assert!(state.position(short).is_some());
    assert_eq!(state.risk.retest_stats.entries, 1);
    assert_eq!(state.risk.trades, 0);
}

// ── 3. Lifecycle ────────────────────────────────────────────────────

#[test]
fn entry_reaches_the_broker() {
    let series = breakout_retest_series(true);
    let mut engine = Engine::new(trending_config()).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..48]);

    assert_eq!(broker.orders.len(), 1);
    let order = &broker.orders[0];
    assert_eq!(order.action, OrderAction::Buy);
    assert!(order.size > 0);
    assert_eq!(order.reference_price, 101.6);
    let pos = &engine.state().positions[0];
    assert_eq!(order.position_id, pos.id);
    assert_eq!(order.stop_price, Some(pos.initial_stop));
}

#[test]
fn time_exit_after_max_holding_bars() {
    let series = breakout_retest_series(true);
    let config = StrategyConfig {
        max_holding_days: 5,
        ..trending_config()
    };
    let mut engine = Engine::new(config).unwrap();
    let mut broker = RecordingBroker::default();
    let events = feed(&mut engine, &mut broker, &series);

    let closed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::PositionClosed { trade, .. } => Some(trade.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_reason, ExitReason::TimeExit);
    assert_eq!(closed[0].entry_bar, 47);
    assert_eq!(closed[0].exit_bar, 52);
    assert_eq!(closed[0].bars_held, 5);
    assert!(closed[0].realized_pnl > 0.0);
    assert_eq!(broker.closes, vec![closed[0].position_id]);
    assert_eq!(engine.state().risk.consecutive_losses, 0);
}

#[test]
fn flatten_closes_everything() {
    let series = breakout_retest_series(true);
    let mut engine = Engine::new(trending_config()).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..50]);
    assert_eq!(engine.state().positions.len(), 1);

    let out = engine.flatten(&mut broker).unwrap();
    assert_eq!(out.closed_trades.len(), 1);
    assert_eq!(out.closed_trades[0].exit_reason, ExitReason::Flatten);
    assert_eq!(out.closed_trades[0].exit_price, series[49].0.close);
    assert!(engine.state().positions.is_empty());
    assert_eq!(broker.closes.len(), 1);

    // nothing left to do
    assert!(engine.flatten(&mut broker).unwrap().actions.is_empty());
}

// ── 4. Same-bar ordering and portfolio risk ─────────────────────────

#[test]
fn stopped_out_position_still_holds_its_slot_for_the_bar() {
    let series = breakout_retest_series(true);
    let mut engine = Engine::new(trending_config()).unwrap();
    assert_eq!(engine.config().max_concurrent_trades, 1);
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..47]);
    let (mut engine, short) = with_position(engine, Direction::Short, 101.0, 101.5, 10, 40);

    let out = engine.on_bar(&series[47].0, &series[47].1, &mut broker).unwrap();
    assert!(out
        .events
        .iter()
        .any(|e| matches!(e, EngineEvent::RetestConfirmed { .. })));
    assert!(opened(&out.events).is_empty());
    assert_eq!(rejections(&out.events), vec![RejectionReason::MaxConcurrent]);

    assert_eq!(out.closed_trades.len(), 1);
    assert_eq!(out.closed_trades[0].position_id, short);
    assert_eq!(out.closed_trades[0].exit_reason, ExitReason::StopLoss);
    assert!(engine.state().positions.is_empty());
    assert!(broker.orders.is_empty());
}

#[test]
fn entries_go_out_before_same_bar_exits() {
    let series = breakout_retest_series(true);
    let config = StrategyConfig {
        max_concurrent_trades: 2,
        ..trending_config()
    };
    let mut engine = Engine::new(config).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..47]);
    let (mut engine, short) = with_position(engine, Direction::Short, 101.0, 101.5, 10, 40);

    let out = engine.on_bar(&series[47].0, &series[47].1, &mut broker).unwrap();
    let kinds: Vec<_> = out
        .actions
        .iter()
        .map(|a| match &a.commit {
            Commit::Open { .. } => "open",
            Commit::Close { .. } => "close",
            Commit::Reduce { .. } => "reduce",
            Commit::TightenStop { .. } => "tighten",
        })
        .collect();
    assert_eq!(kinds, vec!["open", "close"]);
    assert_eq!(broker.orders.len(), 1);
    assert_eq!(broker.orders[0].action, OrderAction::Buy);
    assert_eq!(broker.closes, vec![short]);
    assert_eq!(engine.state().positions.len(), 1);
}

#[test]
fn second_entry_is_sized_to_the_remaining_risk_budget() {
    let series = breakout_retest_series(true);
    let config = StrategyConfig {
        max_concurrent_trades: 2,
        ..trending_config()
    };
    let budget = config.max_portfolio_risk * 100_000.0;
    let mut engine = Engine::new(config).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..47]);
    // 500 units × 11.0 to the stop = 5,500 of the 6,000 budget already at risk
    let (mut engine, _) = with_position(engine, Direction::Long, 98.0, 87.0, 500, 40);
    assert_eq!(engine.state().open_risk(), 5_500.0);

    let out = engine.on_bar(&series[47].0, &series[47].1, &mut broker).unwrap();
    let entries = opened(&out.events);
    assert_eq!(entries.len(), 1);
    let (_, size, entry, stop) = entries[0];
    let per_unit = entry - stop;
    let remaining = budget - 5_500.0;
    assert_eq!(size, (remaining / per_unit + 1e-9).floor() as u64);
    assert!(5_500.0 + size as f64 * per_unit <= budget + 1e-9);
    assert!(engine.state().open_risk() <= budget + 1e-9);
}

#[test]
fn entry_is_refused_when_the_risk_budget_is_spent() {
    let series = breakout_retest_series(true);
    let config = StrategyConfig {
        max_concurrent_trades: 2,
        ..trending_config()
    };
    let mut engine = Engine::new(config).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..47]);
    // 600 × 10.0 = the full 6% of 100,000
    let (mut engine, _) = with_position(engine, Direction::Long, 98.0, 88.0, 600, 40);

    let out = engine.on_bar(&series[47].0, &series[47].1, &mut broker).unwrap();
    assert!(opened(&out.events).is_empty());
    assert_eq!(rejections(&out.events), vec![RejectionReason::RiskLimitExceeded]);
    assert!(broker.orders.is_empty());
}

// ── 5. Snapshot/restore ─────────────────────────────────────────────

#[test]
fn restored_engine_makes_identical_decisions() {
    let series = breakout_retest_series(true);
    let config = trending_config();
    let mut engine = Engine::new(config.clone()).unwrap();
    let mut broker = RecordingBroker::default();
    feed(&mut engine, &mut broker, &series[..46]);

    let json = engine.snapshot_json().unwrap();
    let mut restored = Engine::restore_json(config, &json).unwrap();
    assert_eq!(restored.state(), engine.state());

    let mut a = RecordingBroker::default();
    let mut b = RecordingBroker::default();
    let original = feed(&mut engine, &mut a, &series[46..]);
    let replayed = feed(&mut restored, &mut b, &series[46..]);
    assert_eq!(original, replayed);
    assert_eq!(a.orders, b.orders);
    assert_eq!(restored.state(), engine.state());
}

#[test]
fn restore_rejects_garbage() {
    assert!(Engine::restore_json(StrategyConfig::default(), "{not json").is_err());
}
