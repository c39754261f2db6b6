//! End-to-end decision scenarios driven through `engine::step`.
//!
//! 1. Clean break of a 3-touch resistance, confirmed retest → one long entry
//! 2. Same setup in a ranging regime with only the volume check passing → no entry
//! 3. Breakout that is never retested in time → purged, no later entry
//!
//! Scenarios 1 and 2 keep the default regime thresholds: the series itself
//! decides whether the retest bar is trending or ranging.

mod common;

use common::*;
use retestlab_core::components::{ConfirmationFailure, TrendClass, VolatilityClass};
use retestlab_core::domain::{Bar, Direction};
use retestlab_core::engine::{step, EngineState};
use retestlab_core::events::EngineEvent;
use retestlab_core::indicators::IndicatorSnapshot;
use retestlab_core::StrategyConfig;

fn state_after(config: &StrategyConfig, bars: &[(Bar, IndicatorSnapshot)]) -> EngineState {
    run(config, bars).0
}

/// Run every bar through a fresh state; returns the final state and all events.
fn run(config: &StrategyConfig, bars: &[(Bar, IndicatorSnapshot)]) -> (EngineState, Vec<EngineEvent>) {
    config.validate().unwrap();
    let mut state = EngineState::new(config);
    let mut events = Vec::new();
    for (bar, ind) in bars {
        let out = step(config, &mut state, bar, ind, &account()).unwrap();
        events.extend(out.events);
    }
    (state, events)
}

#[test]
fn confirmed_retest_opens_exactly_one_long() {
    let config = small_lookback();
    let (state, events) = run(&config, &breakout_retest_series(true));

    let flagged: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::BreakoutFlagged {
                bar_index,
                direction,
                level_price,
                ..
            } => Some((*bar_index, *direction, *level_price)),
            _ => None,
        })
        .collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].0, 45);
    assert_eq!(flagged[0].1, Direction::Long);
    assert!((flagged[0].2 - 100.0).abs() < 1e-9);

    let opened: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::PositionOpened {
                bar_index,
                direction,
                entry_price,
                stop_price,
                target_price,
                size,
                ..
            } => Some((*bar_index, *direction, *entry_price, *stop_price, *target_price, *size)),
            _ => None,
        })
        .collect();
    assert_eq!(opened.len(), 1, "events: {events:#?}");
    let (bar_index, direction, entry, stop, target, size) = opened[0];
    assert!(bar_index >= 47);
    assert_eq!(direction, Direction::Long);
    assert!(size > 0);

    // stop sits below the bar-40 swing low
    assert!(stop < 97.2);
    assert!(stop < entry);
    assert!((target - entry) / (entry - stop) >= 1.5);

    assert_eq!(state.risk.retest_stats.confirmed, 1);
    assert_eq!(state.risk.retest_stats.entries, 1);
    assert!(state.breakouts.is_empty());
}

#[test]
fn uptrend_retest_is_scored_as_weak_trend() {
    let config = small_lookback();
    assert_eq!(config.trending_threshold, StrategyConfig::default().trending_threshold);
    let (_, events) = run(&config, &breakout_retest_series(true));

    let (bar_index, fraction, required, regime) = events
        .iter()
        .find_map(|e| match e {
            EngineEvent::RetestConfirmed {
                bar_index,
                fraction,
                required,
                regime,
                ..
            } => Some((*bar_index, *fraction, *required, *regime)),
            _ => None,
        })
        .expect("bar 47 retest confirms");
    assert_eq!(bar_index, 47);
    // closes 38..=47 fit with R² ≈ 0.67 and move ≈ 3.6% over the window
    assert_eq!(regime.trend_class, TrendClass::Trending);
    assert!(regime.r_squared > config.trending_threshold);
    assert!(regime.trend_strength < config.strong_trend_threshold);
    assert_eq!(regime.volatility_class, VolatilityClass::Low);
    assert_eq!(required, config.confirmation_thresholds.trending_weak);
    assert_eq!(fraction, 1.0);
}

#[test]
fn volume_alone_does_not_confirm_in_a_ranging_regime() {
    let config = small_lookback();
    let (_, events) = run(&config, &choppy_breakout_series());
    let state = state_after(&config, &choppy_breakout_series()[..48]);

    assert_eq!(state.regime.trend_class, TrendClass::Ranging);
    assert!(state.regime.r_squared < config.trending_threshold);
    assert_eq!(state.regime.volatility_class, VolatilityClass::Normal);
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::PositionOpened { .. })));
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::RetestConfirmed { .. })));

    let rejection = events
        .iter()
        .find_map(|e| match e {
            EngineEvent::RetestRejected {
                bar_index,
                fraction,
                required,
                failed,
                ..
            } => Some((*bar_index, *fraction, *required, failed.clone())),
            _ => None,
        })
        .expect("retest on bar 47 should be scored");
    assert_eq!(rejection.0, 47);
    assert!((rejection.1 - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(rejection.2, config.confirmation_thresholds.ranging);
    assert_eq!(rejection.2, 0.75);
    assert_eq!(
        rejection.3,
        vec![ConfirmationFailure::Pattern, ConfirmationFailure::Momentum]
    );
    assert_eq!(state.risk.retest_stats.rejected, 1);
}

#[test]
fn same_weak_retest_in_a_trend_still_falls_short() {
    // smooth run-up: trending, so only 60% is required, and 1/3 misses it
    let config = small_lookback();
    let (_, events) = run(&config, &breakout_retest_series(false));

    let (fraction, required) = events
        .iter()
        .find_map(|e| match e {
            EngineEvent::RetestRejected { fraction, required, .. } => Some((*fraction, *required)),
            _ => None,
        })
        .expect("bar 47 retest is scored");
    assert_eq!(required, config.confirmation_thresholds.trending_weak);
    assert!(fraction < required);
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::PositionOpened { .. })));
}

/// Lookback 1: resistance touched at 100.00 on bars 2, 4 and 6, broken on
/// bar 10, never revisited until after `max_breakout_age`, then retested
/// with a textbook reversal on bar 18.
fn stale_breakout_series() -> Vec<(Bar, IndicatorSnapshot)> {
    let mut bars = vec![
        (bar(0, 97.0, 97.5, 96.5, 97.2, AVG_VOLUME), snapshot(50.0)),
        (bar(1, 97.2, 98.0, 96.8, 97.8, AVG_VOLUME), snapshot(50.0)),
        (bar(2, 99.0, 100.0, 98.6, 99.5, AVG_VOLUME), snapshot(50.0)),
        (bar(3, 99.0, 99.2, 97.0, 97.5, AVG_VOLUME), snapshot(50.0)),
        (bar(4, 98.5, 100.0, 98.0, 99.4, AVG_VOLUME), snapshot(50.0)),
        (bar(5, 99.0, 99.3, 96.0, 96.5, AVG_VOLUME), snapshot(50.0)),
        (bar(6, 98.0, 100.0, 97.8, 99.6, AVG_VOLUME), snapshot(50.0)),
        (bar(7, 99.0, 99.4, 95.0, 95.5, AVG_VOLUME), snapshot(50.0)),
        (bar(8, 96.0, 98.0, 95.8, 97.5, AVG_VOLUME), snapshot(50.0)),
        (bar(9, 97.5, 99.0, 97.2, 98.8, AVG_VOLUME), snapshot(50.0)),
        (bar(10, 99.0, 102.0, 98.9, 101.5, 2.0 * AVG_VOLUME), snapshot(50.0)),
    ];
    for i in 11..=16 {
        let close = 101.5 + 0.3 * (i - 10) as f64;
        bars.push((bar(i, close - 0.3, close + 0.3, close - 0.5, close, AVG_VOLUME), snapshot(50.0)));
    }
    bars.push((bar(17, 102.5, 102.6, 100.8, 101.0, AVG_VOLUME), snapshot(50.0)));
    bars.push((bar(18, 100.5, 102.7, 100.1, 102.6, AVG_VOLUME), snapshot(56.0)));
    for i in 19..25 {
        let close = 103.0 + 0.2 * (i - 19) as f64;
        bars.push((bar(i, close - 0.2, close + 0.3, close - 0.3, close, AVG_VOLUME), snapshot(55.0)));
    }
    bars
}

#[test]
fn stale_breakout_is_purged_and_never_enters() {
    let config = StrategyConfig {
        lookback_period: 1,
        max_breakout_age: 5,
        enable_regime_detection: false,
        ..Default::default()
    };
    let (state, events) = run(&config, &stale_breakout_series());

    let flagged = events
        .iter()
        .find_map(|e| match e {
            EngineEvent::BreakoutFlagged {
                bar_index,
                breakout_id,
                ..
            } => Some((*bar_index, *breakout_id)),
            _ => None,
        })
        .expect("bar 10 breaks resistance");
    assert_eq!(flagged.0, 10);

    let expired = events
        .iter()
        .find_map(|e| match e {
            EngineEvent::BreakoutExpired {
                bar_index,
                breakout_id,
                ..
            } if *breakout_id == flagged.1 => Some(*bar_index),
            _ => None,
        })
        .expect("breakout ages out");
    assert_eq!(expired, 16);

    assert!(!events.iter().any(|e| matches!(
        e,
        EngineEvent::RetestConfirmed { .. }
            | EngineEvent::RetestRejected { .. }
            | EngineEvent::PositionOpened { .. }
    )));
    assert!(state.positions.is_empty());
    assert_eq!(state.risk.retest_stats.attempts, 0);
}
