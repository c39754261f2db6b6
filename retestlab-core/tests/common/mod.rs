//! Shared bar builders for the integration tests.

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use retestlab_core::components::AccountSnapshot;
use retestlab_core::domain::Bar;
use retestlab_core::indicators::IndicatorSnapshot;
use retestlab_core::StrategyConfig;

pub const AVG_VOLUME: f64 = 1000.0;

pub fn bar(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
    Bar {
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64),
        open,
        high,
        low,
        close,
        volume,
    }
}

pub fn snapshot(momentum: f64) -> IndicatorSnapshot {
    IndicatorSnapshot {
        atr: Some(2.0),
        momentum: Some(momentum),
        trend_ma: Some(95.0),
        avg_volume: Some(AVG_VOLUME),
    }
}

pub fn account() -> AccountSnapshot {
    AccountSnapshot {
        cash: 100_000.0,
        portfolio_value: 100_000.0,
    }
}

/// 60-bar uptrend: resistance touched at 100.00 on bars 15, 25 and 35, a
/// pullback swing low at 97.20 on bar 40, a 2× volume break on bar 45, and
/// a retest on bar 47 that touches 100.20.
///
/// `engulfing` controls whether bars 46/47 form a bullish engulfing pair and
/// momentum rises into the retest.
pub fn breakout_retest_series(engulfing: bool) -> Vec<(Bar, IndicatorSnapshot)> {
    let mut bars = Vec::with_capacity(60);
    for i in 0..60 {
        let item = match i {
            15 | 25 | 35 => (bar(i, 99.4, 100.0, 99.3, 99.6, AVG_VOLUME), snapshot(50.0)),
            40 => (bar(i, 97.7, 97.9, 97.2, 97.5, AVG_VOLUME), snapshot(50.0)),
            45 => (bar(i, 99.8, 101.8, 99.7, 101.5, 2.0 * AVG_VOLUME), snapshot(50.0)),
            46 if engulfing => (bar(i, 101.4, 101.5, 100.8, 100.9, AVG_VOLUME), snapshot(55.0)),
            46 => (bar(i, 100.85, 101.3, 100.8, 101.0, AVG_VOLUME), snapshot(60.0)),
            47 if engulfing => (bar(i, 100.5, 101.7, 100.2, 101.6, 0.9 * AVG_VOLUME), snapshot(60.0)),
            47 => (bar(i, 100.5, 101.7, 100.2, 101.6, 0.9 * AVG_VOLUME), snapshot(57.0)),
            i if i > 47 => {
                let close = 102.0 + 0.3 * (i - 48) as f64;
                (bar(i, close - 0.2, close + 0.3, close - 0.3, close, AVG_VOLUME), snapshot(55.0))
            }
            i => {
                let close = 97.0 + 0.05 * i as f64;
                (bar(i, close - 0.2, close + 0.3, close - 0.3, close, AVG_VOLUME), snapshot(50.0))
            }
        };
        bars.push(item);
    }
    bars
}

/// The non-engulfing retest series with bars 38..=44 swapped for a choppy
/// stretch below the level. The last ten closes into the retest fit a line
/// with R² ≈ 0.45, under the default trending threshold.
pub fn choppy_breakout_series() -> Vec<(Bar, IndicatorSnapshot)> {
    let mut series = breakout_retest_series(false);
    for (i, close) in [(38, 99.6), (39, 98.2), (41, 99.5), (42, 97.8), (43, 99.6), (44, 98.2)] {
        series[i].0 = bar(i, close - 0.2, close + 0.3, close - 0.3, close, AVG_VOLUME);
    }
    series
}

pub fn small_lookback() -> StrategyConfig {
    StrategyConfig {
        lookback_period: 3,
        retest_tolerance: 0.007,
        regime_lookback: 10,
        ..Default::default()
    }
}
