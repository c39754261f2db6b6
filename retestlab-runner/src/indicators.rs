//! Reference indicator feed for backtests.
//!
//! The core never computes indicators; it consumes one
//! [`IndicatorSnapshot`] per bar. This module precomputes the full series
//! for a symbol:
//!
//! | field        | indicator                               |
//! |--------------|-----------------------------------------|
//! | `atr`        | Wilder ATR, period 14                   |
//! | `momentum`   | Wilder RSI, period 7                    |
//! | `trend_ma`   | SMA of close, `trend_filter_period`     |
//! | `avg_volume` | SMA of volume, period 20                |
//!
//! Every series is NaN until its lookback is satisfied; NaN reads as
//! "not available" in the snapshot. Value at index `t` only uses bars
//! `0..=t`.

use retestlab_core::domain::Bar;
use retestlab_core::indicators::IndicatorSnapshot;
use retestlab_core::StrategyConfig;

pub const ATR_PERIOD: usize = 14;
pub const RSI_PERIOD: usize = 7;
pub const VOLUME_PERIOD: usize = 20;

/// One snapshot per bar, aligned by index.
pub fn compute_snapshots(bars: &[Bar], config: &StrategyConfig) -> Vec<IndicatorSnapshot> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let atr = wilder_smooth(&true_range(bars), ATR_PERIOD);
    let rsi = rsi(&closes, RSI_PERIOD);
    let trend = sma(&closes, config.trend_filter_period);
    let avg_volume = sma(&volumes, VOLUME_PERIOD);

    (0..bars.len())
        .map(|i| IndicatorSnapshot::from_raw(atr[i], rsi[i], trend[i], avg_volume[i]))
        .collect()
}

/// True range; the first bar uses high − low.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut prev_close: Option<f64> = None;
    bars.iter()
        .map(|bar| {
            let hl = bar.high - bar.low;
            let tr = match prev_close {
                Some(pc) => hl.max((bar.high - pc).abs()).max((bar.low - pc).abs()),
                None => hl,
            };
            prev_close = Some(bar.close);
            tr
        })
        .collect()
}

/// Wilder smoothing: seeded with the mean of the first `period` values,
/// then `s = (s·(p−1) + x) / p`. A NaN input poisons the rest of the series.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let seed = &values[..period];
    if seed.iter().any(|v| !v.is_finite()) {
        return out;
    }
    let p = period as f64;
    let mut smoothed = seed.iter().sum::<f64>() / p;
    out[period - 1] = smoothed;
    for i in period..values.len() {
        if !values[i].is_finite() {
            break;
        }
        smoothed = (smoothed * (p - 1.0) + values[i]) / p;
        out[i] = smoothed;
    }
    out
}

/// Wilder RSI in `[0, 100]`; first value at index `period`.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return out;
    }
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = changes.iter().map(|c| c.max(0.0)).collect();
    let losses: Vec<f64> = changes.iter().map(|c| (-c).max(0.0)).collect();

    let avg_gain = wilder_smooth(&gains, period);
    let avg_loss = wilder_smooth(&losses, period);
    // changes[i] is the move into bar i + 1
    for i in (period - 1)..changes.len() {
        let (g, l) = (avg_gain[i], avg_loss[i]);
        if g.is_nan() || l.is_nan() {
            break;
        }
        out[i + 1] = rsi_value(g, l);
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_gain == 0.0 && avg_loss == 0.0 {
        return 50.0;
    }
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Simple moving average; NaN anywhere in the window yields NaN.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for (i, window) in values.windows(period).enumerate() {
        if window.iter().all(|v| v.is_finite()) {
            out[i + period - 1] = window.iter().sum::<f64>() / period as f64;
        }
    }
    out
}
