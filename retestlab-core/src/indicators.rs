//! Per-bar indicator inputs.
//!
//! The engine never computes ATR, RSI or moving averages itself. An external
//! feed computes them and hands the engine one [`IndicatorSnapshot`] with each
//! bar. A value that is not yet warmed up is `None`; NaN and infinities are
//! normalised to `None` on read so downstream code only sees usable numbers.

use serde::{Deserialize, Serialize};

/// Externally computed indicator values for one bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Average true range.
    pub atr: Option<f64>,
    /// Short-window momentum oscillator (RSI-like, 0..100).
    pub momentum: Option<f64>,
    /// Trend-filter moving average of closes.
    pub trend_ma: Option<f64>,
    /// Rolling average volume.
    pub avg_volume: Option<f64>,
}

impl IndicatorSnapshot {
    /// Build a snapshot from raw series values, mapping NaN to `None`.
    pub fn from_raw(atr: f64, momentum: f64, trend_ma: f64, avg_volume: f64) -> Self {
        Self {
            atr: finite(Some(atr)),
            momentum: finite(Some(momentum)),
            trend_ma: finite(Some(trend_ma)),
            avg_volume: finite(Some(avg_volume)),
        }
    }

    pub fn atr(&self) -> Option<f64> {
        finite(self.atr)
    }

    pub fn momentum(&self) -> Option<f64> {
        finite(self.momentum)
    }

    pub fn trend_ma(&self) -> Option<f64> {
        finite(self.trend_ma)
    }

    pub fn avg_volume(&self) -> Option<f64> {
        finite(self.avg_volume)
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}
