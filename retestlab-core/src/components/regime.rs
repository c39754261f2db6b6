//! Regime classifier.
//!
//! Fits an ordinary least-squares line to the last `regime_lookback` closes.
//! `trend_strength = |slope * n / first_close|` is the fitted move over the
//! window as a fraction of the starting price; the fit's R² decides between
//! trending (`R² > trending_threshold`) and ranging. Volatility comes from
//! the mean absolute bar-to-bar return: above 2% is high, below 1% is low.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::StrategyConfig;

const HIGH_VOLATILITY: f64 = 0.02;
const LOW_VOLATILITY: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendClass {
    Trending,
    Ranging,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityClass {
    Low,
    Normal,
    High,
    Unknown,
}

impl fmt::Display for TrendClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendClass::Trending => write!(f, "trending"),
            TrendClass::Ranging => write!(f, "ranging"),
            TrendClass::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for VolatilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityClass::Low => write!(f, "low"),
            VolatilityClass::Normal => write!(f, "normal"),
            VolatilityClass::High => write!(f, "high"),
            VolatilityClass::Unknown => write!(f, "unknown"),
        }
    }
}

/// Regime classification for one bar. Recomputed every bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub trend_strength: f64,
    pub trend_class: TrendClass,
    pub volatility_class: VolatilityClass,
    pub r_squared: f64,
    pub slope: f64,
    pub mean_abs_return: f64,
}

impl RegimeState {
    pub fn unknown() -> Self {
        Self {
            trend_strength: 0.0,
            trend_class: TrendClass::Unknown,
            volatility_class: VolatilityClass::Unknown,
            r_squared: 0.0,
            slope: 0.0,
            mean_abs_return: 0.0,
        }
    }

    /// Sizing multiplier: smaller in high volatility, larger in low.
    pub fn volatility_multiplier(&self) -> f64 {
        match self.volatility_class {
            VolatilityClass::High => 0.7,
            VolatilityClass::Low => 1.2,
            VolatilityClass::Normal | VolatilityClass::Unknown => 1.0,
        }
    }
}

impl Default for RegimeState {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Classify the regime from closes (oldest first).
///
/// Uses the last `regime_lookback` closes; fewer, or detection disabled,
/// yields [`RegimeState::unknown`].
pub fn classify(closes: &[f64], config: &StrategyConfig) -> RegimeState {
    let n = config.regime_lookback;
    if !config.enable_regime_detection || n < 3 || closes.len() < n {
        return RegimeState::unknown();
    }
    let window = &closes[closes.len() - n..];
    if window.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        return RegimeState::unknown();
    }

    let (slope, r_squared) = linear_fit(window);
    let trend_strength = (slope * n as f64 / window[0]).abs();
    let trend_class = if r_squared > config.trending_threshold {
        TrendClass::Trending
    } else {
        TrendClass::Ranging
    };

    let mean_abs_return = mean_abs_return(window);
    let volatility_class = if mean_abs_return > HIGH_VOLATILITY {
        VolatilityClass::High
    } else if mean_abs_return < LOW_VOLATILITY {
        VolatilityClass::Low
    } else {
        VolatilityClass::Normal
    };

    RegimeState {
        trend_strength,
        trend_class,
        volatility_class,
        r_squared,
        slope,
        mean_abs_return,
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

/// OLS of `y` on `0..n`. Returns `(slope, r_squared)`. A flat series has R² = 0.
fn linear_fit(y: &[f64]) -> (f64, f64) {
    let n = y.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = y.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (i, &v) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = v - y_mean;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 {
        return (0.0, 0.0);
    }
    let slope = sxy / sxx;
    if syy < 1e-18 {
        return (slope, 0.0);
    }
    let r_squared = (sxy * sxy) / (sxx * syy);
    (slope, r_squared.clamp(0.0, 1.0))
}

fn mean_abs_return(closes: &[f64]) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }
    let sum: f64 = closes
        .windows(2)
        .map(|w| ((w[1] - w[0]) / w[0]).abs())
        .sum();
    sum / (closes.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(lookback: usize) -> StrategyConfig {
        StrategyConfig {
            regime_lookback: lookback,
            ..Default::default()
        }
    }

    #[test]
    fn insufficient_data_is_unknown() {
        let closes = vec![100.0; 10];
        let state = classify(&closes, &config(20));
        assert_eq!(state.trend_class, TrendClass::Unknown);
        assert_eq!(state.volatility_class, VolatilityClass::Unknown);
        assert_eq!(state.volatility_multiplier(), 1.0);
    }

    #[test]
    fn disabled_detection_is_unknown() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let cfg = StrategyConfig {
            enable_regime_detection: false,
            regime_lookback: 20,
            ..Default::default()
        };
        assert_eq!(classify(&closes, &cfg).trend_class, TrendClass::Unknown);
    }

    #[test]
    fn straight_line_is_trending() {
        // +0.5 per bar over 20 bars from 100
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + 0.5 * i as f64).collect();
        let state = classify(&closes, &config(20));
        assert_eq!(state.trend_class, TrendClass::Trending);
        assert!((state.r_squared - 1.0).abs() < 1e-9);
        assert!((state.slope - 0.5).abs() < 1e-9);
        // |0.5 × 20 / 100|
        assert!((state.trend_strength - 0.1).abs() < 1e-9);
        // ~0.5% per bar
        assert_eq!(state.volatility_class, VolatilityClass::Low);
    }

    #[test]
    fn oscillation_is_ranging_and_volatile() {
        let closes: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 100.0 } else { 103.0 }).collect();
        let state = classify(&closes, &config(20));
        assert_eq!(state.trend_class, TrendClass::Ranging);
        assert_eq!(state.volatility_class, VolatilityClass::High);
        assert_eq!(state.volatility_multiplier(), 0.7);
    }

    #[test]
    fn flat_window_has_zero_r_squared() {
        let closes = vec![50.0; 25];
        let state = classify(&closes, &config(20));
        assert_eq!(state.r_squared, 0.0);
        assert_eq!(state.trend_class, TrendClass::Ranging);
        assert_eq!(state.volatility_class, VolatilityClass::Low);
        assert_eq!(state.volatility_multiplier(), 1.2);
    }

    #[test]
    fn uses_only_the_last_window() {
        let mut closes: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 100.0 } else { 110.0 }).collect();
        closes.extend((0..20).map(|i| 100.0 + i as f64));
        let state = classify(&closes, &config(20));
        assert_eq!(state.trend_class, TrendClass::Trending);
    }
}
