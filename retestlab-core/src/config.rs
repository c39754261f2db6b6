//! Strategy configuration.
//!
//! Every tunable has a default and a valid range. [`StrategyConfig::validate`]
//! is called by the engine constructor, so no bar is ever processed with an
//! out-of-range parameter. Day-denominated settings (`trade_cooldown_days`,
//! `max_holding_days`, `max_breakout_age`) count bars.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Required confirmed fraction of retest checks per regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationThresholds {
    pub trending_strong: f64,
    pub trending_weak: f64,
    pub ranging: f64,
    pub unknown: f64,
}

impl Default for ConfirmationThresholds {
    fn default() -> Self {
        Self {
            trending_strong: 0.50,
            trending_weak: 0.60,
            ranging: 0.75,
            unknown: 0.67,
        }
    }
}

/// Full parameter set for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    // ── Swings and levels ──
    /// Bars on each side of a swing extremum.
    pub lookback_period: usize,
    /// Most recent swings per kind that feed level clustering.
    pub level_swing_window: usize,
    pub min_level_strength: f64,
    pub level_tolerance: f64,

    // ── Breakouts ──
    pub min_breakout_strength: f64,
    pub breakout_volume_factor: f64,
    pub max_breakout_age: usize,

    // ── Retest confirmation ──
    pub retest_tolerance: f64,
    pub min_retest_bounce: f64,
    pub require_pattern_confirmation: bool,
    pub require_momentum_confirmation: bool,
    pub momentum_threshold: f64,
    pub momentum_floor: f64,
    pub momentum_ceiling: f64,
    pub confirmation_thresholds: ConfirmationThresholds,

    // ── Regime ──
    pub enable_regime_detection: bool,
    pub regime_lookback: usize,
    pub trending_threshold: f64,
    pub strong_trend_threshold: f64,

    // ── Entry gating ──
    pub trade_cooldown_days: usize,
    pub level_reuse_bars: usize,
    pub min_trade_spacing: f64,
    pub min_cash: f64,
    pub min_atr_pct: f64,
    pub enable_trend_filter: bool,
    pub trend_filter_period: usize,
    pub max_concurrent_trades: usize,

    // ── Stops, targets, sizing ──
    pub position_size_pct: f64,
    pub stop_loss_atr_mult: f64,
    pub use_structure_stops: bool,
    pub structure_stop_buffer: f64,
    pub take_profit_ratio: f64,
    pub use_adaptive_targets: bool,
    pub max_portfolio_risk: f64,
    pub max_consecutive_losses: u32,

    // ── Position management ──
    pub max_holding_days: usize,
    pub enable_trailing_stop: bool,
    pub trailing_stop_atr_mult: f64,
    pub partial_profit_level: f64,
    pub partial_profit_fraction: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            lookback_period: 20,
            level_swing_window: 20,
            min_level_strength: 3.0,
            level_tolerance: 0.002,

            min_breakout_strength: 0.01,
            breakout_volume_factor: 1.5,
            max_breakout_age: 10,

            retest_tolerance: 0.005,
            min_retest_bounce: 0.003,
            require_pattern_confirmation: true,
            require_momentum_confirmation: true,
            momentum_threshold: 2.0,
            momentum_floor: 30.0,
            momentum_ceiling: 70.0,
            confirmation_thresholds: ConfirmationThresholds::default(),

            enable_regime_detection: true,
            regime_lookback: 50,
            trending_threshold: 0.6,
            strong_trend_threshold: 0.10,

            trade_cooldown_days: 3,
            level_reuse_bars: 20,
            min_trade_spacing: 0.02,
            min_cash: 1000.0,
            min_atr_pct: 0.01,
            enable_trend_filter: true,
            trend_filter_period: 50,
            max_concurrent_trades: 1,

            position_size_pct: 0.02,
            stop_loss_atr_mult: 2.0,
            use_structure_stops: true,
            structure_stop_buffer: 0.005,
            take_profit_ratio: 3.0,
            use_adaptive_targets: true,
            max_portfolio_risk: 0.06,
            max_consecutive_losses: 3,

            max_holding_days: 30,
            enable_trailing_stop: true,
            trailing_stop_atr_mult: 1.5,
            partial_profit_level: 0.5,
            partial_profit_fraction: 0.5,
        }
    }
}

impl StrategyConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    ///
    /// The result is validated before it is returned.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: StrategyConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every parameter against its valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        count("lookback_period", self.lookback_period, 1, 250)?;
        count("level_swing_window", self.level_swing_window, 1, 50)?;
        range("min_level_strength", self.min_level_strength, 0.0, 1000.0)?;
        open_closed("level_tolerance", self.level_tolerance, 0.0, 0.1)?;

        open_closed("min_breakout_strength", self.min_breakout_strength, 0.0, 0.5)?;
        range("breakout_volume_factor", self.breakout_volume_factor, 0.0, 20.0)?;
        count("max_breakout_age", self.max_breakout_age, 1, 1000)?;

        open_closed("retest_tolerance", self.retest_tolerance, 0.0, 0.1)?;
        range("min_retest_bounce", self.min_retest_bounce, 0.0, 0.1)?;
        range("momentum_threshold", self.momentum_threshold, 0.0, 100.0)?;
        range("momentum_floor", self.momentum_floor, 0.0, 100.0)?;
        range("momentum_ceiling", self.momentum_ceiling, 0.0, 100.0)?;
        if self.momentum_floor >= self.momentum_ceiling {
            return Err(out_of_range(
                "momentum_floor",
                self.momentum_floor,
                format!("below momentum_ceiling ({})", self.momentum_ceiling),
            ));
        }
        let t = &self.confirmation_thresholds;
        open_closed("confirmation_thresholds.trending_strong", t.trending_strong, 0.0, 1.0)?;
        open_closed("confirmation_thresholds.trending_weak", t.trending_weak, 0.0, 1.0)?;
        open_closed("confirmation_thresholds.ranging", t.ranging, 0.0, 1.0)?;
        open_closed("confirmation_thresholds.unknown", t.unknown, 0.0, 1.0)?;

        count("regime_lookback", self.regime_lookback, 3, 1000)?;
        range("trending_threshold", self.trending_threshold, 0.0, 1.0)?;
        range("strong_trend_threshold", self.strong_trend_threshold, 0.0, 100.0)?;

        count("trade_cooldown_days", self.trade_cooldown_days, 0, 1000)?;
        count("level_reuse_bars", self.level_reuse_bars, 0, 10_000)?;
        range("min_trade_spacing", self.min_trade_spacing, 0.0, 0.5)?;
        range("min_cash", self.min_cash, 0.0, f64::MAX)?;
        range("min_atr_pct", self.min_atr_pct, 0.0, 0.5)?;
        count("trend_filter_period", self.trend_filter_period, 1, 1000)?;
        count("max_concurrent_trades", self.max_concurrent_trades, 1, 100)?;

        open_closed("position_size_pct", self.position_size_pct, 0.0, 0.25)?;
        open_closed("stop_loss_atr_mult", self.stop_loss_atr_mult, 0.0, 20.0)?;
        range("structure_stop_buffer", self.structure_stop_buffer, 0.0, 0.1)?;
        open_closed("take_profit_ratio", self.take_profit_ratio, 0.0, 50.0)?;
        open_closed("max_portfolio_risk", self.max_portfolio_risk, 0.0, 1.0)?;
        count(
            "max_consecutive_losses",
            self.max_consecutive_losses as usize,
            1,
            100,
        )?;

        count("max_holding_days", self.max_holding_days, 1, 10_000)?;
        open_closed("trailing_stop_atr_mult", self.trailing_stop_atr_mult, 0.0, 20.0)?;
        open_closed("partial_profit_level", self.partial_profit_level, 0.0, 1.0)?;
        open_open("partial_profit_fraction", self.partial_profit_fraction, 0.0, 1.0)?;
        Ok(())
    }

    /// Bars of history needed before the swing tracker can confirm anything.
    pub fn swing_warmup(&self) -> usize {
        2 * self.lookback_period + 1
    }
}

// ─── Range helpers ──────────────────────────────────────────────────

fn out_of_range(field: &'static str, value: f64, expected: String) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        value,
        expected,
    }
}

/// Closed interval `[lo, hi]`.
fn range(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= lo && value <= hi {
        return Ok(());
    }
    Err(out_of_range(field, value, format!("[{lo}, {hi}]")))
}

/// Half-open interval `(lo, hi]`.
fn open_closed(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > lo && value <= hi {
        return Ok(());
    }
    Err(out_of_range(field, value, format!("({lo}, {hi}]")))
}

/// Open interval `(lo, hi)`.
fn open_open(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > lo && value < hi {
        return Ok(());
    }
    Err(out_of_range(field, value, format!("({lo}, {hi})")))
}

fn count(field: &'static str, value: usize, lo: usize, hi: usize) -> Result<(), ConfigError> {
    if value >= lo && value <= hi {
        return Ok(());
    }
    Err(out_of_range(field, value as f64, format!("[{lo}, {hi}]")))
}
