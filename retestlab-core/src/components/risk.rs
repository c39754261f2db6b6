//! Entry gating, stop/target placement, and position sizing.
//!
//! Gates run in a fixed order and stop at the first failure:
//! 0. open positions below `max_concurrent_trades`
//! 1. trade cooldown (bars since the last entry)
//! 2. breakout level not traded recently
//! 3. entry price not within `min_trade_spacing` of a recent entry
//! 4. market sanity (cash, ATR, price)
//! 5. trend filter (optional)
//! 6. volatility floor
//!
//! Every rejection is a [`RejectionReason`], never an error.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::levels::{LevelBook, LevelKind};
use super::swing::{SwingKind, SwingTracker};
use crate::config::StrategyConfig;
use crate::domain::Direction;

/// Recent entries remembered for level reuse and spacing checks.
pub const MAX_RECENT_ENTRIES: usize = 10;

const TREND_FILTER_MARGIN: f64 = 0.02;
/// Structure swings must sit at least this far from the reference price.
const STRUCTURE_CLEARANCE: f64 = 0.02;
const STRUCTURE_SWINGS: usize = 5;
const TARGET_SWINGS: usize = 10;
const TARGET_BUFFER: f64 = 0.01;
const MIN_REWARD_RISK: f64 = 1.5;

/// Why an entry trigger did not become a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    MaxConcurrent,
    Cooldown,
    LevelRecentlyTraded,
    TooCloseToRecentTrade,
    InsufficientCash,
    InvalidMarketState,
    TrendFilter,
    VolatilityFloor,
    RiskLimitExceeded,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::MaxConcurrent => write!(f, "MaxConcurrent"),
            RejectionReason::Cooldown => write!(f, "Cooldown"),
            RejectionReason::LevelRecentlyTraded => write!(f, "LevelRecentlyTraded"),
            RejectionReason::TooCloseToRecentTrade => write!(f, "TooCloseToRecentTrade"),
            RejectionReason::InsufficientCash => write!(f, "InsufficientCash"),
            RejectionReason::InvalidMarketState => write!(f, "InvalidMarketState"),
            RejectionReason::TrendFilter => write!(f, "TrendFilter"),
            RejectionReason::VolatilityFloor => write!(f, "VolatilityFloor"),
            RejectionReason::RiskLimitExceeded => write!(f, "RiskLimitExceeded"),
        }
    }
}

/// A rejected entry with the numbers behind the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub context: String,
}

impl Rejection {
    fn new(reason: RejectionReason, context: String) -> Self {
        Self { reason, context }
    }
}

/// Cash and equity as reported by the broker collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cash: f64,
    pub portfolio_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecentEntry {
    pub bar_index: usize,
    pub price: f64,
    pub level_price: f64,
}

/// Retest funnel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetestStats {
    /// Touched-level evaluations.
    pub attempts: u64,
    pub confirmed: u64,
    pub rejected: u64,
    /// Confirmed retests that passed gating and sizing.
    pub entries: u64,
    pub wins: u64,
}

impl RetestStats {
    /// Share of entered retests that closed profitably.
    pub fn success_rate(&self) -> f64 {
        if self.entries == 0 {
            return 0.0;
        }
        self.wins as f64 / self.entries as f64
    }
}

/// Loss streak, realized P&L, and entry history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub consecutive_losses: u32,
    pub realized_pnl: f64,
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub last_entry_bar: Option<usize>,
    pub recent_entries: VecDeque<RecentEntry>,
    pub retest_stats: RetestStats,
}

impl RiskState {
    pub fn record_entry(&mut self, entry: RecentEntry) {
        self.last_entry_bar = Some(entry.bar_index);
        if self.recent_entries.len() == MAX_RECENT_ENTRIES {
            self.recent_entries.pop_front();
        }
        self.recent_entries.push_back(entry);
        self.retest_stats.entries += 1;
    }

    /// Book a closed trade. A win resets the loss streak.
    pub fn record_close(&mut self, pnl: f64) {
        self.realized_pnl += pnl;
        self.trades += 1;
        if pnl > 0.0 {
            self.wins += 1;
            self.consecutive_losses = 0;
            self.retest_stats.wins += 1;
        } else {
            self.losses += 1;
            self.consecutive_losses += 1;
        }
    }

    /// Entries still inside the reuse window as of `bar_index`.
    fn active_entries(&self, bar_index: usize, window: usize) -> impl Iterator<Item = &RecentEntry> {
        self.recent_entries
            .iter()
            .filter(move |e| bar_index.saturating_sub(e.bar_index) < window)
    }
}

/// Everything the gates look at for one candidate entry.
#[derive(Debug, Clone, Copy)]
pub struct GateInput {
    pub bar_index: usize,
    pub direction: Direction,
    pub price: f64,
    pub level_price: f64,
    pub atr: Option<f64>,
    pub trend_ma: Option<f64>,
    pub cash: f64,
    pub open_positions: usize,
}

/// Run the entry gates in order.
pub fn check_entry(input: &GateInput, risk: &RiskState, config: &StrategyConfig) -> Result<(), Rejection> {
    use RejectionReason::*;

    if input.open_positions >= config.max_concurrent_trades {
        return Err(Rejection::new(
            MaxConcurrent,
            format!("open={}, max={}", input.open_positions, config.max_concurrent_trades),
        ));
    }

    if let Some(last) = risk.last_entry_bar {
        let elapsed = input.bar_index.saturating_sub(last);
        if elapsed < config.trade_cooldown_days {
            return Err(Rejection::new(
                Cooldown,
                format!("bars_since_entry={elapsed}, cooldown={}", config.trade_cooldown_days),
            ));
        }
    }

    if let Some(e) = risk
        .active_entries(input.bar_index, config.level_reuse_bars)
        .find(|e| (e.level_price - input.level_price).abs() / e.level_price <= config.level_tolerance)
    {
        return Err(Rejection::new(
            LevelRecentlyTraded,
            format!("level={:.4}, traded at bar {}", e.level_price, e.bar_index),
        ));
    }

    if let Some(e) = risk
        .active_entries(input.bar_index, config.level_reuse_bars)
        .find(|e| (input.price - e.price).abs() / e.price < config.min_trade_spacing)
    {
        return Err(Rejection::new(
            TooCloseToRecentTrade,
            format!("price={:.4}, recent={:.4}, spacing={:.4}", input.price, e.price, config.min_trade_spacing),
        ));
    }

    if input.cash < config.min_cash {
        return Err(Rejection::new(
            InsufficientCash,
            format!("cash={:.2}, min_cash={:.2}", input.cash, config.min_cash),
        ));
    }
    let atr = match input.atr {
        Some(atr) if atr > 0.0 && input.price > 0.0 => atr,
        _ => {
            return Err(Rejection::new(
                InvalidMarketState,
                format!("price={:.4}, atr={:?}", input.price, input.atr),
            ))
        }
    };

    if config.enable_trend_filter {
        let Some(ma) = input.trend_ma else {
            return Err(Rejection::new(TrendFilter, "trend MA unavailable".to_string()));
        };
        let passes = match input.direction {
            Direction::Long => input.price >= ma * (1.0 + TREND_FILTER_MARGIN),
            Direction::Short => input.price <= ma * (1.0 - TREND_FILTER_MARGIN),
        };
        if !passes {
            return Err(Rejection::new(
                TrendFilter,
                format!("{} price={:.4}, ma={:.4}", input.direction, input.price, ma),
            ));
        }
    }

    let atr_pct = atr / input.price;
    if atr_pct < config.min_atr_pct {
        return Err(Rejection::new(
            VolatilityFloor,
            format!("atr_pct={atr_pct:.4}, min={:.4}", config.min_atr_pct),
        ));
    }
    Ok(())
}

// ─── Stops and targets ──────────────────────────────────────────────

/// Nearest qualifying swing on the loss side of `reference`, buffered.
///
/// Longs use the highest of the last 5 swing lows below
/// `reference × 0.98`, placed `structure_stop_buffer` beneath it; shorts
/// mirror with swing highs.
pub fn structure_level(
    direction: Direction,
    reference: f64,
    swings: &SwingTracker,
    buffer: f64,
) -> Option<f64> {
    match direction {
        Direction::Long => swings
            .recent(SwingKind::Low, STRUCTURE_SWINGS)
            .map(|s| s.price)
            .filter(|&p| p < reference * (1.0 - STRUCTURE_CLEARANCE))
            .reduce(f64::max)
            .map(|p| p * (1.0 - buffer)),
        Direction::Short => swings
            .recent(SwingKind::High, STRUCTURE_SWINGS)
            .map(|s| s.price)
            .filter(|&p| p > reference * (1.0 + STRUCTURE_CLEARANCE))
            .reduce(f64::min)
            .map(|p| p * (1.0 + buffer)),
    }
}

/// Initial stop: ATR-based, replaced by the structure stop when one lies
/// within twice the ATR distance.
pub fn initial_stop(
    direction: Direction,
    entry: f64,
    atr: f64,
    swings: &SwingTracker,
    config: &StrategyConfig,
) -> f64 {
    let atr_distance = atr * config.stop_loss_atr_mult;
    let atr_stop = entry - direction.sign() * atr_distance;
    if !config.use_structure_stops {
        return atr_stop;
    }
    match structure_level(direction, entry, swings, config.structure_stop_buffer) {
        Some(s) if (entry - s).abs() <= 2.0 * atr_distance => s,
        _ => atr_stop,
    }
}

/// Take-profit price.
///
/// Adaptive: the nearest opposite-side level or recent swing more than 1%
/// beyond entry, but never closer than 1.5R. Falls back to (or, when
/// adaptive targeting is off, always uses) `entry ± risk × take_profit_ratio`.
pub fn initial_target(
    direction: Direction,
    entry: f64,
    stop: f64,
    levels: &LevelBook,
    swings: &SwingTracker,
    config: &StrategyConfig,
) -> f64 {
    let risk = (entry - stop).abs();
    let fixed = entry + direction.sign() * risk * config.take_profit_ratio;
    if !config.use_adaptive_targets {
        return fixed;
    }
    let floor = entry + direction.sign() * risk * MIN_REWARD_RISK;

    match direction {
        Direction::Long => {
            let threshold = entry * (1.0 + TARGET_BUFFER);
            levels
                .of_kind(LevelKind::Resistance)
                .iter()
                .map(|l| l.price)
                .chain(swings.recent(SwingKind::High, TARGET_SWINGS).map(|s| s.price))
                .filter(|&p| p > threshold)
                .reduce(f64::min)
                .map_or(fixed, |nearest| nearest.max(floor))
        }
        Direction::Short => {
            let threshold = entry * (1.0 - TARGET_BUFFER);
            levels
                .of_kind(LevelKind::Support)
                .iter()
                .map(|l| l.price)
                .chain(swings.recent(SwingKind::Low, TARGET_SWINGS).map(|s| s.price))
                .filter(|&p| p < threshold)
                .reduce(f64::max)
                .map_or(fixed, |nearest| nearest.min(floor))
        }
    }
}

// ─── Sizing ─────────────────────────────────────────────────────────

/// Inputs to [`position_size`]. Sizing is a pure function of these and the config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingInput {
    pub portfolio_value: f64,
    pub cash: f64,
    pub entry: f64,
    pub stop: f64,
    pub volatility_multiplier: f64,
    pub consecutive_losses: u32,
    /// Risk already committed by open positions, in currency.
    pub open_risk: f64,
}

/// Risk multiplier after a losing streak. 1.0 until the streak reaches
/// `max_losses`, then shrinking by 0.25 per extra loss down to 0.5.
pub fn loss_throttle(consecutive_losses: u32, max_losses: u32) -> f64 {
    if consecutive_losses < max_losses {
        return 1.0;
    }
    let excess = (consecutive_losses - max_losses + 1) as f64;
    (1.0 - 0.25 * excess).max(0.5)
}

/// Units to trade; 0 means the entry must be rejected.
pub fn position_size(input: &SizingInput, config: &StrategyConfig) -> u64 {
    let per_unit = (input.entry - input.stop).abs();
    if !per_unit.is_finite() || per_unit <= 0.0 || input.portfolio_value <= 0.0 || input.entry <= 0.0 {
        return 0;
    }

    let risk_amount = input.portfolio_value
        * config.position_size_pct
        * input.volatility_multiplier
        * loss_throttle(input.consecutive_losses, config.max_consecutive_losses);
    let desired = whole_units(risk_amount / per_unit).max(1);

    let budget = config.max_portfolio_risk * input.portfolio_value - input.open_risk.max(0.0);
    if budget <= 0.0 {
        return 0;
    }
    let by_budget = whole_units(budget / per_unit);
    let by_cash = whole_units(input.cash.max(0.0) / input.entry);

    desired.min(by_budget).min(by_cash)
}

/// Floor to whole units, absorbing float noise just below an integer.
fn whole_units(x: f64) -> u64 {
    if !x.is_finite() || x <= 0.0 {
        return 0;
    }
    (x + 1e-9).floor() as u64
}
