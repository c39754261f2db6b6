//! Performance metrics: pure functions over an equity curve and trade list.
//!
//! Every metric takes plain slices and returns a scalar; nothing here knows
//! about the engine or the broker. Annualization assumes 252 bars a year.

use serde::{Deserialize, Serialize};

use retestlab_core::domain::{ExitReason, TradeRecord};

const TRADING_DAYS: f64 = 252.0;

/// Aggregate statistics for one backtest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Negative fraction; 0.0 when equity never fell below a prior peak.
    pub max_drawdown: f64,
    pub trade_count: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    /// Mean realized P&L per trade, in currency.
    pub expectancy: f64,
    /// Mean of realized P&L over initial risk (entry to initial stop).
    pub avg_r_multiple: f64,
    pub avg_bars_held: f64,
    pub max_consecutive_losses: usize,
    pub exit_breakdown: ExitBreakdown,
}

/// How trades ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitBreakdown {
    pub stop_loss: usize,
    pub take_profit: usize,
    pub time_exit: usize,
    pub flatten: usize,
}

impl PerformanceMetrics {
    /// Compute every metric from one run's equity curve and closed trades.
    pub fn compute(equity_curve: &[f64], trades: &[TradeRecord]) -> Self {
        let returns = period_returns(equity_curve);
        Self {
            total_return: total_return(equity_curve),
            cagr: cagr(equity_curve),
            sharpe: sharpe_ratio(&returns),
            sortino: sortino_ratio(&returns),
            max_drawdown: max_drawdown(equity_curve),
            trade_count: trades.len(),
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            expectancy: mean(&trades.iter().map(|t| t.realized_pnl).collect::<Vec<_>>()),
            avg_r_multiple: mean(&trades.iter().map(TradeRecord::r_multiple).collect::<Vec<_>>()),
            avg_bars_held: mean(&trades.iter().map(|t| t.bars_held as f64).collect::<Vec<_>>()),
            max_consecutive_losses: max_consecutive_losses(trades),
            exit_breakdown: ExitBreakdown::tally(trades),
        }
    }
}

impl ExitBreakdown {
    /// Count trades by [`ExitReason`].
    pub fn tally(trades: &[TradeRecord]) -> Self {
        let mut out = Self::default();
        for t in trades {
            match t.exit_reason {
                ExitReason::StopLoss => out.stop_loss += 1,
                ExitReason::TakeProfit => out.take_profit += 1,
                ExitReason::TimeExit => out.time_exit += 1,
                ExitReason::Flatten => out.flatten += 1,
            }
        }
        out
    }
}

// ─── Curve metrics ──────────────────────────────────────────────────

/// (last − first) / first; 0.0 for fewer than two points.
pub fn total_return(equity_curve: &[f64]) -> f64 {
    match (equity_curve.first(), equity_curve.last()) {
        (Some(&first), Some(&last)) if equity_curve.len() >= 2 && first > 0.0 => {
            (last - first) / first
        }
        _ => 0.0,
    }
}

/// Compound annual growth, 252 bars per year.
pub fn cagr(equity_curve: &[f64]) -> f64 {
    let (Some(&first), Some(&last)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    if equity_curve.len() < 2 || first <= 0.0 || last <= 0.0 {
        return 0.0;
    }
    let years = equity_curve.len() as f64 / TRADING_DAYS;
    (last / first).powf(1.0 / years) - 1.0
}

/// Deepest peak-to-trough decline, as a negative fraction.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &eq in equity_curve {
        peak = peak.max(eq);
        if peak > 0.0 {
            worst = worst.min((eq - peak) / peak);
        }
    }
    worst
}

/// Annualized Sharpe with a zero risk-free rate.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let sd = std_dev(returns);
    if sd < 1e-15 {
        return 0.0;
    }
    mean(returns) / sd * TRADING_DAYS.sqrt()
}

/// Annualized Sortino: downside deviation over all periods.
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let downside: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).sum();
    let dd = (downside / returns.len() as f64).sqrt();
    if dd < 1e-15 {
        return 0.0;
    }
    mean(returns) / dd * TRADING_DAYS.sqrt()
}

/// Bar-to-bar simple returns; a non-positive prior value yields 0.0.
pub fn period_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

// ─── Trade metrics ──────────────────────────────────────────────────

/// Fraction of trades with positive realized P&L.
pub fn win_rate(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross profit / gross loss, capped at 100.
pub fn profit_factor(trades: &[TradeRecord]) -> f64 {
    let (profit, loss) = trades.iter().fold((0.0, 0.0), |(p, l), t| {
        if t.realized_pnl > 0.0 {
            (p + t.realized_pnl, l)
        } else {
            (p, l - t.realized_pnl)
        }
    });
    if loss < 1e-10 {
        return if profit > 0.0 { 100.0 } else { 0.0 };
    }
    (profit / loss).min(100.0)
}

/// Longest run of non-winning trades. Breakeven counts as a loss, the
/// same way the engine's loss throttle counts it.
pub fn max_consecutive_losses(trades: &[TradeRecord]) -> usize {
    let mut best = 0;
    let mut run = 0;
    for t in trades {
        if t.is_winner() {
            run = 0;
        } else {
            run += 1;
            best = best.max(run);
        }
    }
    best
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use retestlab_core::components::RegimeState;
    use retestlab_core::domain::{BreakoutId, Direction, PositionId};

    fn trade(pnl: f64, reason: ExitReason) -> TradeRecord {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        TradeRecord {
            position_id: PositionId(1),
            breakout_id: BreakoutId(1),
            direction: Direction::Long,
            entry_bar: 10,
            entry_time: t,
            entry_price: 100.0,
            initial_stop: 95.0,
            target_price: 110.0,
            exit_bar: 14,
            exit_time: t,
            exit_price: 100.0 + pnl / 10.0,
            exit_reason: reason,
            size: 10,
            realized_pnl: pnl,
            bars_held: 4,
            breakout_level: 99.0,
            regime_at_entry: RegimeState::unknown(),
            partial_taken: false,
        }
    }

    #[test]
    fn flat_curve_is_all_zero() {
        let curve = vec![100.0; 50];
        assert_eq!(total_return(&curve), 0.0);
        assert_eq!(cagr(&curve), 0.0);
        assert_eq!(max_drawdown(&curve), 0.0);
        assert_eq!(sharpe_ratio(&period_returns(&curve)), 0.0);
    }

    #[test]
    fn drawdown_tracks_the_running_peak() {
        let curve = [100.0, 120.0, 90.0, 130.0, 117.0];
        assert!((max_drawdown(&curve) + 0.25).abs() < 1e-12);
    }

    #[test]
    fn one_year_doubling() {
        let curve: Vec<f64> = (0..252).map(|i| 100.0 * 2f64.powf(i as f64 / 251.0)).collect();
        assert!((total_return(&curve) - 1.0).abs() < 1e-9);
        assert!((cagr(&curve) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn steady_gains_have_no_downside() {
        let curve: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 + (i % 2) as f64 * 0.1).collect();
        let r = period_returns(&curve);
        assert!(sharpe_ratio(&r) > 0.0);
        assert_eq!(sortino_ratio(&r), 0.0);
    }

    #[test]
    fn trade_stats() {
        let trades = vec![
            trade(100.0, ExitReason::TakeProfit),
            trade(-50.0, ExitReason::StopLoss),
            trade(-25.0, ExitReason::StopLoss),
            trade(75.0, ExitReason::TimeExit),
            trade(0.0, ExitReason::Flatten),
        ];
        assert_eq!(win_rate(&trades), 0.4);
        assert!((profit_factor(&trades) - 175.0 / 75.0).abs() < 1e-12);
        assert_eq!(max_consecutive_losses(&trades), 2);

        let m = PerformanceMetrics::compute(&[100.0, 101.0], &trades);
        assert_eq!(m.trade_count, 5);
        assert_eq!(m.expectancy, 20.0);
        assert_eq!(m.avg_bars_held, 4.0);
        assert_eq!(
            m.exit_breakdown,
            ExitBreakdown {
                stop_loss: 2,
                take_profit: 1,
                time_exit: 1,
                flatten: 1,
            }
        );
    }

    #[test]
    fn profit_factor_edges() {
        assert_eq!(profit_factor(&[]), 0.0);
        assert_eq!(profit_factor(&[trade(10.0, ExitReason::TakeProfit)]), 100.0);
        assert_eq!(profit_factor(&[trade(-10.0, ExitReason::StopLoss)]), 0.0);
    }

    #[test]
    fn empty_inputs() {
        let m = PerformanceMetrics::compute(&[], &[]);
        assert_eq!(m, PerformanceMetrics::default());
    }
}
