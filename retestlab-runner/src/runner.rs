//! Backtest runner: wires bars, indicators, engine, paper broker and metrics.
//!
//! Entry points:
//! - `run_backtest()`: pre-loaded bars in, result out. No I/O.
//! - `run_symbol()`: resolves one symbol's bars from the config, then runs.
//! - `run_universe()`: `run_symbol()` for every configured symbol, in parallel.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use retestlab_core::broker::Broker;
use retestlab_core::components::RetestStats;
use retestlab_core::domain::{Bar, TradeRecord};
use retestlab_core::events::EngineEvent;
use retestlab_core::{Engine, EngineError, StepOutput, StrategyConfig};

use crate::broker::PaperBroker;
use crate::config::{run_id, BacktestConfig, RunId};
use crate::data_loader::{dataset_hash, load_bars_csv, LoadError};
use crate::indicators::compute_snapshots;
use crate::metrics::PerformanceMetrics;
use crate::synthetic;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("strategy config error: {0}")]
    Strategy(#[from] retestlab_core::ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single-symbol backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// BLAKE3 of strategy, symbol, capital and dataset; see [`run_id`].
    pub run_id: RunId,
    pub symbol: String,
    pub dataset_hash: String,
    /// Bars came from the synthetic generator, not a data file.
    pub has_synthetic: bool,
    /// RFC 3339 timestamp of the first bar.
    pub start: String,
    /// RFC 3339 timestamp of the last bar.
    pub end: String,
    pub bar_count: usize,
    pub initial_capital: f64,
    pub config: StrategyConfig,
    pub metrics: PerformanceMetrics,
    pub retest_stats: RetestStats,
    /// Closed trades in close order, including the end-of-data flatten.
    pub trades: Vec<TradeRecord>,
    pub events: Vec<EngineEvent>,
    /// Portfolio value at each bar's close.
    pub equity_curve: Vec<f64>,
    /// Bars the engine refused (malformed OHLC).
    pub rejected_bars: usize,
    /// Bars on which the broker refused an intent.
    pub broker_failures: usize,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Run one symbol over pre-loaded bars.
///
/// Per-bar failures do not abort the run: a malformed bar is skipped and a
/// broker refusal leaves the engine book rolled back to what the broker
/// actually executed; both are counted. Trades closed before a refusal are
/// kept. Open positions are flattened at the last close.
pub fn run_backtest(
    strategy: &StrategyConfig,
    symbol: &str,
    bars: &[Bar],
    initial_capital: f64,
) -> Result<BacktestResult, RunError> {
    let mut engine = Engine::new(strategy.clone())?;
    let mut broker = PaperBroker::new(initial_capital);
    let snapshots = compute_snapshots(bars, strategy);

    let mut trades = Vec::new();
    let mut events = Vec::new();
    let mut equity_curve = Vec::with_capacity(bars.len());
    let mut rejected_bars = 0;
    let mut broker_failures = 0;

    let mut record = |outcome: Result<StepOutput, EngineError>| match outcome {
        Ok(out) => {
            trades.extend(out.closed_trades);
            events.extend(out.events);
        }
        // intents executed before the refusal are booked; keep their trades
        Err(EngineError::Broker { source, executed }) => {
            warn!(symbol, error = %source, "broker refused intent");
            broker_failures += 1;
            trades.extend(executed.closed_trades);
            events.extend(executed.events);
        }
        Err(EngineError::InvalidBar { index, reason }) => {
            warn!(symbol, index, %reason, "bar skipped");
            rejected_bars += 1;
        }
    };

    for (bar, ind) in bars.iter().zip(&snapshots) {
        broker.mark(bar.close);
        record(engine.on_bar(bar, ind, &mut broker));
        equity_curve.push(broker.portfolio_value());
    }
    // a refused close here leaves that position open at its mark
    record(engine.flatten(&mut broker));

    if let Some(last) = equity_curve.last_mut() {
        *last = broker.portfolio_value();
    }

    let hash = dataset_hash(symbol, bars);
    let metrics = PerformanceMetrics::compute(&equity_curve, &trades);
    let retest_stats = engine.state().risk.retest_stats;
    info!(
        symbol,
        bars = bars.len(),
        trades = trades.len(),
        total_return = metrics.total_return,
        retest_success = retest_stats.success_rate(),
        "backtest complete"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id: run_id(strategy, symbol, initial_capital, &hash)?,
        symbol: symbol.to_string(),
        dataset_hash: hash,
        has_synthetic: false,
        start: bars.first().map(|b| b.timestamp.to_rfc3339()).unwrap_or_default(),
        end: bars.last().map(|b| b.timestamp.to_rfc3339()).unwrap_or_default(),
        bar_count: bars.len(),
        initial_capital,
        config: strategy.clone(),
        metrics,
        retest_stats,
        trades,
        events,
        equity_curve,
        rejected_bars,
        broker_failures,
    })
}

/// Load `symbol` per the config and run it.
///
/// A missing CSV falls back to generated bars when `backtest.synthetic` is
/// set; the result is tagged `has_synthetic`.
pub fn run_symbol(config: &BacktestConfig, symbol: &str) -> Result<BacktestResult, RunError> {
    let (bars, has_synthetic) = match load_bars_csv(symbol, &config.data_path(symbol)) {
        Ok(bars) => (bars, false),
        Err(LoadError::NotFound { .. }) if config.backtest.synthetic => {
            warn!(symbol, "no data file, using synthetic bars");
            (
                synthetic::generate_for_symbol(symbol, config.backtest.synthetic_bars),
                true,
            )
        }
        Err(e) => return Err(e.into()),
    };
    let mut result = run_backtest(&config.strategy, symbol, &bars, config.backtest.initial_capital)?;
    result.has_synthetic = has_synthetic;
    Ok(result)
}

/// Every configured symbol, one engine and one broker each, in parallel.
/// Results come back in config order.
pub fn run_universe(config: &BacktestConfig) -> Vec<(String, Result<BacktestResult, RunError>)> {
    config
        .backtest
        .symbols
        .par_iter()
        .map(|symbol| (symbol.clone(), run_symbol(config, symbol)))
        .collect()
}
