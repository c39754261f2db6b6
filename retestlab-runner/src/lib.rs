//! RetestLab Runner: backtest harness around `retestlab-core`.
//!
//! This crate provides:
//! - TOML backtest configuration with deterministic run ids
//! - CSV bar loading and a seeded synthetic bar generator
//! - A reference indicator feed (ATR, RSI, trend SMA, volume SMA)
//! - A paper broker with immediate fills at the bar close
//! - Single-symbol and parallel universe runners
//! - Performance metrics and artifact export

pub mod broker;
pub mod config;
pub mod data_loader;
pub mod export;
pub mod indicators;
pub mod metrics;
pub mod runner;
pub mod synthetic;

pub use broker::{Fill, PaperBroker};
pub use config::{run_id, BacktestConfig, BacktestSection, ConfigError, RunId};
pub use data_loader::{dataset_hash, load_bars_csv, read_bars, write_bars_csv, LoadError};
pub use export::{
    export_equity_csv, export_events_jsonl, export_json, export_trades_csv, import_json,
    load_artifacts, save_artifacts,
};
pub use indicators::compute_snapshots;
pub use metrics::PerformanceMetrics;
pub use runner::{run_backtest, run_symbol, run_universe, BacktestResult, RunError, SCHEMA_VERSION};
