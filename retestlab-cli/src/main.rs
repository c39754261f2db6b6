//! RetestLab CLI: run, validate, and synthetic data commands.
//!
//! Commands:
//! - `run`: backtest every symbol in a TOML config and save artifacts
//! - `validate`: parse and range-check a config without running it
//! - `synthetic`: write a seeded random-walk CSV for demos

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use retestlab_runner::synthetic::generate_bars;
use retestlab_runner::{run_universe, save_artifacts, write_bars_csv, BacktestConfig, BacktestResult};

#[derive(Parser)]
#[command(
    name = "retestlab",
    version,
    about = "RetestLab CLI: breakout-retest swing strategy backtester"
)]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest every symbol in a config file.
    Run {
        /// Path to the TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Override `backtest.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Where to write artifacts (default: `backtest.output_dir`, else "results").
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Generate bars for symbols with no CSV.
        #[arg(long, default_value_t = false)]
        synthetic: bool,
    },
    /// Parse and validate a config file.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Write seeded synthetic bars to a CSV file.
    Synthetic {
        #[arg(long, default_value_t = 756)]
        bars: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            data_dir,
            output_dir,
            synthetic,
        } => run_cmd(config, data_dir, output_dir, synthetic),
        Commands::Validate { config } => validate_cmd(config),
        Commands::Synthetic { bars, seed, out } => synthetic_cmd(bars, seed, out),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_cmd(
    config_path: PathBuf,
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    synthetic: bool,
) -> Result<()> {
    let mut config = BacktestConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(dir) = data_dir {
        config.backtest.data_dir = dir;
    }
    if synthetic {
        config.backtest.synthetic = true;
    }
    let output_dir = output_dir
        .or_else(|| config.backtest.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("results"));

    info!(
        symbols = config.backtest.symbols.len(),
        data_dir = %config.backtest.data_dir.display(),
        "starting backtest"
    );

    let mut failures = 0;
    for (symbol, outcome) in run_universe(&config) {
        match outcome {
            Ok(result) => {
                print_summary(&result);
                let dir = save_artifacts(&result, &output_dir)?;
                println!("Artifacts saved to: {}", dir.display());
            }
            Err(err) => {
                error!(%symbol, error = %err, "backtest failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} symbols failed", config.backtest.symbols.len());
    }
    Ok(())
}

fn validate_cmd(config_path: PathBuf) -> Result<()> {
    let config = BacktestConfig::from_file(&config_path)
        .with_context(|| format!("validating {}", config_path.display()))?;
    println!(
        "{} is valid: {} symbol(s), initial capital {:.0}",
        config_path.display(),
        config.backtest.symbols.len(),
        config.backtest.initial_capital
    );
    Ok(())
}

fn synthetic_cmd(bars: usize, seed: u64, out: PathBuf) -> Result<()> {
    if bars == 0 {
        bail!("--bars must be at least 1");
    }
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let series = generate_bars(bars, seed);
    write_bars_csv(&out, &series)?;
    println!("Wrote {bars} synthetic bars (seed {seed}) to {}", out.display());
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    let stats = &result.retest_stats;
    println!();
    println!("=== {} ===", result.symbol);
    println!("Period:         {} to {}", result.start, result.end);
    println!("Bars:           {}", result.bar_count);
    println!("Run ID:         {}", result.run_id);
    println!();
    println!("--- Retests ---");
    println!("Attempts:       {}", stats.attempts);
    println!("Confirmed:      {}", stats.confirmed);
    println!("Rejected:       {}", stats.rejected);
    println!("Entries:        {}", stats.entries);
    println!("Success Rate:   {:.1}%", stats.success_rate() * 100.0);
    println!();
    println!("--- Performance ---");
    println!("Trades:         {}", m.trade_count);
    println!("Total Return:   {:.2}%", m.total_return * 100.0);
    println!("CAGR:           {:.2}%", m.cagr * 100.0);
    println!("Sharpe:         {:.3}", m.sharpe);
    println!("Sortino:        {:.3}", m.sortino);
    println!("Max Drawdown:   {:.2}%", m.max_drawdown * 100.0);
    println!("Win Rate:       {:.1}%", m.win_rate * 100.0);
    println!("Profit Factor:  {:.2}", m.profit_factor);
    println!("Avg R:          {:.2}", m.avg_r_multiple);
    println!("Max Consec Loss:{}", m.max_consecutive_losses);
    if result.rejected_bars > 0 || result.broker_failures > 0 {
        println!();
        println!(
            "Skipped bars: {}  Broker refusals: {}",
            result.rejected_bars, result.broker_failures
        );
    }
    if result.has_synthetic {
        println!();
        println!("WARNING: results use SYNTHETIC data");
    }
}
