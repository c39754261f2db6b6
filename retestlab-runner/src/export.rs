//! Artifact export: JSON result, trade tape CSV, equity CSV, event log.
//!
//! Formats:
//! - **JSON**: the whole [`BacktestResult`], round-trippable
//! - **CSV**: trade tape with entry attribution, and the equity curve
//! - **JSONL**: the engine event log, one event per line
//!
//! Every persisted result carries `schema_version`; newer versions are
//! rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use retestlab_core::domain::TradeRecord;
use retestlab_core::events::EngineEvent;

use crate::runner::{BacktestResult, SCHEMA_VERSION};

// ─── JSON ───────────────────────────────────────────────────────────

/// Serialize a [`BacktestResult`] to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult")
}

/// Deserialize a [`BacktestResult`], rejecting schema versions newer than
/// [`SCHEMA_VERSION`]. A result without the field loads as the current version.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

/// One JSON object per line, in emission order.
pub fn export_events_jsonl(events: &[EngineEvent]) -> Result<String> {
    let mut out = String::new();
    for event in events {
        out.push_str(&serde_json::to_string(event).context("failed to serialize event")?);
        out.push('\n');
    }
    Ok(out)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Trade tape, one row per closed trade.
///
/// Columns: position_id, breakout_id, direction, entry_bar, entry_time,
/// entry_price, initial_stop, target_price, exit_bar, exit_time, exit_price,
/// exit_reason, size, realized_pnl, r_multiple, bars_held, breakout_level,
/// trend_at_entry, volatility_at_entry, partial_taken.
/// `realized_pnl` includes any partial exit taken before the close.
pub fn export_trades_csv(trades: &[TradeRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "position_id",
        "breakout_id",
        "direction",
        "entry_bar",
        "entry_time",
        "entry_price",
        "initial_stop",
        "target_price",
        "exit_bar",
        "exit_time",
        "exit_price",
        "exit_reason",
        "size",
        "realized_pnl",
        "r_multiple",
        "bars_held",
        "breakout_level",
        "trend_at_entry",
        "volatility_at_entry",
        "partial_taken",
    ])?;

    for t in trades {
        wtr.write_record([
            t.position_id.to_string(),
            t.breakout_id.to_string(),
            t.direction.to_string(),
            t.entry_bar.to_string(),
            t.entry_time.to_rfc3339(),
            format!("{:.6}", t.entry_price),
            format!("{:.6}", t.initial_stop),
            format!("{:.6}", t.target_price),
            t.exit_bar.to_string(),
            t.exit_time.to_rfc3339(),
            format!("{:.6}", t.exit_price),
            t.exit_reason.to_string(),
            t.size.to_string(),
            format!("{:.2}", t.realized_pnl),
            format!("{:.3}", t.r_multiple()),
            t.bars_held.to_string(),
            format!("{:.6}", t.breakout_level),
            format!("{:?}", t.regime_at_entry.trend_class),
            format!("{:?}", t.regime_at_entry.volatility_class),
            t.partial_taken.to_string(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Equity curve as `bar_index,equity`, equity rounded to cents.
pub fn export_equity_csv(equity_curve: &[f64]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["bar_index", "equity"])?;
    for (i, eq) in equity_curve.iter().enumerate() {
        wtr.write_record([i.to_string(), format!("{eq:.2}")])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `{symbol}_{run_id prefix}/` under `output_dir` with
/// `result.json`, `trades.csv`, `equity.csv` and `events.jsonl`.
///
/// The directory name depends only on the run id, so re-running an
/// identical backtest overwrites its own artifacts.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let short_id = result.run_id.get(..12).unwrap_or(&result.run_id);
    let run_dir = output_dir.join(format!("{}_{short_id}", result.symbol));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir {}", run_dir.display()))?;

    write(&run_dir.join("result.json"), &export_json(result)?)?;
    write(&run_dir.join("trades.csv"), &export_trades_csv(&result.trades)?)?;
    write(&run_dir.join("equity.csv"), &export_equity_csv(&result.equity_curve)?)?;
    write(&run_dir.join("events.jsonl"), &export_events_jsonl(&result.events)?)?;

    tracing::info!(symbol = %result.symbol, dir = %run_dir.display(), "artifacts saved");
    Ok(run_dir)
}

/// Read `result.json` back from an artifact directory.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let path = dir.join("result.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

fn write(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
