//! Bar loading from CSV files.
//!
//! One file per symbol with a header row:
//!
//! ```text
//! timestamp,open,high,low,close,volume
//! 2024-01-02,100.0,101.5,99.2,101.0,1250000
//! ```
//!
//! Timestamps are either RFC 3339 or a bare `YYYY-MM-DD` date (taken as
//! midnight UTC). Rows must be strictly increasing in time. OHLC sanity is
//! not checked here: the engine rejects malformed bars itself.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use retestlab_core::domain::Bar;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No CSV at the expected path. The runner may fall back to synthetic bars.
    #[error("no data file for '{symbol}' at {}", path.display())]
    NotFound { symbol: String, path: PathBuf },

    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// A field that deserialized but did not parse, such as a bad timestamp.
    #[error("row {row}: {reason}")]
    Parse { row: usize, reason: String },

    #[error("row {row}: timestamp {timestamp} is not after the previous row")]
    Unsorted { row: usize, timestamp: DateTime<Utc> },

    #[error("no bars in input")]
    Empty,
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Load bars for `symbol` from a CSV file.
///
/// A missing file is [`LoadError::NotFound`], distinct from an unreadable
/// one, so callers can tell "no data" from "bad data".
pub fn load_bars_csv(symbol: &str, path: &Path) -> Result<Vec<Bar>, LoadError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            LoadError::NotFound {
                symbol: symbol.to_string(),
                path: path.to_path_buf(),
            }
        } else {
            LoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let bars = read_bars(file)?;
    tracing::debug!(symbol, path = %path.display(), bars = bars.len(), "loaded bars");
    Ok(bars)
}

/// Parse bars from any CSV source.
pub fn read_bars<R: Read>(reader: R) -> Result<Vec<Bar>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars: Vec<Bar> = Vec::new();

    for (i, row) in rdr.deserialize::<CsvRow>().enumerate() {
        // header is row 1
        let row_no = i + 2;
        let row = row?;
        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| LoadError::Parse {
            row: row_no,
            reason: format!("unrecognized timestamp {:?}", row.timestamp),
        })?;
        if let Some(prev) = bars.last() {
            if timestamp <= prev.timestamp {
                return Err(LoadError::Unsorted {
                    row: row_no,
                    timestamp,
                });
            }
        }
        bars.push(Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }

    if bars.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(bars)
}

/// Write bars in the format [`read_bars`] accepts.
pub fn write_bars<W: Write>(writer: W, bars: &[Bar]) -> Result<(), LoadError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for bar in bars {
        wtr.serialize(CsvRow {
            timestamp: bar.timestamp.to_rfc3339(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        })?;
    }
    wtr.flush().map_err(|e| LoadError::Csv(e.into()))?;
    Ok(())
}

/// Create (or truncate) `path` and write `bars` to it.
pub fn write_bars_csv(path: &Path, bars: &[Bar]) -> Result<(), LoadError> {
    let file = File::create(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_bars(file, bars)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// BLAKE3 over the symbol and every bar's timestamp and OHLCV.
pub fn dataset_hash(symbol: &str, bars: &[Bar]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(symbol.as_bytes());
    for bar in bars {
        hasher.update(&bar.timestamp.timestamp().to_le_bytes());
        hasher.update(&bar.open.to_le_bytes());
        hasher.update(&bar.high.to_le_bytes());
        hasher.update(&bar.low.to_le_bytes());
        hasher.update(&bar.close.to_le_bytes());
        hasher.update(&bar.volume.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
