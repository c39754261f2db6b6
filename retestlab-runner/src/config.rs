//! Backtest configuration loaded from TOML.
//!
//! ```toml
//! [backtest]
//! symbols = ["SPY", "QQQ"]
//! initial_capital = 100000.0
//! data_dir = "data"
//!
//! [strategy]
//! lookback_period = 5
//! min_level_strength = 2.0
//! ```
//!
//! The `[strategy]` table is a [`StrategyConfig`]; any key it omits takes
//! its default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use retestlab_core::StrategyConfig;

/// Content-addressed identifier of a backtest run.
pub type RunId = String;

/// Errors loading or validating a backtest config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid [backtest] section: {0}")]
    Invalid(String),
    #[error("invalid [strategy] section: {0}")]
    Strategy(#[from] retestlab_core::ConfigError),
}

/// Top-level config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub backtest: BacktestSection,
    #[serde(default)]
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    /// One CSV per symbol is read from `data_dir/<SYMBOL>.csv`.
    pub symbols: Vec<String>,
    /// Starting cash for each symbol's paper broker.
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Artifact root; the CLI falls back to `results`.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Fall back to generated bars when a symbol's CSV is missing.
    #[serde(default)]
    pub synthetic: bool,
    /// Length of a generated series.
    #[serde(default = "default_synthetic_bars")]
    pub synthetic_bars: usize,
}

fn default_initial_capital() -> f64 {
    100_000.0
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_synthetic_bars() -> usize {
    756
}

impl BacktestConfig {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: BacktestConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the `[backtest]` section, then the strategy's own ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bt = &self.backtest;
        if bt.symbols.is_empty() {
            return Err(ConfigError::Invalid("symbols must not be empty".into()));
        }
        if let Some(bad) = bt.symbols.iter().find(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("blank symbol {bad:?}")));
        }
        if !bt.initial_capital.is_finite() || bt.initial_capital <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "initial_capital must be positive, got {}",
                bt.initial_capital
            )));
        }
        if bt.synthetic && bt.synthetic_bars == 0 {
            return Err(ConfigError::Invalid("synthetic_bars must be at least 1".into()));
        }
        self.strategy.validate()?;
        Ok(())
    }

    /// CSV path for `symbol` under `data_dir`.
    pub fn data_path(&self, symbol: &str) -> PathBuf {
        self.backtest.data_dir.join(format!("{symbol}.csv"))
    }
}

/// Deterministic run id: BLAKE3 over the strategy, capital, symbol and
/// dataset hash. Identical inputs always map to the same id.
pub fn run_id(
    strategy: &StrategyConfig,
    symbol: &str,
    initial_capital: f64,
    dataset_hash: &str,
) -> serde_json::Result<RunId> {
    let json = serde_json::to_string(strategy)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(json.as_bytes());
    hasher.update(symbol.as_bytes());
    hasher.update(&initial_capital.to_le_bytes());
    hasher.update(dataset_hash.as_bytes());
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[backtest]
symbols = ["SPY", "QQQ"]
initial_capital = 50000.0
data_dir = "bars"

[strategy]
lookback_period = 4
min_level_strength = 2.5

[strategy.confirmation_thresholds]
ranging = 0.8
"#;

    #[test]
    fn parses_both_sections() {
        let config = BacktestConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.backtest.symbols, vec!["SPY", "QQQ"]);
        assert_eq!(config.backtest.initial_capital, 50_000.0);
        assert_eq!(config.data_path("SPY"), PathBuf::from("bars/SPY.csv"));
        assert_eq!(config.strategy.lookback_period, 4);
        assert_eq!(config.strategy.confirmation_thresholds.ranging, 0.8);
        // untouched keys keep their defaults
        assert_eq!(
            config.strategy.max_holding_days,
            StrategyConfig::default().max_holding_days
        );
        assert!(!config.backtest.synthetic);
    }

    #[test]
    fn shipped_example_is_valid() {
        let config = BacktestConfig::from_toml_str(include_str!("../../configs/example.toml")).unwrap();
        assert_eq!(config.backtest.symbols, vec!["SPY", "QQQ"]);
        assert_eq!(config.backtest.output_dir, Some(PathBuf::from("results")));
    }

    #[test]
    fn strategy_section_is_optional() {
        let config = BacktestConfig::from_toml_str("[backtest]\nsymbols = [\"SPY\"]\n").unwrap();
        assert_eq!(config.strategy, StrategyConfig::default());
        assert_eq!(config.backtest.initial_capital, 100_000.0);
    }

    #[test]
    fn rejects_empty_universe() {
        let err = BacktestConfig::from_toml_str("[backtest]\nsymbols = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_capital() {
        let err = BacktestConfig::from_toml_str(
            "[backtest]\nsymbols = [\"SPY\"]\ninitial_capital = -5.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_out_of_range_strategy() {
        let err = BacktestConfig::from_toml_str(
            "[backtest]\nsymbols = [\"SPY\"]\n[strategy]\nposition_size_pct = 0.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Strategy(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            BacktestConfig::from_toml_str("[backtest\nsymbols = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn run_id_is_deterministic() {
        let cfg = StrategyConfig::default();
        let a = run_id(&cfg, "SPY", 100_000.0, "abc").unwrap();
        let b = run_id(&cfg, "SPY", 100_000.0, "abc").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn run_id_changes_with_inputs() {
        let cfg = StrategyConfig::default();
        let base = run_id(&cfg, "SPY", 100_000.0, "abc").unwrap();
        assert_ne!(base, run_id(&cfg, "QQQ", 100_000.0, "abc").unwrap());
        assert_ne!(base, run_id(&cfg, "SPY", 90_000.0, "abc").unwrap());
        assert_ne!(base, run_id(&cfg, "SPY", 100_000.0, "abd").unwrap());
        let other = StrategyConfig {
            lookback_period: cfg.lookback_period + 1,
            ..cfg.clone()
        };
        assert_ne!(base, run_id(&other, "SPY", 100_000.0, "abc").unwrap());
    }
}
