//! RetestLab Core: breakout-retest decision engine.
//!
//! This crate contains everything that decides, and nothing that executes:
//! - Domain types (bars, directions, ids, trade records, the bar window)
//! - Swing point tracking and support/resistance level clustering
//! - Regime classification (trend strength and volatility)
//! - Breakout detection with a bounded, aging backlog
//! - Regime-adaptive retest confirmation (pattern, momentum, volume)
//! - Entry gating, sizing, structure stops/targets, and position management
//! - A deterministic per-bar `step` and an `Engine` driver over a `Broker`
//!
//! Indicator values arrive per bar as an [`indicators::IndicatorSnapshot`];
//! order execution is delegated to a [`broker::Broker`] implementation.

pub mod broker;
pub mod components;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod indicators;

pub use config::StrategyConfig;
pub use engine::{Engine, EngineState, StepOutput};
pub use error::{BrokerError, ConfigError, EngineError};
