//! Error types.
//!
//! Only construction-time and collaborator failures are errors. Per-bar "no
//! trade" outcomes (insufficient data, failed gates, risk caps) are values:
//! see [`crate::components::risk::RejectionReason`].

use thiserror::Error;

use crate::engine::StepOutput;

/// Invalid strategy configuration. Fatal at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config field `{field}` = {value} is out of range (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: String,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure reported by the broker/portfolio collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BrokerError {
    #[error("order rejected: {reason}")]
    Rejected { reason: String },
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Per-bar failure returned by [`crate::engine::Engine::on_bar`].
///
/// The engine stays usable after any of these; the next valid bar resumes
/// processing.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid bar at index {index}: {reason}")]
    InvalidBar { index: usize, reason: String },
    /// An intent failed at the broker. `executed` holds the intents that
    /// went through before it, with their events and closed trades; those
    /// are booked and must be recorded by the host.
    #[error("{source}")]
    Broker {
        #[source]
        source: BrokerError,
        executed: Box<StepOutput>,
    },
}

impl EngineError {
    /// The broker error behind a [`EngineError::Broker`] failure.
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            EngineError::Broker { source, .. } => Some(source),
            EngineError::InvalidBar { .. } => None,
        }
    }
}

/// Failure restoring an engine from a saved state.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("state snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
