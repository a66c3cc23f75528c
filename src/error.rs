//! Balancer error types.

use thiserror::Error;

use crate::types::ParticipantId;

/// Errors surfaced by the balancing engine.
///
/// None of these are fatal to the host: callers treat every variant as
/// "no balance performed this cycle".
#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("config parse error: {0}")]
    ConfigParse(String),

    #[error("config io error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    #[error("a balancing pass is already in progress")]
    PassInProgress,

    #[error("participant {0} left during the pass, snapshot is stale")]
    StaleSnapshot(ParticipantId),
}

impl From<serde_json::Error> for BalanceError {
    fn from(e: serde_json::Error) -> Self {
        BalanceError::ConfigParse(e.to_string())
    }
}

impl From<toml::de::Error> for BalanceError {
    fn from(e: toml::de::Error) -> Self {
        BalanceError::ConfigParse(e.to_string())
    }
}

pub type BalanceResult<T> = Result<T, BalanceError>;
