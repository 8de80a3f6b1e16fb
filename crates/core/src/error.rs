//! Engine error taxonomy

use exitnet_protocol::{Timestamp, ValidationError};
use exitnet_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Rewards can only be claimed once per day, next claim in {}s", .remaining.as_secs())]
    ClaimTooSoon {
        remaining: Duration,
        next_claim_at: Timestamp,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Tunnel address pool exhausted")]
    AddressPoolExhausted,

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl CoreError {
    pub(crate) fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            key: key.into(),
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(msg) => CoreError::Conflict(msg),
            other => CoreError::Storage(other),
        }
    }
}
