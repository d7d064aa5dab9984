//! Error types shared by the store and client ports.

use thiserror::Error;

/// Errors surfaced by the persistent stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("event {event_id} is not leased by engine {engine_id}")]
    LeaseMismatch { event_id: String, engine_id: String },

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors surfaced by the LLM client port.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Worth retrying at the transport layer (rate limit, 5xx, network)
    #[error("transient LLM error: {0}")]
    Transient(String),

    /// Not worth retrying (bad request, auth)
    #[error("permanent LLM error: {0}")]
    Permanent(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}
