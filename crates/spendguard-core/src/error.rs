//! Error types for SpendGuard.

use thiserror::Error;

use crate::types::RecordStatus;

/// Main error type for SpendGuard operations.
#[derive(Error, Debug, Clone)]
pub enum SpendGuardError {
    /// Input rejected before any remote call was issued.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The acting user lacks the capability for this action.
    #[error("Forbidden: {action} requires the {required} role")]
    Forbidden { action: String, required: String },

    /// The record's current status does not allow the requested action.
    #[error("Cannot {action} record {record_id}: status is {status}")]
    InvalidTransition {
        record_id: String,
        status: RecordStatus,
        action: String,
    },

    /// The extraction/insight provider failed or returned garbage.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The persistence backend rejected or failed a call.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Resource not found.
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SpendGuardError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SpendGuardError::Provider(_)
                | SpendGuardError::Persistence(_)
                | SpendGuardError::ConnectionError(_)
        )
    }

    /// Shorthand for a missing purchase record.
    pub fn record_not_found(id: impl Into<String>) -> Self {
        SpendGuardError::NotFound {
            resource_type: "PurchaseRecord".to_string(),
            id: id.into(),
        }
    }
}

/// Convenience Result type for SpendGuard operations.
pub type Result<T> = std::result::Result<T, SpendGuardError>;

impl From<serde_json::Error> for SpendGuardError {
    fn from(err: serde_json::Error) -> Self {
        SpendGuardError::SerializationError(err.to_string())
    }
}
