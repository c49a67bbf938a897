//! Client errors.

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by [`crate::SpendGuardClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The node answered with an error body.
    #[error("{code} ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        session_id: Option<Uuid>,
        retryable: bool,
    },

    /// The node could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The node answered with something we could not read.
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ClientError {
    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Intake session that survived a failed analysis.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            ClientError::Api { session_id, .. } => *session_id,
            _ => None,
        }
    }

    /// Returns true if repeating the request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Api { retryable, .. } => *retryable,
            ClientError::Connection(_) => true,
            ClientError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Connection(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Connection(e.to_string())
    }
}

/// Error body sent by the node.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub retryable: bool,
}

impl ClientError {
    pub(crate) fn from_body(status: u16, text: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(text) {
            Ok(body) => ClientError::Api {
                status,
                code: body.error,
                message: body.message,
                session_id: body.session_id,
                retryable: body.retryable,
            },
            Err(_) => ClientError::Api {
                status,
                code: "unknown".to_string(),
                message: text.to_string(),
                session_id: None,
                retryable: status >= 500,
            },
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
