//! Session client error types

use reqwest::StatusCode;

use crate::contract::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport failure or undecodable body
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The authority answered with a non-success status
    #[error("{status}: {}", body.error)]
    Api { status: StatusCode, body: ApiError },

    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientError {
    /// HTTP status of an authority rejection
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status(),
            ClientError::Encode(_) => None,
        }
    }

    /// Machine-readable code of an authority rejection
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { body, .. } => Some(&body.code),
            _ => None,
        }
    }

    /// Whether the authority rejected the call's credentials
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}
