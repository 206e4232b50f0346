use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::room::Identity;

/// Rejection from the identity verifier. The upgrade is refused and no
/// connection is ever created.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingToken,

    #[error("credential expired")]
    Expired,

    #[error("invalid credential: {0}")]
    InvalidToken(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken(e.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, "Could not validate credentials").into_response()
    }
}

/// Terminal failures of a single connection. Callers stop sending on any of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    QueueFull,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ConnectionError {
    fn from(e: serde_json::Error) -> Self {
        ConnectionError::Decode(e.to_string())
    }
}

/// Outcome of a failed targeted delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("no such recipient")]
    NoSuchRecipient,

    /// The send failed and this call removed the recipient from its room.
    /// The caller owns announcing the departure.
    #[error("recipient {0} departed")]
    Departed(Identity),
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("store error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
