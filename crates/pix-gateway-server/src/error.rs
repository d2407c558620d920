//! Server error types and HTTP response mapping.

use std::io;
use std::net::SocketAddr;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pix_gateway::credentials::CredentialError;
use pix_gateway::dispatch::DispatchError;
use serde_json::json;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by the gateway server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Registration handshake was rejected.
    #[error(transparent)]
    Handshake(#[from] CredentialError),

    /// Request carried an unknown or missing client key.
    #[error("unknown client key")]
    Unauthorized,

    /// Dispatch to the validator pool failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Could not bind the listen address.
    #[error("failed to bind {0}: {1}")]
    BindFailed(SocketAddr, #[source] io::Error),

    /// State initialization failed.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Unexpected failure while serving a request.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Handshake(_) => (StatusCode::NOT_FOUND, "invalid_handshake"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Dispatch(DispatchError::NoValidatorsAvailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, "no_validators")
            }
            Self::Dispatch(DispatchError::AllValidatorsFailed { .. }) => {
                (StatusCode::BAD_GATEWAY, "all_validators_failed")
            }
            Self::BindFailed(..) | Self::Init(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(
        ServerError::Handshake(CredentialError::UnknownUid(7)),
        StatusCode::NOT_FOUND, "invalid_handshake"; "unknown uid")]
    #[test_case(
        ServerError::Handshake(CredentialError::EmptyPostfix),
        StatusCode::NOT_FOUND, "invalid_handshake"; "empty postfix")]
    #[test_case(
        ServerError::Unauthorized,
        StatusCode::UNAUTHORIZED, "unauthorized"; "unknown api key")]
    #[test_case(
        ServerError::Dispatch(DispatchError::NoValidatorsAvailable),
        StatusCode::SERVICE_UNAVAILABLE, "no_validators"; "empty pool")]
    #[test_case(
        ServerError::Dispatch(DispatchError::AllValidatorsFailed { attempted: 3 }),
        StatusCode::BAD_GATEWAY, "all_validators_failed"; "exhausted pool")]
    #[test_case(
        ServerError::Internal("boom".into()),
        StatusCode::INTERNAL_SERVER_ERROR, "internal_error"; "internal")]
    fn errors_map_to_status_and_code(err: ServerError, status: StatusCode, code: &str) {
        assert_eq!(err.status_and_code(), (status, code));
    }
}
