use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::db::DbError;

/// Standard error response body.
///
/// Format: `{"error": {"type": "...", "message": "...", "code": "..."}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                message: message.into(),
                code: code.into(),
            },
        }
    }
}

/// Failures of the SAML protocol operations.
///
/// Every variant maps to a stable HTTP status and error code. Messages of
/// verification, storage and internal failures are never returned to the
/// caller verbatim.
#[derive(Debug, thiserror::Error)]
pub enum SamlError {
    /// IdP metadata is unparsable or lacks an SSO redirect endpoint or signing certificate
    #[error("Malformed IdP metadata: {0}")]
    MalformedMetadata(String),

    /// Unknown client, redirect URI not allow-listed, or no client for the IdP entity id
    #[error("Invalid client: {0}")]
    InvalidClient(String),

    #[error("Invalid relay state")]
    InvalidRelayState,

    #[error("IdP-initiated login is not allowed for this client")]
    IdpInitiatedLoginDisallowed,

    /// The SAMLResponse could not be decoded or parsed
    #[error("Malformed SAML response: {0}")]
    MalformedResponse(String),

    /// Signature, time window, status or audience check failed. The reason is
    /// for logs only.
    #[error("SAML response verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid or already used code")]
    InvalidCode,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type SamlResult<T> = Result<T, SamlError>;

impl SamlError {
    /// HTTP status, error type and stable code for this error.
    pub fn classify(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            SamlError::MalformedMetadata(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "malformed_metadata",
            ),
            SamlError::InvalidClient(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_client",
            ),
            SamlError::InvalidRelayState => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_relay_state",
            ),
            SamlError::IdpInitiatedLoginDisallowed => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "idp_login_disallowed",
            ),
            SamlError::MalformedResponse(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "malformed_saml_response",
            ),
            SamlError::VerificationFailed(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "saml_response_verification_failed",
            ),
            SamlError::InvalidCode => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_code",
            ),
            SamlError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_token",
            ),
            SamlError::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
            ),
            SamlError::Storage(_) | SamlError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
            ),
        }
    }
}

impl IntoResponse for SamlError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = self.classify();

        let message = match &self {
            SamlError::MalformedMetadata(_)
            | SamlError::InvalidClient(_)
            | SamlError::MalformedResponse(_)
            | SamlError::BadRequest(_)
            | SamlError::InvalidRelayState
            | SamlError::IdpInitiatedLoginDisallowed
            | SamlError::InvalidCode
            | SamlError::InvalidToken => self.to_string(),
            SamlError::VerificationFailed(reason) => {
                tracing::warn!(reason = %reason, "SAML response rejected");
                "SAML response verification failed".to_string()
            }
            SamlError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure in SAML operation");
                "An internal error occurred".to_string()
            }
            SamlError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal failure in SAML operation");
                "An internal error occurred".to_string()
            }
        };

        let body = ErrorResponse::with_type(error_type, code, message);
        (status, Json(body)).into_response()
    }
}
