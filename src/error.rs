//! Veilgate error types
//!
//! Every fallible boundary operation returns one of these kinds; each kind
//! maps to a stable HTTP status at the API surface. `Config` is only
//! constructed during startup and never reaches a handler.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// Malformed JSON, missing context fields, oversized or non-UTF-8 payload
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The policy decision is `block`; no upstream contact, no token record
    #[error("Blocked by policy: {0}")]
    PolicyBlocked(String),

    /// Caller not trusted to detokenize, or category disallowed for caller
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Token map handle unknown or expired
    #[error("Token map handle unknown or expired")]
    TokenHandleMissing,

    /// Per-pattern scan budget exceeded
    #[error("Detector timed out on pattern '{0}'")]
    DetectorTimeout(String),

    /// Upstream provider returned a non-2xx status; body is relayed verbatim
    #[error("Upstream returned {status}")]
    Upstream { status: u16, body: String },

    /// Token-store I/O deadline exceeded or ciphertext authentication failed
    #[error("Token backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Fatal at startup only: missing salt, bad policy file, missing key
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, GateError>;

impl GateError {
    /// The HTTP status this error maps to at the API boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GateError::PolicyBlocked(_) => StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
            GateError::Forbidden(_) => StatusCode::FORBIDDEN,
            GateError::TokenHandleMissing => StatusCode::GONE,
            GateError::DetectorTimeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GateError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();

        if matches!(self, GateError::DetectorTimeout(_)) {
            tracing::error!("{}", self);
        }

        // Upstream bodies are relayed verbatim so client SDKs keep working
        if let GateError::Upstream { body, .. } = &self {
            return (status, body.clone()).into_response();
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GateError::InvalidInput("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GateError::PolicyBlocked("secret".into()).status().as_u16(),
            451
        );
        assert_eq!(
            GateError::Forbidden("untrusted".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(GateError::TokenHandleMissing.status(), StatusCode::GONE);
        assert_eq!(
            GateError::BackendUnavailable("redis".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_upstream_status_relayed() {
        let err = GateError::Upstream {
            status: 429,
            body: "{}".into(),
        };
        assert_eq!(err.status().as_u16(), 429);

        let err = GateError::Upstream {
            status: 99, // not a valid HTTP status
            body: String::new(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
