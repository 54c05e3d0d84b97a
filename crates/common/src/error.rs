//! Error types for survey-proxy.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use thiserror::Error;

/// Content type used for every response body the proxy produces.
pub const RESPONSE_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Governor ===
    /// A rejection window is open.
    #[error("Rejected due to active REQUEST_REJECTION policy. Ends at {}", .expires_at.to_rfc3339())]
    RejectionActive {
        /// When the window ends.
        expires_at: DateTime<Utc>,
    },

    // === Upstream ===
    /// Upstream answered with a non-success status.
    #[error("Upstream error: {payload}")]
    UpstreamHttp {
        /// Upstream error object, relayed as the response body.
        payload: Value,
    },

    /// Upstream could not be reached or its body was not JSON.
    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),

    // === Request ===
    /// No valid account set for the request.
    #[error("Account selection error: {0}")]
    AccountSelection(String),

    /// A path placeholder has no value in the posted record.
    #[error("Placeholder resolution error: {0}")]
    PlaceholderResolution(String),

    /// Malformed request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    // === Server ===
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    ///
    /// Upstream payloads carry their own `http_status_code`; everything else
    /// falls back to 500 apart from account selection and malformed bodies.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AccountSelection(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamHttp { payload } => payload
                .get("http_status_code")
                .and_then(Value::as_u64)
                .and_then(|code| u16::try_from(code).ok())
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::RejectionActive { .. }
            | Self::UpstreamTransport(_)
            | Self::PlaceholderResolution(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::RejectionActive { .. } => "REJECTION_ACTIVE",
            Self::UpstreamHttp { .. } => "UPSTREAM_HTTP_ERROR",
            Self::UpstreamTransport(_) => "UPSTREAM_TRANSPORT_ERROR",
            Self::AccountSelection(_) => "ACCOUNT_SELECTION_ERROR",
            Self::PlaceholderResolution(_) => "PLACEHOLDER_RESOLUTION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// JSON object sent as the body of an error response.
    ///
    /// Upstream errors are relayed verbatim so the caller sees the upstream
    /// `id`, `name` and `docs` fields.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::UpstreamHttp { payload } if payload.is_object() => payload.clone(),
            Self::RejectionActive { expires_at } => json!({
                "error": {
                    "code": self.error_code(),
                    "message": self.to_string(),
                    "expiresAt": expires_at.to_rfc3339(),
                }
            }),
            _ => json!({
                "error": {
                    "code": self.error_code(),
                    "message": self.to_string(),
                }
            }),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        (
            status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(RESPONSE_CONTENT_TYPE),
            )],
            self.payload().to_string(),
        )
            .into_response()
    }
}

// === From implementations ===

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamTransport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_from_payload() {
        let err = AppError::UpstreamHttp {
            payload: json!({"id": "1014", "message": "Permission denied", "http_status_code": 403}),
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.payload()["id"], "1014");
    }

    #[test]
    fn test_upstream_status_defaults_to_500() {
        let err = AppError::UpstreamHttp {
            payload: json!({"message": "boom"}),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = AppError::UpstreamHttp {
            payload: json!({"http_status_code": 42}),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_account_selection_is_bad_request() {
        let err = AppError::AccountSelection("ambiguous".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.payload()["error"]["code"], "ACCOUNT_SELECTION_ERROR");
    }

    #[test]
    fn test_rejection_message_names_expiry() {
        let expires_at = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default();
        let err = AppError::RejectionActive { expires_at };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("2030-01-01T00:00:00+00:00"));
        assert_eq!(err.payload()["error"]["expiresAt"], "2030-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_into_response_sets_content_type() {
        let response = AppError::PlaceholderResolution("missing".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            RESPONSE_CONTENT_TYPE
        );
    }
}
