//! Error types and HTTP response conversion
//!
//! Service-layer failures are sentinel variants; handlers return `Error`
//! and the `IntoResponse` impl renders the JSON envelope
//! `{"code": <status>, "message": <string>, "docURL"?: <string>}`.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Wrong email/password pair
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Signup or admin create with an email that already exists
    #[error("email already registered")]
    EmailRegistered,

    /// Bearer token failed verification (bad signature, expired, rotated secret)
    #[error("invalid token")]
    InvalidToken,

    /// Refresh token is being rotated by a concurrent request
    #[error("refresh already in progress")]
    RefreshInProgress,

    /// API key scope outside {`*`, `readonly`, `readwrite`}
    #[error("invalid scope")]
    InvalidScope,

    /// API key creation referenced an unknown app
    #[error("invalid app id")]
    InvalidAppId,

    /// Secret rotation requested on a public OAuth client
    #[error("public client has no secret to rotate")]
    OAuthClientPublicSecretRotation,

    /// Mutation of a revoked OAuth client
    #[error("oauth client is revoked")]
    OAuthClientRevoked,

    #[error("user not found")]
    UserNotFound,

    #[error("app not found")]
    AppNotFound,

    #[error("api key not found")]
    ApiKeyNotFound,

    #[error("oauth client not found")]
    OAuthClientNotFound,

    #[error("job not found")]
    JobNotFound,

    #[error("schedule not found")]
    ScheduleNotFound,

    /// Bad request with a free-form message
    #[error("{0}")]
    BadRequest(String),

    /// Bad request pointing at documentation
    #[error("{message}")]
    BadRequestDoc {
        /// Error message
        message: String,
        /// Documentation URL included in the envelope
        doc_url: String,
    },

    /// Missing or unverifiable credentials
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("{0}")]
    Forbidden(String),

    /// Resource not found (also used to avoid enumeration leaks)
    #[error("{0}")]
    NotFound(String),

    /// State-machine violation, duplicate, already-revoked
    #[error("{0}")]
    Conflict(String),

    /// Over a rate-limit budget; carries the `Retry-After` value
    #[error("rate limit exceeded")]
    RateLimited {
        /// Seconds until the window resets
        retry_after: u64,
    },

    /// Dependency not ready (schema cache, pool, job engine)
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Database failure; logged, generic body
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O failure; logged, generic body
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else; logged, generic body
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for 400s
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    /// Convenience constructor for 500s
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// The HTTP status this error maps to
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Config(_) | Error::Database(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::InvalidCredentials | Error::InvalidToken | Error::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::EmailRegistered
            | Error::RefreshInProgress
            | Error::OAuthClientRevoked
            | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InvalidScope
            | Error::InvalidAppId
            | Error::OAuthClientPublicSecretRotation
            | Error::BadRequest(_)
            | Error::BadRequestDoc { .. } => StatusCode::BAD_REQUEST,
            Error::UserNotFound
            | Error::AppNotFound
            | Error::ApiKeyNotFound
            | Error::OAuthClientNotFound
            | Error::JobNotFound
            | Error::ScheduleNotFound
            | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// JSON error envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// HTTP status code, mirrored into the body
    pub code: u16,
    /// Human-readable message
    pub message: String,
    /// Optional documentation link
    #[serde(rename = "docURL", skip_serializing_if = "Option::is_none")]
    pub doc_url: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal failures keep their detail in the log, not the body.
        let message = match &self {
            Error::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal server error".to_string()
            }
            Error::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                "internal server error".to_string()
            }
            Error::Io(e) => {
                tracing::error!(error = %e, "I/O error");
                "internal server error".to_string()
            }
            Error::Config(e) => {
                tracing::error!(error = %e, "configuration error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let doc_url = match &self {
            Error::BadRequestDoc { doc_url, .. } => Some(doc_url.clone()),
            _ => None,
        };

        let body = ErrorBody {
            code: status.as_u16(),
            message,
            doc_url,
        };

        let mut response = (status, Json(body)).into_response();
        if let Error::RateLimited { retry_after } = self {
            if let Ok(v) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }
        response
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_status_mapping() {
        assert_eq!(Error::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::EmailRegistered.status(), StatusCode::CONFLICT);
        assert_eq!(Error::InvalidScope.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::UserNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::RefreshInProgress.status(), StatusCode::CONFLICT);
        assert_eq!(
            Error::OAuthClientPublicSecretRotation.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::RateLimited { retry_after: 30 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::ServiceUnavailable("schema cache not ready".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_detail_not_leaked() {
        let response = Error::Internal("connection refused to 10.0.0.3".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let response = Error::RateLimited { retry_after: 42 }.into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &"42"
        );
    }

    #[test]
    fn doc_url_serialized_only_when_present() {
        let body = ErrorBody {
            code: 400,
            message: "bad".into(),
            doc_url: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("docURL"));

        let body = ErrorBody {
            code: 400,
            message: "bad".into(),
            doc_url: Some("https://docs.example.com/rls".into()),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("docURL"));
    }
}
