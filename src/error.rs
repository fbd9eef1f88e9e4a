//! Error types for Selah

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

/// Main error type for Selah
#[derive(Debug, Error)]
pub enum Error {
    /// Client supplied an out-of-range or malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Entity does not exist (or does not belong to the caller)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique-index race inside the content store; callers re-read, never surfaced
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Anonymous session TTL passed or session was migrated
    #[error("Anonymous session expired")]
    SessionExpired,

    /// Generation rate limit hit on a cache-miss path
    #[error("Rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: i64 },

    /// Not enough daily + purchased tokens for the requested generation
    #[error("Insufficient tokens: {available} available, {required} required")]
    InsufficientTokens {
        available: i64,
        required: i64,
        reset_at: DateTime<Utc>,
    },

    /// All LLM providers exhausted (network, 5xx, timeout)
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    /// Provider output still failed JSON validation after retries
    #[error("LLM returned malformed content: {0}")]
    LlmMalformed(String),

    /// Provider content filter rejected the request
    #[error("LLM refused the request: {0}")]
    LlmRefused(String),

    /// Payment gateway declined a token purchase
    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// SQL errors
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("{0}")]
    Internal(String),
}

/// Result type alias for Selah operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wire-level error code for the response envelope
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::Unauthorized(_) => "Unauthorized",
            Error::Forbidden(_) => "Forbidden",
            Error::NotFound(_) => "NotFound",
            Error::SessionExpired => "SessionExpired",
            Error::RateLimited { .. } => "RateLimited",
            Error::InsufficientTokens { .. } => "InsufficientTokens",
            Error::LlmUnavailable(_) => "LLMUnavailable",
            Error::LlmMalformed(_) => "LLMMalformed",
            Error::LlmRefused(_) => "LLMRefused",
            Error::PaymentFailed(_) => "PaymentFailed",
            // Conflict is internal-only; if it ever reaches the edge it is a bug
            Error::Conflict(_)
            | Error::Configuration(_)
            | Error::Sql(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::SessionExpired => StatusCode::GONE,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::InsufficientTokens { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::LlmUnavailable(_) | Error::LlmMalformed(_) => StatusCode::BAD_GATEWAY,
            Error::LlmRefused(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Error::Conflict(_)
            | Error::Configuration(_)
            | Error::Sql(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured context the client renders (remaining tokens, retry-after)
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::RateLimited {
                retry_after_seconds,
            } => Some(json!({ "retry_after_seconds": retry_after_seconds })),
            Error::InsufficientTokens {
                available,
                required,
                reset_at,
            } => Some(json!({
                "available": available,
                "required": required,
                "reset_at": reset_at.to_rfc3339(),
            })),
            _ => None,
        }
    }

    /// Client-facing message. Internal failures never leak details.
    fn public_message(&self) -> String {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code = self.code(), "request failed: {}", self);
        }

        let mut error = json!({
            "code": self.code(),
            "message": self.public_message(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }

        (
            self.status(),
            Json(json!({ "success": false, "error": error })),
        )
            .into_response()
    }
}
