//! Structured error model for remote org API operations.
//!
//! [`ApiError`] carries classification, a remote error code, and retry
//! metadata. Construct via category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a remote API error.
///
/// Determines default retry behavior and operator-facing categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorCategory {
    /// Expired or invalid credential.
    Auth,
    /// Insufficient permissions on the remote object or field.
    Permission,
    /// Rate limit exceeded (retryable).
    RateLimit,
    /// Row lock contention on the remote side (retryable).
    LockContention,
    /// Request exceeded its timeout (retryable).
    Timeout,
    /// Transient network error (retryable).
    TransientNetwork,
    /// Field-level rejection: bad value, validation rule, required field.
    Data,
    /// Target org missing an expected field, object, or record type.
    Schema,
    /// Unclassified remote failure.
    Internal,
}

impl fmt::Display for ApiErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::RateLimit => "rate_limit",
            Self::LockContention => "lock_contention",
            Self::Timeout => "timeout",
            Self::TransientNetwork => "transient_network",
            Self::Data => "data",
            Self::Schema => "schema",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Remote error message fragments that indicate an expired or revoked
/// credential rather than a data problem.
const AUTH_ERROR_MARKERS: &[&str] = &[
    "INVALID_SESSION_ID",
    "expired access/refresh token",
    "invalid_grant",
    "Session expired or invalid",
];

/// Structured error from a remote org API call.
///
/// Carries classification, the remote error code, and a retryable flag.
/// Construct via category-specific factory methods (e.g.
/// [`ApiError::rate_limit`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct ApiError {
    pub category: ApiErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    /// Server-provided retry hint, when the remote sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ApiError {
    fn new(
        category: ApiErrorCategory,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
        }
    }

    /// Authentication error (not retryable, surfaced distinctly so the
    /// caller can prompt re-authorization).
    #[must_use]
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ApiErrorCategory::Auth, false, code, message)
    }

    /// Permission error (not retryable).
    #[must_use]
    pub fn permission(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ApiErrorCategory::Permission, false, code, message)
    }

    /// Rate limit error (retryable).
    #[must_use]
    pub fn rate_limit(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::new(ApiErrorCategory::RateLimit, true, code, message);
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Row lock contention (retryable).
    #[must_use]
    pub fn lock_contention(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ApiErrorCategory::LockContention, true, code, message)
    }

    /// Request timeout (retryable).
    #[must_use]
    pub fn timeout(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ApiErrorCategory::Timeout, true, code, message)
    }

    /// Transient network error (retryable).
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ApiErrorCategory::TransientNetwork, true, code, message)
    }

    /// Field-level data rejection (not retryable).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ApiErrorCategory::Data, false, code, message)
    }

    /// Missing field, object, or record type in the target org
    /// (not retryable).
    #[must_use]
    pub fn schema(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ApiErrorCategory::Schema, false, code, message)
    }

    /// Unclassified remote failure (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ApiErrorCategory::Internal, false, code, message)
    }

    /// Classify a raw remote error, promoting credential failures to
    /// [`ApiErrorCategory::Auth`] based on the message text.
    #[must_use]
    pub fn classify(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        if AUTH_ERROR_MARKERS.iter().any(|m| message.contains(m)) || code == "INVALID_SESSION_ID" {
            return Self::auth(code, message);
        }
        Self::internal(code, message)
    }
}
