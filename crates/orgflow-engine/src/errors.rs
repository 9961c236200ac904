//! Engine error model and retry-eligibility helpers.

use orgflow_types::error::ApiError;

/// Categorized engine error.
///
/// `Configuration` and `Concurrency` fail a run before any org access;
/// `Schema` is fatal for the step (or plan resolution) that needed it;
/// `Api` wraps a typed remote error with retry metadata;
/// `Infrastructure` wraps opaque host-side failures (state backend,
/// task panics) that are never retryable.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed template: unresolved placeholder, dependency cycle,
    /// invalid execution order, duplicate registration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A second run was attempted while one is active.
    #[error("another migration run is already active")]
    Concurrency,

    /// Target org missing an expected field or record type.
    #[error("schema resolution failed for {object}: {detail}")]
    Schema { object: String, detail: String },

    /// Typed remote API error.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Infrastructure error (state backend, task panic, etc.)
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl EngineError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns `true` if this wraps a remote error the API has marked
    /// as retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.retryable,
            _ => false,
        }
    }

    /// Returns the typed remote error if this is an `Api` variant.
    #[must_use]
    pub fn as_api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }
}

/// Whether a remote error code is in a step's retryable set.
#[must_use]
pub fn is_code_retryable(error: &ApiError, retryable_codes: &[String]) -> bool {
    retryable_codes.iter().any(|c| c == &error.code)
}
