//! Error types and result aliases for Foreman.
//!
//! This module defines the shared error types used across all Foreman
//! components. Errors are structured for programmatic handling: the HTTP
//! layer maps them onto status codes and the engine maps provider
//! failures onto session state.

use chrono::{DateTime, Utc};
use std::fmt;

/// The result type used throughout Foreman.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Foreman operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested resource was not found.
    #[error("not found: {resource_type} with id {id}")]
    ResourceNotFound {
        /// The type of resource that was not found.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An external provider returned a non-success result.
    ///
    /// Non-fatal at the HTTP level for webhook deliveries (the sender must
    /// not retry); fatal at the session level (the session goes failed
    /// with `last_error` set).
    #[error("{provider} provider error: {message}")]
    Provider {
        /// Which provider failed (`auditor`, `agents`, `vcs`).
        provider: &'static str,
        /// Description of the provider failure.
        message: String,
    },

    /// An external provider rejected the call due to rate limiting.
    #[error("{provider} provider rate limited until {reset_at}")]
    ProviderRateLimit {
        /// Which provider throttled the call.
        provider: &'static str,
        /// When the provider's rate-limit window resets.
        reset_at: DateTime<Utc>,
    },

    /// A precondition for the operation was not met.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new resource not found error.
    #[must_use]
    pub fn resource_not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::ResourceNotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a new provider error.
    #[must_use]
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Returns true when the error originated in an external provider.
    #[must_use]
    pub fn is_provider(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::ProviderRateLimit { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
