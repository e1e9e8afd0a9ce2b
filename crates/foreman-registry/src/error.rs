//! Registry error types.

use foreman_core::Error as CoreError;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// An underlying database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored blob could not be decoded.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// The referenced row does not exist.
    #[error("not found: {resource} with id {id}")]
    NotFound {
        /// What kind of row was looked up.
        resource: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The operation's precondition does not hold (for example, locking
    /// for a terminal session).
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl RegistryError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::CorruptRow(err.to_string())
    }
}

impl From<RegistryError> for CoreError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { resource, id } => Self::ResourceNotFound {
                resource_type: resource,
                id,
            },
            RegistryError::Precondition(message) => Self::PreconditionFailed { message },
            RegistryError::CorruptRow(message) => Self::Serialization { message },
            RegistryError::Database(source) => {
                Self::storage_with_source("registry operation failed", source)
            }
        }
    }
}
