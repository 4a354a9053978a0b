//! Error types for strata-core.

use thiserror::Error;

/// Result type alias using strata-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during routing, caching and orchestration.
#[derive(Error, Debug)]
pub enum Error {
    /// Content was empty or otherwise unusable at classification time
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// Search query was empty
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A routing decision named a backend that is not registered
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Primary backend write failed; the store operation is aborted
    #[error("Primary write to {backend} failed: {source}")]
    PrimaryWrite {
        backend: String,
        #[source]
        source: Box<Error>,
    },

    /// Backend adapter error
    #[error("Backend error: {backend} - {message}")]
    Backend { backend: String, message: String },

    /// Shared cache tier error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Timeout during a backend or shared-cache call
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Local storage error (SQLite document backend)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (rule tables, default route, registry)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a backend error.
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Wrap a failure of the primary write.
    pub fn primary_write(backend: impl Into<String>, source: Error) -> Self {
        Self::PrimaryWrite {
            backend: backend.into(),
            source: Box::new(source),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error aborts the calling operation.
    ///
    /// Only primary-path failures are fatal; everything else is absorbed by
    /// the orchestrators and reported as degraded success.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PrimaryWrite { .. }
                | Self::UnknownBackend(_)
                | Self::InvalidContent(_)
                | Self::InvalidQuery(_)
                | Self::Config(_)
        )
    }
}
