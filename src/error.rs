//! Error types for cache operations
//!
//! Configuration mistakes (unknown categories, invalid settings, a read with
//! neither data nor generator) are caller contract violations and fail fast.
//! Backing-store failures are reported by the tier adapters but the tier
//! manager degrades them to misses. Generation failures always propagate.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// A cache call referenced a category with no registered strategy
    #[error("Unknown cache category: {0}")]
    UnknownCategory(String),

    /// Settings or category strategies failed validation
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// Every tier missed and the caller supplied no generator
    #[error("Cache miss for '{key}' and no generator supplied")]
    MissingGenerator { key: String },

    /// A remote or durable tier failed to read, write or delete
    #[error("Backing store error ({tier}): {message}")]
    BackingStore { tier: String, message: String },

    /// The generator function returned an error
    #[error("Generation failed for '{key}': {source}")]
    GenerationFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The generator function exceeded the configured timeout
    #[error("Generation for '{key}' timed out after {timeout_ms}ms")]
    GenerationTimeout { key: String, timeout_ms: u64 },

    /// A feature vector does not match the similarity space of the index
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Build a backing store error for the named tier
    pub fn backing_store(tier: impl Into<String>, message: impl ToString) -> Self {
        CacheError::BackingStore {
            tier: tier.into(),
            message: message.to_string(),
        }
    }

    /// True for errors caused by the caller's configuration or contract
    /// rather than by a runtime condition
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            CacheError::UnknownCategory(_)
                | CacheError::InvalidConfig(_)
                | CacheError::MissingGenerator { .. }
        )
    }

    /// True for failures of the generator itself
    pub fn is_generation_error(&self) -> bool {
        matches!(
            self,
            CacheError::GenerationFailed { .. } | CacheError::GenerationTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}
