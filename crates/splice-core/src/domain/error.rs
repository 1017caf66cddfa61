//! Domain-level error taxonomy for splice.

use crate::locator::LocatorError;
use crate::merge::MergeError;
use crate::store::StoreError;

/// splice domain errors.
#[derive(Debug, thiserror::Error)]
pub enum SpliceError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("locator error: {0}")]
    Locator(#[from] LocatorError),

    #[error("candidate store error: {0}")]
    Store(#[from] StoreError),

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for splice domain operations.
pub type Result<T> = std::result::Result<T, SpliceError>;
