//! Error types shared across ckool crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CkoolError>;

/// Main error type for the shared layer
#[derive(Error, Debug)]
pub enum CkoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unsupported hash algorithm: {0} (expected one of md5, sha1, sha224, sha256, sha512)")]
    UnsupportedAlgorithm(String),

    #[error("Unsupported compression format: {0} (expected one of zip, tar.gz, tar.xz, tar.bz2)")]
    UnsupportedFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CkoolError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
