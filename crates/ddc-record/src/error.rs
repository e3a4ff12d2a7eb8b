//! Error types for the record model and package codec.

use thiserror::Error;

/// Errors produced while building, encoding or decoding records.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid bucket name '{0}': expected 1-63 characters of [A-Za-z0-9_]")]
    InvalidBucket(String),

    #[error("malformed package: {0}")]
    MalformedPackage(String),

    #[error("corrupt compressed buffer: {0}")]
    CorruptBuffer(String),

    #[error("package object error: {0}")]
    Object(#[from] serde_json::Error),

    #[error("decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
}

/// Result type for record operations.
pub type RecordResult<T> = Result<T, RecordError>;
