//! Error taxonomy for the cache store.
//!
//! - `Configuration` is fatal and only raised while constructing a store
//! - `InvalidKey` and `Policy` are caller contract violations
//! - `Io`, `Integrity` and `MalformedPackage` are runtime conditions; the
//!   store logs them and reports a miss or "not cached" instead of failing

use std::io;
use std::path::PathBuf;

use ddc_policy::PolicyError;
use ddc_record::RecordError;
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid cache key '{0}': only [A-Za-z0-9_$] are allowed")]
    InvalidKey(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("integrity check failed for {}: {reason}", path.display())]
    Integrity { path: PathBuf, reason: String },

    #[error("malformed package: {0}")]
    MalformedPackage(#[from] RecordError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that indicate a caller or setup mistake rather than a
    /// transient runtime condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InvalidKey(_) | Self::Policy(_)
        )
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
