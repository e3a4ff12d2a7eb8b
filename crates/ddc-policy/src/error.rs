//! Policy contract violations.

use ddc_record::ValueId;
use thiserror::Error;

use crate::CachePolicy;

/// Errors raised when a caller builds or parses a policy incorrectly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("cannot parse a cache policy from empty text")]
    EmptyText,

    #[error("value policy for {id} carries record-only flags {flags}")]
    RecordOnlyFlags { id: ValueId, flags: CachePolicy },
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
