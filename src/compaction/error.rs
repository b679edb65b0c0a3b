//! Compaction error types

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while compacting a row
#[derive(Error, Debug)]
pub enum CompactionError {
    /// The row's cells violate the encoding contract: duplicate offsets with
    /// differing values, out-of-order offsets, or truncated qualifiers.
    /// Fatal for the row; an operator-level repair tool is expected.
    #[error("malformed row: {0}")]
    MalformedRow(String),

    /// An annotation cell carried corrupt JSON
    #[error("annotation decode error: {0}")]
    Annotation(#[from] serde_json::Error),

    /// A store RPC failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for compaction operations
pub type CompactionResult<T> = Result<T, CompactionError>;
