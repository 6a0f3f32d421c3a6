//! Error taxonomy for index operations.
//!
//! Precondition failures (`DimensionMismatch`, `NonFiniteVector`,
//! `DuplicateRowId`, `NotFound`, `EmptyIndex`, `InvalidK`) are raised before any page is touched. Storage
//! errors from the host page layer are wrapped unchanged and never retried.

use crate::graph::RowId;
use crate::storage::PageId;
use thiserror::Error;

/// Errors returned by the Keel index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Input vector length does not match the configured dimension
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was created with
        expected: usize,
        /// Length of the rejected vector
        actual: usize,
    },

    /// Input vector holds a NaN or infinite component
    #[error("Vector component {index} is not finite")]
    NonFiniteVector {
        /// Position of the first offending component
        index: usize,
    },

    /// Encoded vector has the wrong byte length for its compression mode
    #[error("Malformed encoded vector: expected {expected} bytes, got {actual}")]
    MalformedVector {
        /// Byte length implied by mode and dimension
        expected: usize,
        /// Byte length actually supplied
        actual: usize,
    },

    /// Row is already indexed
    #[error("Row {0} is already indexed")]
    DuplicateRowId(RowId),

    /// Row is not indexed
    #[error("Row {0} not found in index")]
    NotFound(RowId),

    /// The reserved sentinel row id was supplied
    #[error("Row id {} is reserved", RowId::MAX)]
    InvalidRowId,

    /// Search against an index with no live nodes
    #[error("Index is empty")]
    EmptyIndex,

    /// Search asked for zero results
    #[error("Invalid k: {0} (must be > 0)")]
    InvalidK(usize),

    /// An on-disk node record failed a structural check
    #[error("Corrupt node record at page {page}: {reason}")]
    CorruptRecord {
        /// Page holding the record
        page: PageId,
        /// Which check failed
        reason: &'static str,
    },

    /// Options string or option value rejected
    #[error("Invalid index options: {0}")]
    InvalidOptions(String),

    /// Stored metadata does not describe a usable index
    #[error("Incompatible index: {0}")]
    IncompatibleIndex(String),

    /// Bulk build stopped by its cancellation flag
    #[error("Bulk build cancelled after {inserted} rows")]
    Cancelled {
        /// Rows fully inserted before cancellation
        inserted: usize,
    },

    /// Failure propagated from the host page layer
    #[error("Storage failure: {0:#}")]
    StorageFailure(#[from] anyhow::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// True for errors raised by argument validation, before any mutation.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::NonFiniteVector { .. }
                | Self::DuplicateRowId(_)
                | Self::NotFound(_)
                | Self::InvalidRowId
                | Self::EmptyIndex
                | Self::InvalidK(_)
                | Self::InvalidOptions(_)
        )
    }
}
