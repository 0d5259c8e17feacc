//! Error types for BraidDB.

use thiserror::Error;

/// Result type alias using BraidError.
pub type Result<T> = std::result::Result<T, BraidError>;

/// Errors that can occur in BraidDB operations.
///
/// Every mutating API reports its outcome through this type; `get` and
/// iteration never fail. `NotFound` doubles as the clean end-of-log marker
/// for the WAL reader.
#[derive(Debug, Error)]
pub enum BraidError {
    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),

    #[error("IOError: {0}")]
    IoError(String),

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("NotSupported: {0}")]
    NotSupported(String),
}

impl BraidError {
    /// Returns true if this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BraidError::NotFound(_))
    }

    /// Returns true if this is a `Corruption` error.
    pub fn is_corruption(&self) -> bool {
        matches!(self, BraidError::Corruption(_))
    }

    /// Returns true if this is an I/O error (either variant).
    pub fn is_io_error(&self) -> bool {
        matches!(self, BraidError::Io(_) | BraidError::IoError(_))
    }
}
