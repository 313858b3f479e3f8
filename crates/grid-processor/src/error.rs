//! Error types for grid normalization and dataset persistence.

use thiserror::Error;

/// Errors that can occur while normalizing or storing grids.
#[derive(Error, Debug)]
pub enum GridProcessorError {
    /// The native grid description is unusable.
    #[error("invalid native grid: {0}")]
    InvalidGrid(String),

    /// A field's length does not match the grid it claims to live on.
    #[error("shape mismatch for {what}: expected {expected} values, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// Invalid metadata in the store.
    #[error("invalid store metadata: {0}")]
    InvalidMetadata(String),

    /// Zarr format error.
    #[error("Zarr format error: {0}")]
    ZarrError(String),

    /// Storage/IO error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A different value already occupies an append-only cell.
    #[error("store conflict for {cycle}: {cell} already holds different content")]
    StoreConflict { cycle: String, cell: String },

    /// Another writer holds the cycle.
    #[error("cycle {cycle} is busy: locked by {holder}")]
    CycleBusy { cycle: String, holder: String },

    /// Dataset, variable or lead time not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl GridProcessorError {
    /// Create an InvalidGrid error.
    pub fn invalid_grid(msg: impl Into<String>) -> Self {
        Self::InvalidGrid(msg.into())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    /// Create a ZarrError.
    pub fn zarr_error(msg: impl Into<String>) -> Self {
        Self::ZarrError(msg.into())
    }

    /// Create a StorageError.
    pub fn storage_error(msg: impl Into<String>) -> Self {
        Self::StorageError(msg.into())
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::CycleBusy { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StoreConflict { .. })
    }
}

impl From<std::io::Error> for GridProcessorError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for GridProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for grid processor operations.
pub type Result<T> = std::result::Result<T, GridProcessorError>;
