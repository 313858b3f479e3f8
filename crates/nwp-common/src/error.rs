//! Error types for the shared domain model.

use thiserror::Error;

/// Result type alias using CommonError.
pub type CommonResult<T> = Result<T, CommonError>;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Invalid cycle: {0}")]
    InvalidCycle(String),

    #[error("Invalid BBOX: {0}")]
    InvalidBbox(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),
}
