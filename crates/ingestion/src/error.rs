//! Error types for the ingestion crate.

use std::path::PathBuf;

use grid_processor::GridProcessorError;
use thiserror::Error;

/// Failure to obtain a validated raw file for one request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Timeouts, 5xx, connection resets; retried up to the attempt limit.
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    /// Definitive 404 or invalid request; never retried.
    #[error("permanent failure fetching {url}: {reason}")]
    Permanent { url: String, reason: String },

    /// Downloaded payload did not parse, even after retries.
    #[error("downloaded file {path} does not parse: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// The run was stopped while waiting.
    #[error("fetch of {url} cancelled")]
    Cancelled { url: String },

    /// Local filesystem problem around the raw cache.
    #[error("raw cache I/O error at {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. } | FetchError::Parse { .. })
    }
}

/// Errors that can occur during extraction and processing of one lead time.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse GRIB2 data: {0}")]
    Grib2Parse(String),

    #[error("Failed to parse NetCDF data: {0}")]
    NetcdfParse(String),

    #[error("Lead time {0} is not contained in {1}")]
    LeadTimeNotInFile(u32, String),

    #[error("Grid error: {0}")]
    Grid(#[from] GridProcessorError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<grib2_parser::Grib2Error> for IngestionError {
    fn from(err: grib2_parser::Grib2Error) -> Self {
        Self::Grib2Parse(err.to_string())
    }
}

impl From<netcdf_parser::NetCdfError> for IngestionError {
    fn from(err: netcdf_parser::NetCdfError) -> Self {
        Self::NetcdfParse(err.to_string())
    }
}

/// Errors that end a source's run for a cycle.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Another run holds the cycle's store.
    #[error("cycle busy: {0}")]
    CycleBusy(String),

    /// Fatal store-layer error for this source's cycle.
    #[error("store error: {0}")]
    Store(GridProcessorError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<GridProcessorError> for PipelineError {
    fn from(err: GridProcessorError) -> Self {
        match err {
            GridProcessorError::CycleBusy { .. } => PipelineError::CycleBusy(err.to_string()),
            other => PipelineError::Store(other),
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
