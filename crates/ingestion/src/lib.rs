//! Multi-source NWP ingestion pipeline.
//!
//! Turns the latest published cycle of each configured model into a stored,
//! normalized dataset:
//!
//! - [`SourceAdapter`]s know where a model's files live and what they contain
//!   ([`GfsAdapter`] for GRIB2, [`MetNordicAdapter`] for NetCDF bundles)
//! - [`DownloadManager`] fetches with bounded retry and parse-before-accept
//! - [`VariableExtractor`] maps native fields to canonical variables and units
//! - [`DerivedQuantityComputer`] adds wind speed, direction, power density and
//!   the wind gust cascade
//! - [`PipelineOrchestrator`] runs all of it per source and returns a
//!   [`CycleReport`]
//!
//! # Example
//!
//! ```ignore
//! let mut config = PipelineConfig::load("config/pipeline.yaml")?;
//! config.apply_env_overrides();
//! config.validate()?;
//!
//! let orchestrator = PipelineOrchestrator::from_config(config)?;
//! let report = orchestrator.run(&RunRequest::default(), &CancellationToken::new()).await;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

pub mod adapter;
pub mod config;
pub mod derive;
pub mod download;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod report;
pub mod transport;

pub use adapter::{GfsAdapter, MetNordicAdapter, RawFormat, RawGridFile, SourceAdapter, VariableMap};
pub use config::PipelineConfig;
pub use derive::{ConstantGustFactor, DerivationSummary, DerivedQuantityComputer, GustFactor, GustTier};
pub use download::{Coverage, DownloadManager, FetchOutcome, FetchRequest};
pub use error::{FetchError, IngestionError, PipelineError, Result};
pub use extract::{ExtractedFields, VariableExtractor};
pub use orchestrator::{build_adapters, PipelineOrchestrator, RunRequest};
pub use report::{CycleReport, ErrorKind, MissingVariable, RunStatus, SourceReport, SourceStatus};
pub use transport::{HttpTransport, ReqwestTransport, TransportError, TransportResponse};
