//! Grid normalization and dataset persistence.
//!
//! - [`GridNormalizer`] resamples native source grids (regular or curvilinear)
//!   onto the shared canonical lat/lon grid.
//! - [`DatasetStore`] persists normalized fields as one Zarr V3 hierarchy per
//!   forecast cycle. Cells are append-only and each cycle has a single writer.
//! - [`ProcessedDataset`] is the read side of a stored cycle.
//!
//! # Example
//!
//! ```ignore
//! let normalizer = GridNormalizer::new(grid.clone(), InterpolationMethod::Bilinear);
//! let values = normalizer.normalize(&native_grid, &native_values)?;
//!
//! let store = DatasetStore::new(StoreConfig::default())?;
//! let mut writer = store.open_writer(&cycle, &grid)?;
//! writer.write_lead_time(6, &[NormalizedField::new(CanonicalVariable::WindGust, 6, values)])?;
//! drop(writer);
//!
//! let dataset = store.read(&cycle)?;
//! let (values, lats, lons) = dataset.get_field(CanonicalVariable::WindGust, 6)?;
//! ```

pub mod config;
pub mod error;
pub mod normalize;
pub mod store;
pub mod types;
pub mod writer;

pub use config::{StoreConfig, ZarrCompression};
pub use error::{GridProcessorError, Result};
pub use normalize::{GridNormalizer, ResamplePlan};
pub use store::{CycleLock, CycleWriter, DatasetStore, LeadWriteOutcome, Manifest, ProcessedDataset};
pub use types::{InterpolationMethod, NativeGrid, NormalizedField};
pub use writer::ZarrWriter;
