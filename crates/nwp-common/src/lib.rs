//! Common types shared across the NWP ingestion crates and services.

pub mod bbox;
pub mod cycle;
pub mod error;
pub mod grid;
pub mod source;
pub mod variable;

pub use bbox::BoundingBox;
pub use cycle::{CycleResolver, ForecastCycle};
pub use error::{CommonError, CommonResult};
pub use grid::CanonicalGrid;
pub use source::SourceId;
pub use variable::CanonicalVariable;
