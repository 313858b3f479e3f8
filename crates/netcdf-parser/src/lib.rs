//! NetCDF reader for regional model output.
//!
//! Wraps the `netcdf` crate (libnetcdf) with the handful of operations the
//! ingestion pipeline needs: variable shapes, CF time units and unpacked
//! slices along the time axis. Classic, 64-bit offset and NetCDF-4 files
//! are all read the same way.

pub mod error;
pub mod reader;
pub mod time;

pub use error::{NetCdfError, NetCdfResult};
pub use reader::NetCdfFile;
pub use time::TimeUnits;
