//! Zarr writer for persisting normalized grids.

mod zarr_writer;

pub use zarr_writer::{Attributes, ZarrWriter};
