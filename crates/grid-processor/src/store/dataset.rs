//! Read side of a stored cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nwp_common::{CanonicalGrid, CanonicalVariable, ForecastCycle};
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use super::manifest::{cell_key, Manifest};
use crate::error::{GridProcessorError, Result};

/// All completed fields of one cycle plus their shared coordinates.
///
/// Field values are loaded lazily from the Zarr hierarchy on request.
#[derive(Debug)]
pub struct ProcessedDataset {
    path: PathBuf,
    manifest: Manifest,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
}

impl ProcessedDataset {
    pub(crate) fn open(path: &Path, manifest: Manifest) -> Result<Self> {
        let latitudes = read_coordinate(path, "/latitude")?;
        let longitudes = read_coordinate(path, "/longitude")?;
        if (latitudes.len(), longitudes.len()) != manifest.shape {
            return Err(GridProcessorError::invalid_metadata(format!(
                "coordinate lengths ({}, {}) disagree with manifest shape {:?}",
                latitudes.len(),
                longitudes.len(),
                manifest.shape
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            latitudes,
            longitudes,
        })
    }

    pub fn cycle(&self) -> ForecastCycle {
        self.manifest.cycle
    }

    pub fn grid(&self) -> &CanonicalGrid {
        &self.manifest.grid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }

    /// Completed lead times, ascending.
    pub fn lead_times(&self) -> Vec<u32> {
        self.manifest.complete_lead_times.iter().copied().collect()
    }

    /// Variables present in at least one completed lead time.
    pub fn list_variables(&self) -> Vec<CanonicalVariable> {
        self.manifest.variables().into_iter().collect()
    }

    pub fn has_field(&self, variable: CanonicalVariable, lead_time: u32) -> bool {
        self.manifest.is_complete(lead_time) && self.manifest.cell(variable, lead_time).is_some()
    }

    /// Values (row-major, ascending lat then lon) with the coordinate vectors.
    pub fn get_field(&self, variable: CanonicalVariable, lead_time: u32) -> Result<(Vec<f32>, &[f64], &[f64])> {
        if !self.has_field(variable, lead_time) {
            return Err(GridProcessorError::NotFound(format!(
                "{} at lead {} in {}",
                variable,
                lead_time,
                self.manifest.cycle
            )));
        }
        let array_path = format!("/{}", cell_key(variable, lead_time));
        let (array, subset) = open_array(&self.path, &array_path)?;
        let values = array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| GridProcessorError::zarr_error(format!("{}: {}", array_path, e)))?;
        Ok((values, &self.latitudes, &self.longitudes))
    }
}

fn open_array(root: &Path, array_path: &str) -> Result<(Array<FilesystemStore>, ArraySubset)> {
    let store = FilesystemStore::new(root).map_err(|e| GridProcessorError::storage_error(e.to_string()))?;
    let array = Array::open(Arc::new(store), array_path)
        .map_err(|e| GridProcessorError::zarr_error(format!("{}: {}", array_path, e)))?;

    let shape = array.shape().to_vec();
    let subset = ArraySubset::new_with_start_shape(vec![0; shape.len()], shape)
        .map_err(|e| GridProcessorError::zarr_error(e.to_string()))?;
    Ok((array, subset))
}

fn read_coordinate(root: &Path, array_path: &str) -> Result<Vec<f64>> {
    let (array, subset) = open_array(root, array_path)?;
    array
        .retrieve_array_subset_elements::<f64>(&subset)
        .map_err(|e| GridProcessorError::zarr_error(format!("{}: {}", array_path, e)))
}
