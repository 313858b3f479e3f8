//! Alignment of native source grids onto the canonical grid.
//!
//! A [`ResamplePlan`] is computed once per distinct native geometry and then
//! applied to every field sharing it, so a cycle with dozens of fields on the
//! same source grid pays for the coordinate search only once.

mod curvilinear;
mod interpolation;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use nwp_common::CanonicalGrid;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{GridProcessorError, Result};
use crate::types::{InterpolationMethod, NativeGrid};

use curvilinear::PointIndex;
use interpolation::{Axis, Sample};

/// Per-target-point recipe for one native geometry.
#[derive(Debug, Clone)]
pub struct ResamplePlan {
    samples: Vec<Sample>,
    source_len: usize,
    covered: usize,
}

impl ResamplePlan {
    fn new(samples: Vec<Sample>, source_len: usize) -> Self {
        let covered = samples.iter().filter(|s| !matches!(s, Sample::Missing)).count();
        Self {
            samples,
            source_len,
            covered,
        }
    }

    /// Number of canonical points.
    pub fn target_len(&self) -> usize {
        self.samples.len()
    }

    /// Number of native points the plan reads from.
    pub fn source_len(&self) -> usize {
        self.source_len
    }

    /// Canonical points that fall inside source coverage.
    pub fn covered_points(&self) -> usize {
        self.covered
    }

    /// Resample one native field; uncovered points are NaN.
    pub fn apply(&self, values: &[f32]) -> Result<Vec<f32>> {
        if values.len() != self.source_len {
            return Err(GridProcessorError::ShapeMismatch {
                what: "native field".to_string(),
                expected: self.source_len,
                actual: values.len(),
            });
        }
        Ok(self.samples.iter().map(|s| s.evaluate(values)).collect())
    }
}

/// Resamples native fields onto a fixed canonical grid.
pub struct GridNormalizer {
    grid: CanonicalGrid,
    method: InterpolationMethod,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    plans: Mutex<HashMap<u64, Arc<ResamplePlan>>>,
}

impl GridNormalizer {
    pub fn new(grid: CanonicalGrid, method: InterpolationMethod) -> Self {
        let latitudes = grid.latitudes();
        let longitudes = grid.longitudes();
        Self {
            grid,
            method,
            latitudes,
            longitudes,
            plans: Mutex::new(HashMap::new()),
        }
    }

    pub fn grid(&self) -> &CanonicalGrid {
        &self.grid
    }

    pub fn method(&self) -> InterpolationMethod {
        self.method
    }

    /// Ascending canonical latitudes shared by every normalized field.
    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    /// Ascending canonical longitudes shared by every normalized field.
    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }

    /// Plan for a native geometry, computed on first use.
    pub fn plan(&self, native: &NativeGrid) -> Result<Arc<ResamplePlan>> {
        native.validate()?;
        let key = fingerprint(native);

        if let Ok(plans) = self.plans.lock() {
            if let Some(plan) = plans.get(&key) {
                return Ok(plan.clone());
            }
        }

        let plan = Arc::new(self.build_plan(native));
        debug!(
            grid = %self.grid.name,
            method = %self.method,
            native_points = plan.source_len(),
            covered = plan.covered_points(),
            total = plan.target_len(),
            "Built resample plan"
        );
        if plan.covered_points() == 0 {
            warn!(grid = %self.grid.name, "Native grid does not overlap the canonical window");
        }

        if let Ok(mut plans) = self.plans.lock() {
            plans.insert(key, plan.clone());
        }
        Ok(plan)
    }

    /// Resample one field given on `native`.
    pub fn normalize(&self, native: &NativeGrid, values: &[f32]) -> Result<Vec<f32>> {
        self.plan(native)?.apply(values)
    }

    fn build_plan(&self, native: &NativeGrid) -> ResamplePlan {
        let mut samples = Vec::with_capacity(self.latitudes.len() * self.longitudes.len());

        match native {
            NativeGrid::Regular {
                latitudes,
                longitudes,
            } => {
                let lat_axis = Axis::latitude(latitudes);
                let lon_axis = Axis::longitude(longitudes);
                let nx = longitudes.len();
                let cols: Vec<_> = self.longitudes.iter().map(|lon| lon_axis.locate(*lon)).collect();

                for lat in &self.latitudes {
                    let row = lat_axis.locate(*lat);
                    for col in &cols {
                        let sample = match (row, col) {
                            (Some(r), Some(c)) => match self.method {
                                InterpolationMethod::Nearest => Sample::nearest(r, *c, nx),
                                InterpolationMethod::Bilinear => Sample::bilinear(r, *c, nx),
                            },
                            _ => Sample::Missing,
                        };
                        samples.push(sample);
                    }
                }
            }
            NativeGrid::Curvilinear {
                ny,
                nx,
                latitudes,
                longitudes,
            } => {
                // Scattered points: nearest neighbour regardless of method.
                let index = PointIndex::build(*ny, *nx, latitudes, longitudes, &self.grid.bbox);
                samples = self
                    .latitudes
                    .par_iter()
                    .flat_map_iter(|lat| self.longitudes.iter().map(|lon| index.sample(*lat, *lon)))
                    .collect();
            }
        }

        ResamplePlan::new(samples, native.num_points())
    }
}

fn fingerprint(native: &NativeGrid) -> u64 {
    let mut hasher = DefaultHasher::new();
    let (ny, nx) = native.shape();
    (ny, nx).hash(&mut hasher);
    let (lats, lons) = match native {
        NativeGrid::Regular {
            latitudes,
            longitudes,
        } => {
            0u8.hash(&mut hasher);
            (latitudes, longitudes)
        }
        NativeGrid::Curvilinear {
            latitudes,
            longitudes,
            ..
        } => {
            1u8.hash(&mut hasher);
            (latitudes, longitudes)
        }
    };
    lats.iter().chain(lons.iter()).for_each(|v| v.to_bits().hash(&mut hasher));
    hasher.finish()
}
