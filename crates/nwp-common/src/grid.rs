//! The canonical target grid every field of a cycle is aligned to.

use crate::{BoundingBox, CommonError, CommonResult};
use serde::{Deserialize, Serialize};

/// A regular lat/lon grid spanning a bounding box at a fixed resolution.
///
/// Coordinates are strictly ascending in both axes and never leave the box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalGrid {
    pub name: String,
    pub bbox: BoundingBox,
    /// Grid spacing in degrees, identical for both axes.
    pub resolution: f64,
}

impl CanonicalGrid {
    pub fn new(name: impl Into<String>, bbox: BoundingBox, resolution: f64) -> CommonResult<Self> {
        bbox.validate()?;
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(CommonError::InvalidGrid(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        if resolution > bbox.width() || resolution > bbox.height() {
            return Err(CommonError::InvalidGrid(format!(
                "resolution {} exceeds window {:?}",
                resolution, bbox
            )));
        }
        Ok(Self {
            name: name.into(),
            bbox,
            resolution,
        })
    }

    fn axis(min: f64, max: f64, step: f64) -> Vec<f64> {
        // Tolerance keeps e.g. 35 + 140 * 0.25 from falling just short of 70.
        let n = ((max - min) / step + 1e-9).floor() as usize + 1;
        (0..n)
            .map(|i| round_nano(min + i as f64 * step))
            .filter(|v| *v <= max + 1e-9)
            .collect()
    }

    /// Ascending latitude vector.
    pub fn latitudes(&self) -> Vec<f64> {
        Self::axis(self.bbox.min_lat, self.bbox.max_lat, self.resolution)
    }

    /// Ascending longitude vector.
    pub fn longitudes(&self) -> Vec<f64> {
        Self::axis(self.bbox.min_lon, self.bbox.max_lon, self.resolution)
    }

    /// `(n_lat, n_lon)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.latitudes().len(), self.longitudes().len())
    }

    pub fn num_points(&self) -> usize {
        let (ny, nx) = self.shape();
        ny * nx
    }
}

fn round_nano(value: f64) -> f64 {
    (value * 1e9).round() / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_europe_quarter_degree() {
        let grid = CanonicalGrid::new("europe", BoundingBox::europe(), 0.25).unwrap();
        let lats = grid.latitudes();
        let lons = grid.longitudes();

        assert_eq!(lats.len(), 141);
        assert_eq!(lons.len(), 221);
        assert_eq!(lats[0], 35.0);
        assert!((lats[140] - 70.0).abs() < 1e-9);
        assert!((lons[0] + 15.0).abs() < 1e-9);
        assert!((lons[220] - 40.0).abs() < 1e-9);
        assert!(lats.windows(2).all(|w| w[0] < w[1]));
        assert!(lons.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_axis_never_exceeds_bbox() {
        let grid = CanonicalGrid::new("odd", BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.3).unwrap();
        let lats = grid.latitudes();
        assert_eq!(lats.len(), 4);
        assert!(*lats.last().unwrap() <= 1.0);
    }

    #[test]
    fn test_invalid_resolution() {
        assert!(CanonicalGrid::new("x", BoundingBox::europe(), 0.0).is_err());
        assert!(CanonicalGrid::new("x", BoundingBox::europe(), f64::NAN).is_err());
        assert!(CanonicalGrid::new("x", BoundingBox::europe(), 100.0).is_err());
    }
}
