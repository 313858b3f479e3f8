//! Core types for grid normalization.

use nwp_common::CanonicalVariable;
use serde::{Deserialize, Serialize};

/// Interpolation method used when resampling onto the canonical grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Nearest neighbor (fastest, preserves exact source values).
    Nearest,
    /// Bilinear interpolation between the four surrounding source points.
    #[default]
    Bilinear,
}

impl InterpolationMethod {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "nearest" | "nn" => Self::Nearest,
            "bilinear" | "linear" => Self::Bilinear,
            _ => Self::Bilinear,
        }
    }
}

impl std::fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Bilinear => write!(f, "bilinear"),
        }
    }
}

/// Geometry of a source field before normalization.
///
/// Values of a field are always row-major with `ny` rows of `nx` columns.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeGrid {
    /// Separable axes. Either axis may be descending, longitudes may use 0..360.
    Regular {
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
    },
    /// Per-point coordinates, e.g. a projected regional grid.
    Curvilinear {
        ny: usize,
        nx: usize,
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
    },
}

impl NativeGrid {
    /// `(ny, nx)`.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            NativeGrid::Regular {
                latitudes,
                longitudes,
            } => (latitudes.len(), longitudes.len()),
            NativeGrid::Curvilinear { ny, nx, .. } => (*ny, *nx),
        }
    }

    pub fn num_points(&self) -> usize {
        let (ny, nx) = self.shape();
        ny * nx
    }

    /// Check that coordinate vectors agree with the declared shape.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            NativeGrid::Regular {
                latitudes,
                longitudes,
            } => {
                if latitudes.is_empty() || longitudes.is_empty() {
                    return Err(crate::GridProcessorError::invalid_grid("empty coordinate axis"));
                }
                if !is_monotonic(latitudes) || !is_monotonic(longitudes) {
                    return Err(crate::GridProcessorError::invalid_grid(
                        "regular grid axes must be strictly monotonic",
                    ));
                }
            }
            NativeGrid::Curvilinear {
                ny,
                nx,
                latitudes,
                longitudes,
            } => {
                let n = ny * nx;
                if n == 0 {
                    return Err(crate::GridProcessorError::invalid_grid("empty curvilinear grid"));
                }
                if latitudes.len() != n || longitudes.len() != n {
                    return Err(crate::GridProcessorError::ShapeMismatch {
                        what: "curvilinear coordinates".to_string(),
                        expected: n,
                        actual: latitudes.len().min(longitudes.len()),
                    });
                }
            }
        }
        Ok(())
    }
}

fn is_monotonic(axis: &[f64]) -> bool {
    if axis.len() < 2 {
        return true;
    }
    let ascending = axis[1] > axis[0];
    axis.windows(2)
        .all(|w| if ascending { w[1] > w[0] } else { w[1] < w[0] })
}

/// One canonical field of one lead time on the canonical grid.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedField {
    pub variable: CanonicalVariable,
    pub lead_time: u32,
    /// Row-major `(lat, lon)`, ascending in both axes; NaN where uncovered.
    pub values: Vec<f32>,
}

impl NormalizedField {
    pub fn new(variable: CanonicalVariable, lead_time: u32, values: Vec<f32>) -> Self {
        Self {
            variable,
            lead_time,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_parse() {
        assert_eq!(InterpolationMethod::from_str("NEAREST"), InterpolationMethod::Nearest);
        assert_eq!(InterpolationMethod::from_str("linear"), InterpolationMethod::Bilinear);
        assert_eq!(InterpolationMethod::from_str("cubic"), InterpolationMethod::Bilinear);
    }

    #[test]
    fn test_regular_grid_validation() {
        let grid = NativeGrid::Regular {
            latitudes: vec![70.0, 69.75, 69.5],
            longitudes: vec![345.0, 345.25],
        };
        assert!(grid.validate().is_ok());
        assert_eq!(grid.shape(), (3, 2));

        let bad = NativeGrid::Regular {
            latitudes: vec![70.0, 70.0],
            longitudes: vec![1.0],
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_curvilinear_length_checked() {
        let grid = NativeGrid::Curvilinear {
            ny: 2,
            nx: 2,
            latitudes: vec![60.0; 4],
            longitudes: vec![10.0; 3],
        };
        assert!(grid.validate().is_err());
    }
}
