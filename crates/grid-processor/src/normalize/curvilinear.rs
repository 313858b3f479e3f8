//! Nearest-neighbour lookup for grids with per-point coordinates.

use std::collections::HashMap;

use nwp_common::bbox::wrap_longitude;
use nwp_common::BoundingBox;

use super::interpolation::Sample;

/// Spatial hash of source points restricted to the target window.
pub(crate) struct PointIndex<'a> {
    latitudes: &'a [f64],
    longitudes: Vec<f64>,
    buckets: HashMap<(i64, i64), Vec<usize>>,
    lat_cell: f64,
    lon_cell: f64,
    /// Largest distance (in degrees of latitude) still counted as covered.
    max_distance: f64,
}

impl<'a> PointIndex<'a> {
    pub fn build(ny: usize, nx: usize, latitudes: &'a [f64], longitudes: &[f64], window: &BoundingBox) -> Self {
        let longitudes: Vec<f64> = longitudes.iter().map(|l| wrap_longitude(*l)).collect();
        let spacing = estimate_spacing(ny, nx, latitudes, &longitudes);
        let max_distance = spacing.max(1e-6);

        let extreme_lat = window.min_lat.abs().max(window.max_lat.abs()) + max_distance;
        let cos_min = extreme_lat.min(89.0).to_radians().cos().max(0.05);
        let lat_cell = max_distance;
        let lon_cell = max_distance / cos_min;

        let mut buckets: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, (lat, lon)) in latitudes.iter().zip(&longitudes).enumerate() {
            if !lat.is_finite() || !lon.is_finite() {
                continue;
            }
            if *lat < window.min_lat - lat_cell
                || *lat > window.max_lat + lat_cell
                || *lon < window.min_lon - lon_cell
                || *lon > window.max_lon + lon_cell
            {
                continue;
            }
            buckets
                .entry(((lat / lat_cell).floor() as i64, (lon / lon_cell).floor() as i64))
                .or_default()
                .push(i);
        }

        Self {
            latitudes,
            longitudes,
            buckets,
            lat_cell,
            lon_cell,
            max_distance,
        }
    }

    pub fn sample(&self, lat: f64, lon: f64) -> Sample {
        let (bi, bj) = ((lat / self.lat_cell).floor() as i64, (lon / self.lon_cell).floor() as i64);
        let cos_lat = lat.to_radians().cos();

        let mut best: Option<(f64, usize)> = None;
        for di in -1..=1 {
            for dj in -1..=1 {
                let Some(points) = self.buckets.get(&(bi + di, bj + dj)) else {
                    continue;
                };
                for &p in points {
                    let dlat = self.latitudes[p] - lat;
                    let dlon = (self.longitudes[p] - lon) * cos_lat;
                    let d2 = dlat * dlat + dlon * dlon;
                    // Ties go to the lower index so plans are deterministic.
                    if best.map_or(true, |(b, bp)| d2 < b || (d2 == b && p < bp)) {
                        best = Some((d2, p));
                    }
                }
            }
        }

        match best {
            Some((d2, p)) if d2.sqrt() <= self.max_distance => Sample::Point(p),
            _ => Sample::Missing,
        }
    }
}

/// Mean neighbour distance along the middle row and column, whichever is larger.
fn estimate_spacing(ny: usize, nx: usize, lats: &[f64], lons: &[f64]) -> f64 {
    let distance = |a: usize, b: usize| {
        let cos_lat = ((lats[a] + lats[b]) / 2.0).to_radians().cos();
        let dlat = lats[b] - lats[a];
        let dlon = (lons[b] - lons[a]) * cos_lat;
        (dlat * dlat + dlon * dlon).sqrt()
    };
    let mean = |pairs: Vec<(usize, usize)>| {
        let finite: Vec<f64> = pairs
            .into_iter()
            .map(|(a, b)| distance(a, b))
            .filter(|d| d.is_finite())
            .collect();
        if finite.is_empty() {
            0.0
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        }
    };

    let mid_row = ny / 2;
    let mid_col = nx / 2;
    let along_x = mean((0..nx.saturating_sub(1)).map(|x| (mid_row * nx + x, mid_row * nx + x + 1)).collect());
    let along_y = mean((0..ny.saturating_sub(1)).map(|y| (y * nx + mid_col, (y + 1) * nx + mid_col)).collect());
    along_x.max(along_y)
}
