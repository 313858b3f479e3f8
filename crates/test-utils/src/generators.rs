//! Deterministic field generators for synthetic model output.
//!
//! All grids are row-major (row 0 first) with `width` columns.

/// Each cell is `col * 1000 + row`, so `grid[row * width + col]` is easy to
/// verify after a write/read cycle.
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0);
/// assert_eq!(grid[10], 1.0);
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Kelvin temperatures between roughly 250 K and 310 K.
pub fn create_temperature_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let x_factor = col as f32 / width.max(1) as f32;
            let y_factor = row as f32 / height.max(1) as f32;
            data.push(250.0 + x_factor * 30.0 + y_factor * 30.0);
        }
    }
    data
}

/// Uniform wind given as speed (m/s) and meteorological "from" direction.
///
/// Returns `(u, v)` component grids.
pub fn create_uniform_wind(width: usize, height: usize, speed: f32, from_deg: f32) -> (Vec<f32>, Vec<f32>) {
    let rad = from_deg.to_radians();
    let u = -speed * rad.sin();
    let v = -speed * rad.cos();
    (vec![u; width * height], vec![v; width * height])
}

/// Evenly spaced coordinate axis `start, start + step, ...` with `n` points.
pub fn axis(start: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| start + i as f64 * step).collect()
}
