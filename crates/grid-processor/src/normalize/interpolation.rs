//! Axis lookup and per-point sampling rules for grid resampling.

/// Slack for coordinates that differ only by float noise.
pub(crate) const COORD_EPS: f64 = 1e-9;

/// Position of a target coordinate between two source indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AxisPos {
    pub lo: usize,
    pub hi: usize,
    /// Fraction of the way from `lo` to `hi`, in `[0, 1]`.
    pub frac: f64,
}

impl AxisPos {
    pub fn nearest(&self) -> usize {
        if self.frac < 0.5 {
            self.lo
        } else {
            self.hi
        }
    }
}

/// A strictly monotonic source axis, searchable in ascending order.
#[derive(Debug, Clone)]
pub(crate) struct Axis {
    ascending: Vec<f64>,
    reversed: bool,
    longitude: bool,
    periodic: bool,
}

impl Axis {
    pub fn latitude(coords: &[f64]) -> Self {
        Self::build(coords, false)
    }

    /// Longitudes are searched under 360 degree shifts; a grid that closes the
    /// globe also bridges its last and first columns.
    pub fn longitude(coords: &[f64]) -> Self {
        Self::build(coords, true)
    }

    fn build(coords: &[f64], longitude: bool) -> Self {
        let reversed = coords.len() > 1 && coords[1] < coords[0];
        let mut ascending = coords.to_vec();
        if reversed {
            ascending.reverse();
        }

        let n = ascending.len();
        let periodic = longitude && n > 1 && {
            let span = ascending[n - 1] - ascending[0];
            let step = span / (n - 1) as f64;
            (span + step - 360.0).abs() < 1e-6
        };

        Self {
            ascending,
            reversed,
            longitude,
            periodic,
        }
    }

    fn original(&self, i: usize) -> usize {
        if self.reversed {
            self.ascending.len() - 1 - i
        } else {
            i
        }
    }

    fn locate_direct(&self, t: f64) -> Option<AxisPos> {
        let n = self.ascending.len();
        let (min, max) = (self.ascending[0], self.ascending[n - 1]);
        if t < min - COORD_EPS || t > max + COORD_EPS {
            return None;
        }
        if n == 1 {
            return Some(AxisPos { lo: 0, hi: 0, frac: 0.0 });
        }

        let k = self.ascending.partition_point(|v| *v <= t);
        let i0 = k.saturating_sub(1).min(n - 2);
        let i1 = i0 + 1;
        let frac = ((t - self.ascending[i0]) / (self.ascending[i1] - self.ascending[i0])).clamp(0.0, 1.0);

        Some(AxisPos {
            lo: self.original(i0),
            hi: self.original(i1),
            frac,
        })
    }

    /// Locate a latitude, or a longitude in `[-180, 180]`.
    pub fn locate(&self, t: f64) -> Option<AxisPos> {
        if let Some(pos) = self.locate_direct(t) {
            return Some(pos);
        }
        if self.longitude {
            for shift in [360.0, -360.0, 720.0] {
                if let Some(pos) = self.locate_direct(t + shift) {
                    return Some(pos);
                }
            }
        }
        if self.periodic {
            return self.locate_seam(t);
        }
        None
    }

    /// The gap between the last column and the first column plus 360.
    fn locate_seam(&self, t: f64) -> Option<AxisPos> {
        let n = self.ascending.len();
        let (min, max) = (self.ascending[0], self.ascending[n - 1]);
        let shifted = max + (t - max).rem_euclid(360.0);
        let gap = min + 360.0 - max;
        if gap <= 0.0 || shifted > max + gap + COORD_EPS {
            return None;
        }
        Some(AxisPos {
            lo: self.original(n - 1),
            hi: self.original(0),
            frac: ((shifted - max) / gap).clamp(0.0, 1.0),
        })
    }
}

/// How one target point is derived from the source values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Sample {
    /// Outside source coverage.
    Missing,
    /// Copy one source value.
    Point(usize),
    /// Weighted blend of four source values.
    Blend([(usize, f32); 4]),
}

impl Sample {
    pub fn bilinear(row: AxisPos, col: AxisPos, nx: usize) -> Self {
        let (fy, fx) = (row.frac as f32, col.frac as f32);
        Sample::Blend([
            (row.lo * nx + col.lo, (1.0 - fx) * (1.0 - fy)),
            (row.lo * nx + col.hi, fx * (1.0 - fy)),
            (row.hi * nx + col.lo, (1.0 - fx) * fy),
            (row.hi * nx + col.hi, fx * fy),
        ])
    }

    pub fn nearest(row: AxisPos, col: AxisPos, nx: usize) -> Self {
        Sample::Point(row.nearest() * nx + col.nearest())
    }

    /// Evaluate against source values. Any NaN that carries weight yields NaN.
    pub fn evaluate(&self, data: &[f32]) -> f32 {
        match self {
            Sample::Missing => f32::NAN,
            Sample::Point(i) => data[*i],
            Sample::Blend(corners) => {
                let mut acc = 0.0f32;
                for (i, w) in corners {
                    if *w == 0.0 {
                        continue;
                    }
                    let v = data[*i];
                    if v.is_nan() {
                        return f32::NAN;
                    }
                    acc += v * w;
                }
                acc
            }
        }
    }
}
