//! Derived quantities, computed element-wise on the native grid.
//!
//! Wind gust follows a three-tier cascade decided once per lead time:
//!
//! 1. a gust field from the source is used verbatim;
//! 2. otherwise, with boundary-layer TKE: `speed + β·sqrt(tke)`;
//! 3. otherwise `speed × G`, with G from a [`GustFactor`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nwp_common::CanonicalVariable;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GustConfig;
use crate::extract::ExtractedFields;

/// Specific gas constant of dry air, J kg-1 K-1.
pub const R_DRY_AIR: f32 = 287.058;

/// Scales sustained 10 m wind into a gust estimate for the last tier.
///
/// [`ConstantGustFactor`] is the default. Implementations may vary the factor
/// with the valid time, e.g. for a diurnal cycle.
pub trait GustFactor: Send + Sync + fmt::Debug {
    fn factor(&self, valid_time: DateTime<Utc>) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantGustFactor(pub f32);

impl GustFactor for ConstantGustFactor {
    fn factor(&self, _valid_time: DateTime<Utc>) -> f32 {
        self.0
    }
}

/// Which cascade tier produced `wind_gust`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GustTier {
    Direct,
    Turbulence,
    SpeedFactor,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivationSummary {
    /// `None` when not even 10 m wind was available.
    pub gust_tier: Option<GustTier>,
    pub derived: Vec<CanonicalVariable>,
    /// Derived variables whose inputs were missing.
    pub unavailable: Vec<CanonicalVariable>,
}

impl DerivationSummary {
    fn put(&mut self, fields: &mut ExtractedFields, variable: CanonicalVariable, values: Option<Vec<f32>>) {
        match values {
            Some(values) => {
                fields.fields.insert(variable, values);
                self.derived.push(variable);
            }
            None => self.unavailable.push(variable),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DerivedQuantityComputer {
    beta: f32,
    gust_factor: Arc<dyn GustFactor>,
}

impl DerivedQuantityComputer {
    pub fn new(config: &GustConfig) -> Self {
        Self {
            beta: config.beta,
            gust_factor: Arc::new(ConstantGustFactor(config.factor)),
        }
    }

    /// Replace the constant G of the last gust tier.
    pub fn with_gust_factor(mut self, gust_factor: Arc<dyn GustFactor>) -> Self {
        self.gust_factor = gust_factor;
        self
    }

    /// Add derived fields to `fields` in place.
    ///
    /// Variables filled here are removed from `fields.missing`.
    pub fn compute(&self, fields: &mut ExtractedFields, valid_time: DateTime<Utc>) -> DerivationSummary {
        use CanonicalVariable as V;

        let mut summary = DerivationSummary::default();

        let speed_10m = pair(fields, V::WindU10m, V::WindV10m).map(|(u, v)| wind_speed(u, v));
        let direction = pair(fields, V::WindU10m, V::WindV10m).map(|(u, v)| wind_direction(u, v));
        let speed_100m = pair(fields, V::WindU100m, V::WindV100m).map(|(u, v)| wind_speed(u, v));
        let power = match (&speed_100m, fields.get(V::SurfacePressure), fields.get(V::Temperature2m)) {
            (Some(speed), Some(p), Some(t)) => Some(power_density(speed, p, t)),
            _ => None,
        };

        let (tier, gust) = if fields.fields.contains_key(&V::WindGust) {
            (Some(GustTier::Direct), None)
        } else {
            match (&speed_10m, fields.get(V::TkePbl)) {
                (Some(speed), Some(tke)) => (Some(GustTier::Turbulence), Some(turbulence_gust(speed, tke, self.beta))),
                (Some(speed), None) => {
                    let g = self.gust_factor.factor(valid_time);
                    (Some(GustTier::SpeedFactor), Some(factor_gust(speed, g)))
                }
                (None, _) => (None, None),
            }
        };

        summary.put(fields, V::WindSpeed10m, speed_10m);
        summary.put(fields, V::WindDirection10m, direction);
        summary.put(fields, V::WindSpeed100m, speed_100m);
        summary.put(fields, V::WindPowerDensity100m, power);
        if tier != Some(GustTier::Direct) {
            summary.put(fields, V::WindGust, gust);
        }
        summary.gust_tier = tier;

        fields.missing.retain(|v| !fields.fields.contains_key(v));

        debug!(
            lead_time = fields.lead_time,
            gust_tier = ?summary.gust_tier,
            unavailable = ?summary.unavailable,
            "Derived quantities computed"
        );
        summary
    }
}

fn pair(
    fields: &ExtractedFields,
    a: CanonicalVariable,
    b: CanonicalVariable,
) -> Option<(&[f32], &[f32])> {
    Some((fields.get(a)?, fields.get(b)?))
}

pub fn wind_speed(u: &[f32], v: &[f32]) -> Vec<f32> {
    u.iter().zip(v).map(|(u, v)| (u * u + v * v).sqrt()).collect()
}

/// Meteorological "from" direction in degrees, `[0, 360)`.
pub fn wind_direction(u: &[f32], v: &[f32]) -> Vec<f32> {
    u.iter()
        .zip(v)
        .map(|(u, v)| (270.0 - v.atan2(*u).to_degrees()).rem_euclid(360.0))
        .collect()
}

/// `0.5·ρ·speed³` with `ρ = p / (R·T)`; pressure in hPa, temperature in °C.
pub fn power_density(speed: &[f32], pressure_hpa: &[f32], temperature_c: &[f32]) -> Vec<f32> {
    speed
        .iter()
        .zip(pressure_hpa)
        .zip(temperature_c)
        .map(|((s, p), t)| {
            let rho = (p * 100.0) / (R_DRY_AIR * (t + 273.15));
            0.5 * rho * s * s * s
        })
        .collect()
}

/// Tier 2. Negative TKE (packing noise) counts as zero.
pub fn turbulence_gust(speed: &[f32], tke: &[f32], beta: f32) -> Vec<f32> {
    speed
        .iter()
        .zip(tke)
        .map(|(s, k)| s + beta * k.max(0.0).sqrt())
        .collect()
}

/// Tier 3.
pub fn factor_gust(speed: &[f32], factor: f32) -> Vec<f32> {
    speed.iter().map(|s| s * factor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_processor::NativeGrid;
    use std::collections::BTreeMap;
    use test_utils::{assert_approx_eq, create_uniform_wind};

    use CanonicalVariable as V;

    fn fields(entries: Vec<(CanonicalVariable, Vec<f32>)>) -> ExtractedFields {
        ExtractedFields {
            lead_time: 6,
            grid: Arc::new(NativeGrid::Regular {
                latitudes: vec![60.0, 61.0],
                longitudes: vec![10.0, 11.0],
            }),
            fields: entries.into_iter().collect::<BTreeMap<_, _>>(),
            missing: vec![V::WindGust, V::TkePbl],
        }
    }

    fn computer() -> DerivedQuantityComputer {
        DerivedQuantityComputer::new(&GustConfig::default())
    }

    fn valid_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-09-03T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_direct_gust_is_used_verbatim() {
        let mut f = fields(vec![
            (V::WindU10m, vec![3.0; 4]),
            (V::WindV10m, vec![4.0; 4]),
            (V::TkePbl, vec![9.0; 4]),
            (V::WindGust, vec![17.25, 1.0, f32::NAN, 0.0]),
        ]);
        f.missing.clear();
        let summary = computer().compute(&mut f, valid_time());

        assert_eq!(summary.gust_tier, Some(GustTier::Direct));
        let gust = f.get(V::WindGust).unwrap();
        assert_eq!(gust[0], 17.25);
        assert!(gust[2].is_nan());
        assert!(!summary.derived.contains(&V::WindGust));
    }

    #[test]
    fn test_turbulence_tier_is_exact() {
        let u = vec![3.0, 0.0, 6.0, -8.0];
        let v = vec![4.0, 5.0, 8.0, 6.0];
        let tke = vec![2.25, 0.0, 4.0, -0.01];
        let mut f = fields(vec![(V::WindU10m, u), (V::WindV10m, v), (V::TkePbl, tke)]);
        let summary = computer().compute(&mut f, valid_time());

        assert_eq!(summary.gust_tier, Some(GustTier::Turbulence));
        let gust = f.get(V::WindGust).unwrap();
        // speeds 5, 5, 10, 10; negative TKE clamps to zero
        for (got, expected) in gust.iter().zip([8.0, 5.0, 14.0, 10.0]) {
            assert_approx_eq!(*got, expected, 1e-6);
        }
        assert!(!f.missing.contains(&V::WindGust));
    }

    #[test]
    fn test_speed_factor_tier() {
        let (u, v) = create_uniform_wind(2, 2, 10.0, 225.0);
        let mut f = fields(vec![(V::WindU10m, u), (V::WindV10m, v)]);
        let summary = computer().compute(&mut f, valid_time());

        assert_eq!(summary.gust_tier, Some(GustTier::SpeedFactor));
        for g in f.get(V::WindGust).unwrap() {
            assert_approx_eq!(*g, 15.0, 1e-4);
        }
    }

    #[test]
    fn test_custom_gust_factor() {
        #[derive(Debug)]
        struct NightCalm;
        impl GustFactor for NightCalm {
            fn factor(&self, valid_time: DateTime<Utc>) -> f32 {
                use chrono::Timelike;
                if valid_time.hour() < 6 {
                    1.2
                } else {
                    1.5
                }
            }
        }

        let mut f = fields(vec![(V::WindU10m, vec![10.0; 4]), (V::WindV10m, vec![0.0; 4])]);
        computer()
            .with_gust_factor(Arc::new(NightCalm))
            .compute(&mut f, valid_time());
        assert_approx_eq!(f.get(V::WindGust).unwrap()[0], 12.0, 1e-5);
    }

    #[test]
    fn test_no_wind_means_no_gust() {
        let mut f = fields(vec![(V::WindU10m, vec![1.0; 4]), (V::Temperature2m, vec![10.0; 4])]);
        let summary = computer().compute(&mut f, valid_time());

        assert_eq!(summary.gust_tier, None);
        assert!(summary.unavailable.contains(&V::WindGust));
        assert!(summary.unavailable.contains(&V::WindSpeed10m));
        assert!(!f.fields.contains_key(&V::WindSpeed10m));
        assert!(f.missing.contains(&V::WindGust));
    }

    #[test]
    fn test_wind_direction_convention() {
        let dirs = wind_direction(&[10.0, 0.0, -10.0, 0.0], &[0.0, 10.0, 0.0, -10.0]);
        // westerly, southerly, easterly, northerly
        assert_approx_eq!(dirs[0], 270.0, 1e-4);
        assert_approx_eq!(dirs[1], 180.0, 1e-4);
        assert_approx_eq!(dirs[2], 90.0, 1e-4);
        assert_approx_eq!(dirs[3], 0.0, 1e-4);

        let (u, v) = create_uniform_wind(1, 1, 7.0, 135.0);
        assert_approx_eq!(wind_direction(&u, &v)[0], 135.0, 1e-3);
    }

    #[test]
    fn test_power_density_needs_all_inputs() {
        let mut f = fields(vec![
            (V::WindU100m, vec![10.0; 4]),
            (V::WindV100m, vec![0.0; 4]),
            (V::SurfacePressure, vec![1000.0; 4]),
            (V::Temperature2m, vec![15.0; 4]),
        ]);
        computer().compute(&mut f, valid_time());

        // rho = 100000 / (287.058 * 288.15) ≈ 1.2090
        let pd = f.get(V::WindPowerDensity100m).unwrap();
        assert_approx_eq!(pd[0], 0.5 * 1.20895 * 1000.0, 0.05);
        assert_approx_eq!(f.get(V::WindSpeed100m).unwrap()[0], 10.0, 1e-6);

        let mut f = fields(vec![(V::WindU100m, vec![10.0; 4]), (V::WindV100m, vec![0.0; 4])]);
        let summary = computer().compute(&mut f, valid_time());
        assert!(summary.unavailable.contains(&V::WindPowerDensity100m));
    }
}
