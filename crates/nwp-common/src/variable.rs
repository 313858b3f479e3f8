//! Canonical variable vocabulary shared by all sources.

use crate::CommonError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named, unit-tagged quantity every source maps its native fields onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalVariable {
    #[serde(rename = "wind_u_10m")]
    WindU10m,
    #[serde(rename = "wind_v_10m")]
    WindV10m,
    #[serde(rename = "wind_u_100m")]
    WindU100m,
    #[serde(rename = "wind_v_100m")]
    WindV100m,
    #[serde(rename = "temperature_2m")]
    Temperature2m,
    #[serde(rename = "relative_humidity_2m")]
    RelativeHumidity2m,
    #[serde(rename = "precip")]
    Precip,
    #[serde(rename = "cloud_cover")]
    CloudCover,
    #[serde(rename = "surface_pressure")]
    SurfacePressure,
    #[serde(rename = "pressure_msl")]
    PressureMsl,
    #[serde(rename = "tke_pbl")]
    TkePbl,
    #[serde(rename = "wind_gust")]
    WindGust,
    #[serde(rename = "wind_speed_10m")]
    WindSpeed10m,
    #[serde(rename = "wind_speed_100m")]
    WindSpeed100m,
    #[serde(rename = "wind_direction_10m")]
    WindDirection10m,
    #[serde(rename = "wind_power_density_100m")]
    WindPowerDensity100m,
}

impl CanonicalVariable {
    pub const ALL: [CanonicalVariable; 16] = [
        CanonicalVariable::WindU10m,
        CanonicalVariable::WindV10m,
        CanonicalVariable::WindU100m,
        CanonicalVariable::WindV100m,
        CanonicalVariable::Temperature2m,
        CanonicalVariable::RelativeHumidity2m,
        CanonicalVariable::Precip,
        CanonicalVariable::CloudCover,
        CanonicalVariable::SurfacePressure,
        CanonicalVariable::PressureMsl,
        CanonicalVariable::TkePbl,
        CanonicalVariable::WindGust,
        CanonicalVariable::WindSpeed10m,
        CanonicalVariable::WindSpeed100m,
        CanonicalVariable::WindDirection10m,
        CanonicalVariable::WindPowerDensity100m,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CanonicalVariable::WindU10m => "wind_u_10m",
            CanonicalVariable::WindV10m => "wind_v_10m",
            CanonicalVariable::WindU100m => "wind_u_100m",
            CanonicalVariable::WindV100m => "wind_v_100m",
            CanonicalVariable::Temperature2m => "temperature_2m",
            CanonicalVariable::RelativeHumidity2m => "relative_humidity_2m",
            CanonicalVariable::Precip => "precip",
            CanonicalVariable::CloudCover => "cloud_cover",
            CanonicalVariable::SurfacePressure => "surface_pressure",
            CanonicalVariable::PressureMsl => "pressure_msl",
            CanonicalVariable::TkePbl => "tke_pbl",
            CanonicalVariable::WindGust => "wind_gust",
            CanonicalVariable::WindSpeed10m => "wind_speed_10m",
            CanonicalVariable::WindSpeed100m => "wind_speed_100m",
            CanonicalVariable::WindDirection10m => "wind_direction_10m",
            CanonicalVariable::WindPowerDensity100m => "wind_power_density_100m",
        }
    }

    /// Canonical units after extraction-time conversion.
    pub fn units(&self) -> &'static str {
        match self {
            CanonicalVariable::WindU10m
            | CanonicalVariable::WindV10m
            | CanonicalVariable::WindU100m
            | CanonicalVariable::WindV100m
            | CanonicalVariable::WindGust
            | CanonicalVariable::WindSpeed10m
            | CanonicalVariable::WindSpeed100m => "m s-1",
            CanonicalVariable::Temperature2m => "degC",
            CanonicalVariable::RelativeHumidity2m | CanonicalVariable::CloudCover => "%",
            CanonicalVariable::Precip => "mm h-1",
            CanonicalVariable::SurfacePressure | CanonicalVariable::PressureMsl => "hPa",
            CanonicalVariable::TkePbl => "J kg-1",
            CanonicalVariable::WindDirection10m => "degree",
            CanonicalVariable::WindPowerDensity100m => "W m-2",
        }
    }

    pub fn long_name(&self) -> &'static str {
        match self {
            CanonicalVariable::WindU10m => "10 m eastward wind",
            CanonicalVariable::WindV10m => "10 m northward wind",
            CanonicalVariable::WindU100m => "100 m eastward wind",
            CanonicalVariable::WindV100m => "100 m northward wind",
            CanonicalVariable::Temperature2m => "2 m air temperature",
            CanonicalVariable::RelativeHumidity2m => "2 m relative humidity",
            CanonicalVariable::Precip => "precipitation rate",
            CanonicalVariable::CloudCover => "total cloud cover",
            CanonicalVariable::SurfacePressure => "surface air pressure",
            CanonicalVariable::PressureMsl => "air pressure at mean sea level",
            CanonicalVariable::TkePbl => "planetary boundary layer turbulent kinetic energy",
            CanonicalVariable::WindGust => "10 m wind speed of gust",
            CanonicalVariable::WindSpeed10m => "10 m wind speed",
            CanonicalVariable::WindSpeed100m => "100 m wind speed",
            CanonicalVariable::WindDirection10m => "10 m wind from direction",
            CanonicalVariable::WindPowerDensity100m => "100 m wind power density",
        }
    }

    /// Variables that are only ever computed, never read from a source file.
    ///
    /// `WindGust` is not listed: it may come straight from a source.
    pub fn is_derived_only(&self) -> bool {
        matches!(
            self,
            CanonicalVariable::WindSpeed10m
                | CanonicalVariable::WindSpeed100m
                | CanonicalVariable::WindDirection10m
                | CanonicalVariable::WindPowerDensity100m
        )
    }
}

impl fmt::Display for CanonicalVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CanonicalVariable {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalVariable::ALL
            .iter()
            .find(|v| v.name() == s)
            .copied()
            .ok_or_else(|| CommonError::UnknownVariable(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for var in CanonicalVariable::ALL {
            assert_eq!(var.name().parse::<CanonicalVariable>().unwrap(), var);
        }
        assert!("dewpoint_2m".parse::<CanonicalVariable>().is_err());
    }

    #[test]
    fn test_serde_names_match_display() {
        for var in CanonicalVariable::ALL {
            let json = serde_json::to_string(&var).unwrap();
            assert_eq!(json, format!("\"{}\"", var));
        }
    }

    #[test]
    fn test_units() {
        assert_eq!(CanonicalVariable::Temperature2m.units(), "degC");
        assert_eq!(CanonicalVariable::SurfacePressure.units(), "hPa");
        assert_eq!(CanonicalVariable::WindGust.units(), "m s-1");
        assert!(!CanonicalVariable::WindGust.is_derived_only());
        assert!(CanonicalVariable::WindSpeed10m.is_derived_only());
    }
}
