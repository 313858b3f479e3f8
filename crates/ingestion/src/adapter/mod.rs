//! Source adapters: where each model's files live and what they contain.
//!
//! The set is closed: [`GfsAdapter`] for the global model and
//! [`MetNordicAdapter`] for the regional one.

mod gfs;
mod met_nordic;

pub use gfs::GfsAdapter;
pub use met_nordic::MetNordicAdapter;

use std::path::{Path, PathBuf};

use futures::stream::{self, BoxStream, StreamExt};
use nwp_common::{CanonicalVariable, CycleResolver, ForecastCycle, SourceId};
use tokio_util::sync::CancellationToken;

use crate::download::{DownloadManager, FetchRequest, Validator};
use crate::error::FetchError;

/// Binary container format of a raw file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    Grib2,
    NetCdf,
}

/// A validated raw payload covering one or more lead times of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGridFile {
    pub cycle: ForecastCycle,
    pub format: RawFormat,
    pub path: PathBuf,
    pub lead_times: Vec<u32>,
}

/// Unit conversion applied while extracting a native field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitConversion {
    Identity,
    KelvinToCelsius,
    PascalToHectopascal,
    /// 0-1 fraction to percent.
    FractionToPercent,
    /// Rate per second (kg m-2 s-1) to per hour (mm h-1).
    PerSecondToPerHour,
}

impl UnitConversion {
    pub fn apply(&self, values: &mut [f32]) {
        let convert: fn(f32) -> f32 = match self {
            UnitConversion::Identity => return,
            UnitConversion::KelvinToCelsius => |v| v - 273.15,
            UnitConversion::PascalToHectopascal => |v| v / 100.0,
            UnitConversion::FractionToPercent => |v| v * 100.0,
            UnitConversion::PerSecondToPerHour => |v| v * 3600.0,
        };
        values.iter_mut().for_each(|v| *v = convert(*v));
    }
}

/// One native field and the canonical variable it becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    /// GRIB `PARAM:level` key or NetCDF variable name.
    pub native: &'static str,
    pub variable: CanonicalVariable,
    pub conversion: UnitConversion,
}

/// Wind given as speed and meteorological "from" direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolarWind {
    pub speed: &'static str,
    pub direction: &'static str,
    pub u: CanonicalVariable,
    pub v: CanonicalVariable,
}

/// Fixed native → canonical mapping of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableMap {
    pub fields: &'static [FieldMapping],
    pub polar_wind: Option<PolarWind>,
}

impl VariableMap {
    /// Every canonical variable the source can supply directly.
    pub fn variables(&self) -> Vec<CanonicalVariable> {
        let mut vars: Vec<_> = self.fields.iter().map(|f| f.variable).collect();
        if let Some(polar) = self.polar_wind {
            vars.extend([polar.u, polar.v]);
        }
        vars.sort();
        vars.dedup();
        vars
    }

    /// Native names to request from the source.
    pub fn native_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.fields.iter().map(|f| f.native).collect();
        if let Some(polar) = self.polar_wind {
            names.extend([polar.speed, polar.direction]);
        }
        names
    }
}

pub(crate) const fn field(native: &'static str, variable: CanonicalVariable, conversion: UnitConversion) -> FieldMapping {
    FieldMapping {
        native,
        variable,
        conversion,
    }
}

/// Result of fetching one request.
pub type FetchResult = (FetchRequest, Result<RawGridFile, FetchError>);

/// A model source: cycle cadence, lead times, remote layout and variable map.
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceId;

    fn resolver(&self) -> &CycleResolver;

    /// Configured lead times, ascending.
    fn lead_times(&self) -> &[u32];

    fn format(&self) -> RawFormat;

    fn variable_map(&self) -> &'static VariableMap;

    /// Requests covering `lead_times` of `cycle`. Empty when nothing is pending.
    fn requests(&self, cycle: &ForecastCycle, lead_times: &[u32]) -> Vec<FetchRequest>;

    /// Parse check a file must pass before it is used, reporting which
    /// requested lead times it holds.
    fn validator(&self) -> Validator;

    /// Fetch raw files for `lead_times` of `cycle`, `concurrency` at a time.
    ///
    /// Results arrive in completion order.
    fn fetch<'a>(
        &self,
        downloads: &'a DownloadManager,
        cycle: &ForecastCycle,
        lead_times: &[u32],
        concurrency: usize,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, FetchResult> {
        let cycle = *cycle;
        let format = self.format();
        let validate = self.validator();

        stream::iter(self.requests(&cycle, lead_times))
            .map(move |request| async move {
                let result = downloads
                    .fetch(&request, validate, cancel)
                    .await
                    .map(|outcome| RawGridFile {
                        cycle,
                        format,
                        path: outcome.path().to_path_buf(),
                        lead_times: request.lead_times.clone(),
                    });
                (request, result)
            })
            .buffer_unordered(concurrency.max(1))
            .boxed()
    }
}

/// `{raw_dir}/{source}/{YYYYMMDD}/{HH}/{file}`.
pub fn raw_file_path(raw_dir: &Path, cycle: &ForecastCycle, file: &str) -> PathBuf {
    raw_dir
        .join(cycle.source.as_str())
        .join(cycle.date_str())
        .join(cycle.hour_str())
        .join(file)
}

/// Replace `{key}` placeholders.
pub(crate) fn render_template(template: &str, values: &[(&str, String)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        let mut t = vec![273.15f32, 300.0];
        UnitConversion::KelvinToCelsius.apply(&mut t);
        assert!(t[0].abs() < 1e-4);
        assert!((t[1] - 26.85).abs() < 1e-4);

        let mut p = vec![101325.0f32];
        UnitConversion::PascalToHectopascal.apply(&mut p);
        assert!((p[0] - 1013.25).abs() < 1e-3);

        let mut rate = vec![0.001f32, f32::NAN];
        UnitConversion::PerSecondToPerHour.apply(&mut rate);
        assert!((rate[0] - 3.6).abs() < 1e-5);
        assert!(rate[1].is_nan());

        let mut frac = vec![0.25f32];
        UnitConversion::FractionToPercent.apply(&mut frac);
        assert_eq!(frac, vec![25.0]);
    }

    #[test]
    fn test_raw_file_path() {
        let cycle = ForecastCycle::parse(SourceId::MetNordic, "20250902", 6).unwrap();
        let path = raw_file_path(Path::new("/data/raw"), &cycle, "bundle.nc");
        assert_eq!(path, PathBuf::from("/data/raw/met_nordic/20250902/06/bundle.nc"));
    }

    #[test]
    fn test_render_template() {
        let out = render_template(
            "{base}/{date}/{hour}/{date}.nc",
            &[("base", "https://x".to_string()), ("date", "20250902".to_string()), ("hour", "06".to_string())],
        );
        assert_eq!(out, "https://x/20250902/06/20250902.nc");
    }
}
