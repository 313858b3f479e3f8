//! MET Norway MET Nordic 1 km through THREDDS: one NetCDF bundle per cycle
//! holding every lead time.

use std::path::{Path, PathBuf};

use netcdf_parser::NetCdfFile;
use nwp_common::{BoundingBox, CanonicalVariable as V, CommonResult, CycleResolver, ForecastCycle, SourceId};

use super::{field, raw_file_path, render_template, PolarWind, RawFormat, SourceAdapter, UnitConversion as U, VariableMap};
use crate::config::MetNordicConfig;
use crate::download::{Coverage, FetchRequest, Validator};
use crate::extract::lead_time_records;

static MET_NORDIC_VARIABLES: VariableMap = VariableMap {
    fields: &[
        field("air_temperature_2m", V::Temperature2m, U::KelvinToCelsius),
        field("relative_humidity_2m", V::RelativeHumidity2m, U::FractionToPercent),
        // Hourly accumulation in kg m-2, i.e. mm over the hour.
        field("precipitation_amount", V::Precip, U::Identity),
        field("cloud_area_fraction", V::CloudCover, U::FractionToPercent),
        field("air_pressure_at_sea_level", V::PressureMsl, U::PascalToHectopascal),
        field("wind_speed_of_gust", V::WindGust, U::Identity),
    ],
    polar_wind: Some(PolarWind {
        speed: "wind_speed_10m",
        direction: "wind_direction_10m",
        u: V::WindU10m,
        v: V::WindV10m,
    }),
};

/// Coordinate variables every bundle must carry.
pub(crate) const COORDINATE_VARIABLES: [&str; 3] = ["time", "latitude", "longitude"];

/// Degrees added around the window in the subset request.
const SUBSET_MARGIN: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct MetNordicAdapter {
    resolver: CycleResolver,
    lead_times: Vec<u32>,
    url_template: String,
    window: BoundingBox,
    raw_dir: PathBuf,
}

impl MetNordicAdapter {
    pub fn new(config: &MetNordicConfig, window: &BoundingBox, raw_dir: impl Into<PathBuf>) -> CommonResult<Self> {
        Ok(Self {
            resolver: config.schedule.resolver()?,
            lead_times: config.schedule.lead_times(),
            url_template: config.url_template.clone(),
            window: *window,
            raw_dir: raw_dir.into(),
        })
    }

    /// `met_forecast_1_0km_nordic_20250902T18Z.nc`
    pub fn file_name(cycle: &ForecastCycle) -> String {
        format!("met_forecast_1_0km_nordic_{}.nc", cycle.storage_key())
    }

    pub fn url(&self, cycle: &ForecastCycle) -> String {
        let date = cycle.run_date;
        let vars = MET_NORDIC_VARIABLES
            .native_names()
            .iter()
            .map(|name| format!("var={}", name))
            .collect::<Vec<_>>()
            .join("&");

        render_template(
            &self.url_template,
            &[
                ("year", date.format("%Y").to_string()),
                ("month", date.format("%m").to_string()),
                ("day", date.format("%d").to_string()),
                ("date", cycle.date_str()),
                ("hour", cycle.hour_str()),
                ("vars", vars),
                ("north", (self.window.max_lat + SUBSET_MARGIN).to_string()),
                ("south", (self.window.min_lat - SUBSET_MARGIN).to_string()),
                ("east", (self.window.max_lon + SUBSET_MARGIN).to_string()),
                ("west", (self.window.min_lon - SUBSET_MARGIN).to_string()),
            ],
        )
    }
}

/// The bundle must open, carry its coordinates and decode its time axis.
/// Requested lead times absent from the time axis make it partial.
fn validate_netcdf(path: &Path, request: &FetchRequest) -> Result<Coverage, String> {
    let file = NetCdfFile::open(path).map_err(|e| e.to_string())?;
    for name in COORDINATE_VARIABLES {
        if !file.has_variable(name) {
            return Err(format!("missing coordinate variable '{}'", name));
        }
    }

    let records = lead_time_records(&file, &request.cycle).map_err(|e| e.to_string())?;
    let missing = request
        .lead_times
        .iter()
        .copied()
        .filter(|lead| !records.contains_key(lead))
        .collect();
    Ok(Coverage::from_missing(missing))
}

impl SourceAdapter for MetNordicAdapter {
    fn source(&self) -> SourceId {
        SourceId::MetNordic
    }

    fn resolver(&self) -> &CycleResolver {
        &self.resolver
    }

    fn lead_times(&self) -> &[u32] {
        &self.lead_times
    }

    fn format(&self) -> RawFormat {
        RawFormat::NetCdf
    }

    fn variable_map(&self) -> &'static VariableMap {
        &MET_NORDIC_VARIABLES
    }

    /// A single bundle covers all pending lead times.
    fn requests(&self, cycle: &ForecastCycle, lead_times: &[u32]) -> Vec<FetchRequest> {
        if lead_times.is_empty() {
            return Vec::new();
        }
        vec![FetchRequest {
            cycle: *cycle,
            url: self.url(cycle),
            path: raw_file_path(&self.raw_dir, cycle, &Self::file_name(cycle)),
            lead_times: lead_times.to_vec(),
        }]
    }

    fn validator(&self) -> Validator {
        validate_netcdf
    }
}
