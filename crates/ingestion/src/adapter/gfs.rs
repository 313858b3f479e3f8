//! NOAA GFS 0.25° through the NOMADS GRIB filter: one GRIB2 file per lead time.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use grib2_parser::Grib2Reader;
use nwp_common::{BoundingBox, CanonicalVariable as V, CommonResult, CycleResolver, ForecastCycle, SourceId};

use super::{field, raw_file_path, RawFormat, SourceAdapter, UnitConversion as U, VariableMap};
use crate::config::GfsConfig;
use crate::download::{Coverage, FetchRequest, Validator};

static GFS_VARIABLES: VariableMap = VariableMap {
    fields: &[
        field("UGRD:10 m above ground", V::WindU10m, U::Identity),
        field("VGRD:10 m above ground", V::WindV10m, U::Identity),
        field("UGRD:100 m above ground", V::WindU100m, U::Identity),
        field("VGRD:100 m above ground", V::WindV100m, U::Identity),
        field("TMP:2 m above ground", V::Temperature2m, U::KelvinToCelsius),
        field("RH:2 m above ground", V::RelativeHumidity2m, U::Identity),
        field("PRATE:surface", V::Precip, U::PerSecondToPerHour),
        field("TCDC:entire atmosphere", V::CloudCover, U::Identity),
        field("PRES:surface", V::SurfacePressure, U::PascalToHectopascal),
        field("PRMSL:mean sea level", V::PressureMsl, U::PascalToHectopascal),
        field("TKE:planetary boundary layer", V::TkePbl, U::Identity),
        field("GUST:surface", V::WindGust, U::Identity),
    ],
    polar_wind: None,
};

#[derive(Debug, Clone)]
pub struct GfsAdapter {
    resolver: CycleResolver,
    lead_times: Vec<u32>,
    filter_url: String,
    /// Requested sub-region, already widened by the margin.
    region: BoundingBox,
    raw_dir: PathBuf,
}

impl GfsAdapter {
    pub fn new(config: &GfsConfig, window: &BoundingBox, raw_dir: impl Into<PathBuf>) -> CommonResult<Self> {
        let m = config.margin_degrees.max(0.0);
        Ok(Self {
            resolver: config.schedule.resolver()?,
            lead_times: config.schedule.lead_times(),
            filter_url: config.filter_url.clone(),
            region: BoundingBox::new(
                window.min_lon - m,
                (window.min_lat - m).max(-90.0),
                window.max_lon + m,
                (window.max_lat + m).min(90.0),
            ),
            raw_dir: raw_dir.into(),
        })
    }

    /// `gfs.t18z.pgrb2.0p25.f006`
    pub fn file_name(cycle: &ForecastCycle, lead_time: u32) -> String {
        format!("gfs.t{}z.pgrb2.0p25.f{:03}", cycle.hour_str(), lead_time)
    }

    /// Filter request for one lead time. Level and variable flags are derived
    /// from the variable map; the filter returns their cross product.
    pub fn url(&self, cycle: &ForecastCycle, lead_time: u32) -> String {
        let mut levels = BTreeSet::new();
        let mut params = BTreeSet::new();
        for mapping in GFS_VARIABLES.fields {
            if let Some((param, level)) = mapping.native.split_once(':') {
                params.insert(param);
                levels.insert(level.replace(' ', "_"));
            }
        }

        let mut query = vec![format!("file={}", Self::file_name(cycle, lead_time))];
        query.extend(levels.iter().map(|l| format!("lev_{}=on", l)));
        query.extend(params.iter().map(|p| format!("var_{}=on", p)));
        query.push("subregion=".to_string());
        query.push(format!("leftlon={}", self.region.min_lon));
        query.push(format!("rightlon={}", self.region.max_lon));
        query.push(format!("toplat={}", self.region.max_lat));
        query.push(format!("bottomlat={}", self.region.min_lat));
        query.push(format!("dir=/gfs.{}/{}/atmos", cycle.date_str(), cycle.hour_str()));

        format!("{}?{}", self.filter_url, query.join("&"))
    }
}

/// One file per lead time, so a file that parses covers its request.
fn validate_grib2(path: &Path, _request: &FetchRequest) -> Result<Coverage, String> {
    let data = std::fs::read(path).map_err(|e| e.to_string())?;
    let messages = Grib2Reader::new(Bytes::from(data))
        .read_all()
        .map_err(|e| e.to_string())?;
    if messages.is_empty() {
        return Err("no GRIB2 messages".to_string());
    }
    Ok(Coverage::Complete)
}

impl SourceAdapter for GfsAdapter {
    fn source(&self) -> SourceId {
        SourceId::Gfs
    }

    fn resolver(&self) -> &CycleResolver {
        &self.resolver
    }

    fn lead_times(&self) -> &[u32] {
        &self.lead_times
    }

    fn format(&self) -> RawFormat {
        RawFormat::Grib2
    }

    fn variable_map(&self) -> &'static VariableMap {
        &GFS_VARIABLES
    }

    fn requests(&self, cycle: &ForecastCycle, lead_times: &[u32]) -> Vec<FetchRequest> {
        lead_times
            .iter()
            .map(|&lead| FetchRequest {
                cycle: *cycle,
                url: self.url(cycle, lead),
                path: raw_file_path(&self.raw_dir, cycle, &Self::file_name(cycle, lead)),
                lead_times: vec![lead],
            })
            .collect()
    }

    fn validator(&self) -> Validator {
        validate_grib2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{scratch_dir, Grib2Builder, Grib2Field};

    fn adapter() -> GfsAdapter {
        GfsAdapter::new(&GfsConfig::default(), &BoundingBox::europe(), "/data/raw").unwrap()
    }

    #[test]
    fn test_filter_url() {
        let cycle = ForecastCycle::parse(SourceId::Gfs, "20250902", 18).unwrap();
        let url = adapter().url(&cycle, 6);

        assert!(url.starts_with("https://nomads.ncep.noaa.gov/cgi-bin/filter_gfs_0p25.pl?file=gfs.t18z.pgrb2.0p25.f006&"));
        for flag in [
            "lev_10_m_above_ground=on",
            "lev_100_m_above_ground=on",
            "lev_2_m_above_ground=on",
            "lev_planetary_boundary_layer=on",
            "lev_entire_atmosphere=on",
            "var_GUST=on",
            "var_TKE=on",
            "var_UGRD=on",
            "leftlon=-15.5",
            "rightlon=40.5",
            "toplat=70.5",
            "bottomlat=34.5",
            "dir=/gfs.20250902/18/atmos",
        ] {
            assert!(url.contains(flag), "{} missing from {}", flag, url);
        }
    }

    #[test]
    fn test_one_request_per_lead_time() {
        let cycle = ForecastCycle::parse(SourceId::Gfs, "20250902", 0).unwrap();
        let requests = adapter().requests(&cycle, &[0, 3, 6]);
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].lead_times, vec![6]);
        assert_eq!(
            requests[2].path,
            PathBuf::from("/data/raw/gfs/20250902/00/gfs.t00z.pgrb2.0p25.f006")
        );
    }

    #[test]
    fn test_schedule() {
        let adapter = adapter();
        assert_eq!(adapter.resolver().cadence(), &[0, 6, 12, 18]);
        assert_eq!(adapter.lead_times().first(), Some(&0));
        assert_eq!(adapter.lead_times().last(), Some(&72));
        assert!(adapter.variable_map().variables().contains(&V::WindGust));
    }

    #[test]
    fn test_validator() {
        let cycle = ForecastCycle::parse(SourceId::Gfs, "20250902", 18).unwrap();
        let request = adapter().requests(&cycle, &[0]).remove(0);
        let dir = scratch_dir();
        let good = dir.path().join("good");
        let bytes = Grib2Builder::new_gfs()
            .with_field(Grib2Field::tmp_2m(vec![280.0; 48]))
            .build();
        std::fs::write(&good, &bytes).unwrap();
        assert_eq!(validate_grib2(&good, &request), Ok(Coverage::Complete));

        let truncated = dir.path().join("truncated");
        std::fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();
        assert!(validate_grib2(&truncated, &request).is_err());

        let html = dir.path().join("html");
        std::fs::write(&html, b"<html>Not Found</html>").unwrap();
        assert!(validate_grib2(&html, &request).is_err());
    }
}
