//! Pull canonical variables out of validated raw files.
//!
//! A raw file is opened once ([`VariableExtractor::open`]) and then sliced per
//! lead time. Values keep their native grid; only units change here.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use grib2_parser::{Grib2Message, Grib2Reader};
use grid_processor::NativeGrid;
use netcdf_parser::{NetCdfFile, TimeUnits};
use nwp_common::{CanonicalVariable, ForecastCycle};
use tracing::{debug, warn};

use crate::adapter::{RawFormat, RawGridFile, VariableMap};
use crate::error::{IngestionError, Result};

/// Directly contained fields of one lead time, on the native grid.
#[derive(Debug, Clone)]
pub struct ExtractedFields {
    pub lead_time: u32,
    pub grid: Arc<NativeGrid>,
    pub fields: BTreeMap<CanonicalVariable, Vec<f32>>,
    /// Mapped variables the file did not contain.
    pub missing: Vec<CanonicalVariable>,
}

impl ExtractedFields {
    pub fn get(&self, variable: CanonicalVariable) -> Option<&[f32]> {
        self.fields.get(&variable).map(Vec::as_slice)
    }
}

/// A parsed raw file ready for per-lead-time extraction.
pub enum RawContents {
    Grib2 {
        messages: Vec<Grib2Message>,
        grid: Arc<NativeGrid>,
    },
    NetCdf {
        file: NetCdfFile,
        grid: Arc<NativeGrid>,
        /// Lead time → index along the time axis.
        records: BTreeMap<u32, usize>,
    },
}

impl RawContents {
    pub fn grid(&self) -> &Arc<NativeGrid> {
        match self {
            RawContents::Grib2 { grid, .. } | RawContents::NetCdf { grid, .. } => grid,
        }
    }
}

/// Maps native fields onto canonical variables using a source's map.
#[derive(Debug, Clone, Copy)]
pub struct VariableExtractor {
    map: &'static VariableMap,
}

impl VariableExtractor {
    pub fn new(map: &'static VariableMap) -> Self {
        Self { map }
    }

    /// Parse a raw file and its native grid.
    pub fn open(&self, raw: &RawGridFile) -> Result<RawContents> {
        match raw.format {
            RawFormat::Grib2 => open_grib2(raw),
            RawFormat::NetCdf => open_netcdf(raw),
        }
    }

    /// Fields of `lead_time`, converted to canonical units.
    pub fn extract(&self, contents: &RawContents, lead_time: u32) -> Result<ExtractedFields> {
        let grid = contents.grid().clone();
        let (ny, nx) = grid.shape();
        let expected = ny * nx;

        let read: Box<dyn Fn(&str) -> Result<Option<Vec<f32>>> + '_> = match contents {
            RawContents::Grib2 { messages, .. } => Box::new(move |native: &str| -> Result<Option<Vec<f32>>> {
                let Some(msg) = messages.iter().find(|m| m.key() == native) else {
                    return Ok(None);
                };
                if msg.grid_dims() != (ny, nx) {
                    warn!(field = native, dims = ?msg.grid_dims(), "Field on a different grid, skipping");
                    return Ok(None);
                }
                Ok(Some(msg.unpack_data()?))
            }),
            RawContents::NetCdf { file, records, .. } => {
                let record = *records
                    .get(&lead_time)
                    .ok_or_else(|| IngestionError::LeadTimeNotInFile(lead_time, "NetCDF bundle".to_string()))?;
                Box::new(move |native: &str| -> Result<Option<Vec<f32>>> {
                    if !file.has_variable(native) {
                        return Ok(None);
                    }
                    let shape = file.shape(native)?;
                    let per_time: usize = shape.iter().skip(1).product();
                    if per_time != expected {
                        warn!(field = native, shape = ?shape, "Field on a different grid, skipping");
                        return Ok(None);
                    }
                    Ok(Some(file.read_slice_values(native, record)?))
                })
            }
        };

        let mut fields = BTreeMap::new();
        let mut missing = Vec::new();

        for mapping in self.map.fields {
            match read(mapping.native)? {
                Some(mut values) => {
                    mapping.conversion.apply(&mut values);
                    fields.insert(mapping.variable, values);
                }
                None => missing.push(mapping.variable),
            }
        }

        if let Some(polar) = self.map.polar_wind {
            match (read(polar.speed)?, read(polar.direction)?) {
                (Some(speed), Some(direction)) => {
                    let (u, v) = polar_to_components(&speed, &direction);
                    fields.insert(polar.u, u);
                    fields.insert(polar.v, v);
                }
                _ => missing.extend([polar.u, polar.v]),
            }
        }

        missing.sort();
        missing.dedup();
        if !missing.is_empty() {
            debug!(lead_time, missing = ?missing, "Mapped variables absent from raw file");
        }

        Ok(ExtractedFields {
            lead_time,
            grid,
            fields,
            missing,
        })
    }
}

/// Speed and meteorological "from" direction (degrees) to u/v components.
pub fn polar_to_components(speed: &[f32], direction: &[f32]) -> (Vec<f32>, Vec<f32>) {
    speed
        .iter()
        .zip(direction)
        .map(|(&s, &d)| {
            let rad = d.to_radians();
            (-s * rad.sin(), -s * rad.cos())
        })
        .unzip()
}

fn open_grib2(raw: &RawGridFile) -> Result<RawContents> {
    let data = std::fs::read(&raw.path)?;
    let messages = Grib2Reader::new(Bytes::from(data)).read_all()?;
    let first = messages
        .first()
        .ok_or_else(|| IngestionError::Grib2Parse(format!("{}: no messages", raw.path.display())))?;

    let (latitudes, longitudes) = first.coordinates();
    let grid = NativeGrid::Regular { latitudes, longitudes };
    grid.validate()?;

    Ok(RawContents::Grib2 {
        messages,
        grid: Arc::new(grid),
    })
}

fn open_netcdf(raw: &RawGridFile) -> Result<RawContents> {
    let file = NetCdfFile::open(&raw.path)?;
    let grid = netcdf_grid(&file)?;
    grid.validate()?;
    let records = lead_time_records(&file, &raw.cycle)?;

    Ok(RawContents::NetCdf {
        file,
        grid: Arc::new(grid),
        records,
    })
}

fn netcdf_grid(file: &NetCdfFile) -> Result<NativeGrid> {
    let coord = |name: &str| {
        file.shape(name)
            .map_err(|_| IngestionError::NetcdfParse(format!("missing coordinate '{}'", name)))
    };
    let lat = coord("latitude")?;
    let lon = coord("longitude")?;
    let latitudes = file.read_raw("latitude")?;
    let longitudes = file.read_raw("longitude")?;

    match (lat.as_slice(), lon.as_slice()) {
        ([ny, nx], [ny2, nx2]) if (ny, nx) == (ny2, nx2) => Ok(NativeGrid::Curvilinear {
            ny: *ny,
            nx: *nx,
            latitudes,
            longitudes,
        }),
        ([_], [_]) => Ok(NativeGrid::Regular { latitudes, longitudes }),
        (a, b) => Err(IngestionError::NetcdfParse(format!(
            "unsupported coordinate shapes {:?} / {:?}",
            a, b
        ))),
    }
}

/// Whole-hour offsets of the time axis from the cycle's reference time,
/// mapped to their index along the axis.
pub(crate) fn lead_time_records(file: &NetCdfFile, cycle: &ForecastCycle) -> Result<BTreeMap<u32, usize>> {
    let units = file
        .units("time")
        .ok_or_else(|| IngestionError::NetcdfParse("time axis has no units".to_string()))?;
    let units = TimeUnits::parse(&units)?;
    let reference = cycle.reference_time();

    let mut records = BTreeMap::new();
    for (index, value) in file.read_raw("time")?.into_iter().enumerate() {
        let offset = (units.to_datetime(value) - reference).num_seconds();
        if offset >= 0 && offset % 3600 == 0 {
            records.insert((offset / 3600) as u32, index);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{GfsAdapter, MetNordicAdapter, SourceAdapter};
    use crate::config::{GfsConfig, MetNordicConfig};
    use nwp_common::{BoundingBox, SourceId};
    use std::path::Path;
    use test_utils::{
        assert_approx_eq, create_test_grid, create_uniform_wind, scratch_dir, Grib2Builder, Grib2Field, NcAttr,
        NcData, NetCdfBuilder,
    };

    fn gfs_raw(dir: &Path, bytes: &[u8]) -> RawGridFile {
        let path = dir.join("gfs.t18z.pgrb2.0p25.f006");
        std::fs::write(&path, bytes).unwrap();
        RawGridFile {
            cycle: ForecastCycle::parse(SourceId::Gfs, "20250902", 18).unwrap(),
            format: RawFormat::Grib2,
            path,
            lead_times: vec![6],
        }
    }

    fn gfs_extractor() -> VariableExtractor {
        let adapter = GfsAdapter::new(&GfsConfig::default(), &BoundingBox::europe(), "/tmp").unwrap();
        VariableExtractor::new(adapter.variable_map())
    }

    #[test]
    fn test_grib2_extraction_converts_units_and_records_missing() {
        let dir = scratch_dir();
        let (u, v) = create_uniform_wind(8, 6, 10.0, 270.0);
        let bytes = Grib2Builder::new_gfs()
            .with_field(Grib2Field::tmp_2m(vec![283.15; 48]).with_forecast_hour(6))
            .with_field(Grib2Field::ugrd(10, u).with_forecast_hour(6))
            .with_field(Grib2Field::vgrd(10, v).with_forecast_hour(6))
            .with_field(Grib2Field::pres_surface(vec![100_000.0; 48]).with_forecast_hour(6))
            .build();
        let raw = gfs_raw(dir.path(), &bytes);

        let extractor = gfs_extractor();
        let contents = extractor.open(&raw).unwrap();
        let extracted = extractor.extract(&contents, 6).unwrap();

        assert_eq!(extracted.grid.shape(), (6, 8));
        assert_approx_eq!(extracted.get(CanonicalVariable::Temperature2m).unwrap()[0], 10.0, 0.01);
        assert_approx_eq!(extracted.get(CanonicalVariable::SurfacePressure).unwrap()[5], 1000.0, 0.05);
        assert_approx_eq!(extracted.get(CanonicalVariable::WindU10m).unwrap()[0], 10.0, 0.01);

        assert!(extracted.missing.contains(&CanonicalVariable::WindGust));
        assert!(extracted.missing.contains(&CanonicalVariable::TkePbl));
        assert!(!extracted.missing.contains(&CanonicalVariable::Temperature2m));
        assert!(!extracted.fields.contains_key(&CanonicalVariable::WindGust));

        match extracted.grid.as_ref() {
            NativeGrid::Regular { latitudes, longitudes } => {
                assert_eq!(latitudes[0], 70.0);
                assert_eq!(latitudes[5], 68.75);
                assert_eq!(longitudes[0], 345.0);
            }
            other => panic!("unexpected grid {:?}", other),
        }
    }

    #[test]
    fn test_grib2_field_on_other_grid_is_missing() {
        let dir = scratch_dir();
        let small = Grib2Builder::new_gfs()
            .with_grid(4, 3, 70.0, 345.0, 0.25, 0.25)
            .with_field(Grib2Field::gust_surface(vec![12.0; 12]))
            .build();
        let mut bytes = Grib2Builder::new_gfs()
            .with_field(Grib2Field::tmp_2m(vec![280.0; 48]))
            .build();
        bytes.extend(small);
        let raw = gfs_raw(dir.path(), &bytes);

        let extractor = gfs_extractor();
        let extracted = extractor.extract(&extractor.open(&raw).unwrap(), 6).unwrap();
        assert!(extracted.missing.contains(&CanonicalVariable::WindGust));
        assert!(extracted.fields.contains_key(&CanonicalVariable::Temperature2m));
    }

    fn met_nordic_bundle(dir: &Path) -> RawGridFile {
        // 2x3 curvilinear grid, three hourly steps starting at the cycle time
        let lats = vec![59.0, 59.0, 59.1, 59.5, 59.5, 59.6];
        let lons = vec![10.0, 10.5, 11.0, 10.0, 10.5, 11.0];
        let temps: Vec<f32> = (0..18).map(|i| 273.15 + i as f32).collect();
        let speed = vec![5.0f32; 18];
        let direction = vec![180.0f32; 18];
        let cloud: Vec<f32> = create_test_grid(3, 2).iter().chain(&[0.5; 12]).map(|v| v / 1000.0).collect();

        let bytes = NetCdfBuilder::new()
            .dimension("time", 3)
            .dimension("height0", 1)
            .dimension("y", 2)
            .dimension("x", 3)
            .variable(
                "time",
                &["time"],
                NcData::Double(vec![1_756_796_400.0, 1_756_800_000.0, 1_756_803_600.0]),
                vec![("units", NcAttr::text("seconds since 1970-01-01 00:00:00 +00:00"))],
            )
            .variable("latitude", &["y", "x"], NcData::Double(lats), vec![])
            .variable("longitude", &["y", "x"], NcData::Double(lons), vec![])
            .variable("air_temperature_2m", &["time", "height0", "y", "x"], NcData::Float(temps), vec![])
            .variable("wind_speed_10m", &["time", "height0", "y", "x"], NcData::Float(speed), vec![])
            .variable("wind_direction_10m", &["time", "height0", "y", "x"], NcData::Float(direction), vec![])
            .variable("cloud_area_fraction", &["time", "y", "x"], NcData::Float(cloud), vec![])
            .build();

        let path = dir.join("met_forecast_1_0km_nordic_20250902T07Z.nc");
        std::fs::write(&path, bytes).unwrap();
        RawGridFile {
            cycle: ForecastCycle::parse(SourceId::MetNordic, "20250902", 7).unwrap(),
            format: RawFormat::NetCdf,
            path,
            lead_times: vec![0, 1, 2],
        }
    }

    fn met_extractor() -> VariableExtractor {
        let adapter =
            MetNordicAdapter::new(&MetNordicConfig::default(), &BoundingBox::new(5.0, 58.0, 12.0, 64.0), "/tmp")
                .unwrap();
        VariableExtractor::new(adapter.variable_map())
    }

    #[test]
    fn test_netcdf_bundle_lead_times() {
        let dir = scratch_dir();
        let raw = met_nordic_bundle(dir.path());
        let extractor = met_extractor();
        let contents = extractor.open(&raw).unwrap();

        match &contents {
            RawContents::NetCdf { records, grid, .. } => {
                assert_eq!(records.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
                assert!(matches!(grid.as_ref(), NativeGrid::Curvilinear { ny: 2, nx: 3, .. }));
            }
            _ => panic!("expected NetCDF contents"),
        }

        let lead2 = extractor.extract(&contents, 2).unwrap();
        let t = lead2.get(CanonicalVariable::Temperature2m).unwrap();
        assert_approx_eq!(t[0], 12.0, 1e-3);
        assert_approx_eq!(t[5], 17.0, 1e-3);

        assert!(matches!(
            extractor.extract(&contents, 3),
            Err(IngestionError::LeadTimeNotInFile(3, _))
        ));
    }

    #[test]
    fn test_polar_wind_becomes_components() {
        let dir = scratch_dir();
        let raw = met_nordic_bundle(dir.path());
        let extractor = met_extractor();
        let extracted = extractor.extract(&extractor.open(&raw).unwrap(), 0).unwrap();

        // 5 m/s from the south blows northward
        let u = extracted.get(CanonicalVariable::WindU10m).unwrap();
        let v = extracted.get(CanonicalVariable::WindV10m).unwrap();
        assert_approx_eq!(u[0], 0.0, 1e-5);
        assert_approx_eq!(v[0], 5.0, 1e-5);

        let cloud = extracted.get(CanonicalVariable::CloudCover).unwrap();
        assert_approx_eq!(cloud[1], 100.0, 1e-3);

        for absent in [
            CanonicalVariable::WindGust,
            CanonicalVariable::Precip,
            CanonicalVariable::PressureMsl,
            CanonicalVariable::RelativeHumidity2m,
        ] {
            assert!(extracted.missing.contains(&absent), "{} should be missing", absent);
        }
        assert!(!extracted.missing.contains(&CanonicalVariable::WindU10m));
    }

    #[test]
    fn test_polar_to_components() {
        let (u, v) = polar_to_components(&[10.0, 10.0], &[270.0, 0.0]);
        assert_approx_eq!(u[0], 10.0, 1e-5);
        assert_approx_eq!(v[0], 0.0, 1e-5);
        assert_approx_eq!(u[1], 0.0, 1e-5);
        assert_approx_eq!(v[1], -10.0, 1e-5);
    }
}
