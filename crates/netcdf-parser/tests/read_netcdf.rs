//! Reader tests against synthetic NetCDF files.

use netcdf_parser::{NetCdfError, NetCdfFile, TimeUnits};
use test_utils::{scratch_dir, NcAttr, NcData, NetCdfBuilder};

fn met_nordic_like() -> NetCdfBuilder {
    // 2 lead times, 1 height level, 2x3 grid
    let temps: Vec<f32> = (0..12).map(|i| 270.0 + i as f32).collect();
    let packed_wind: Vec<i16> = vec![10, 20, 30, 40, 50, -1, 11, 21, 31, 41, 51, 61];

    NetCdfBuilder::new()
        .dimension("time", 2)
        .dimension("height0", 1)
        .dimension("y", 2)
        .dimension("x", 3)
        .global_attribute("title", NcAttr::text("MET Nordic forecast"))
        .variable(
            "time",
            &["time"],
            NcData::Double(vec![1_756_836_000.0, 1_756_839_600.0]),
            vec![("units", NcAttr::text("seconds since 1970-01-01 00:00:00 +00:00"))],
        )
        .variable(
            "latitude",
            &["y", "x"],
            NcData::Double(vec![59.0, 59.0, 59.0, 60.0, 60.0, 60.0]),
            vec![("units", NcAttr::text("degrees_north"))],
        )
        .variable(
            "air_temperature_2m",
            &["time", "height0", "y", "x"],
            NcData::Float(temps),
            vec![("units", NcAttr::text("K"))],
        )
        .variable(
            "wind_speed_10m",
            &["time", "height0", "y", "x"],
            NcData::Short(packed_wind),
            vec![
                ("units", NcAttr::text("m/s")),
                ("scale_factor", NcAttr::Float(0.1)),
                ("add_offset", NcAttr::Float(0.0)),
                ("_FillValue", NcAttr::Short(-1)),
            ],
        )
}

fn open(builder: &NetCdfBuilder) -> (tempfile::TempDir, NetCdfFile) {
    let dir = scratch_dir();
    let path = dir.path().join("bundle.nc");
    builder.write_to(&path);
    let nc = NetCdfFile::open(&path).unwrap();
    (dir, nc)
}

#[test]
fn test_header() {
    let (_dir, nc) = open(&met_nordic_like());
    assert_eq!(nc.dimension_len("time"), Some(2));
    assert_eq!(nc.global_attribute("title").as_deref(), Some("MET Nordic forecast"));

    assert!(nc.has_variable("air_temperature_2m"));
    assert!(!nc.has_variable("longitude"));
    assert_eq!(nc.shape("air_temperature_2m").unwrap(), vec![2, 1, 2, 3]);
    assert_eq!(nc.units("air_temperature_2m").as_deref(), Some("K"));
    assert_eq!(
        nc.dimension_names("air_temperature_2m").unwrap(),
        vec!["time", "height0", "y", "x"]
    );
}

#[test]
fn test_slices_along_time() {
    let (_dir, nc) = open(&met_nordic_like());

    let first = nc.read_slice_values("air_temperature_2m", 0).unwrap();
    let second = nc.read_slice_values("air_temperature_2m", 1).unwrap();
    assert_eq!(first, vec![270.0, 271.0, 272.0, 273.0, 274.0, 275.0]);
    assert_eq!(second, vec![276.0, 277.0, 278.0, 279.0, 280.0, 281.0]);

    assert_eq!(nc.read_values("air_temperature_2m").unwrap().len(), 12);
}

#[test]
fn test_packed_shorts_are_scaled_and_filled() {
    let (_dir, nc) = open(&met_nordic_like());
    let wind = nc.read_slice_values("wind_speed_10m", 0).unwrap();
    assert!((wind[0] - 1.0).abs() < 1e-6);
    assert!((wind[4] - 5.0).abs() < 1e-6);
    assert!(wind[5].is_nan());

    let wind = nc.read_slice_values("wind_speed_10m", 1).unwrap();
    assert!((wind[5] - 6.1).abs() < 1e-5);
}

#[test]
fn test_time_coordinate() {
    let (_dir, nc) = open(&met_nordic_like());
    let units = TimeUnits::parse(&nc.units("time").unwrap()).unwrap();
    let times: Vec<String> = nc
        .read_raw("time")
        .unwrap()
        .into_iter()
        .map(|t| units.to_datetime(t).to_rfc3339())
        .collect();
    assert_eq!(
        times,
        vec!["2025-09-02T18:00:00+00:00", "2025-09-02T19:00:00+00:00"]
    );
}

#[test]
fn test_coordinate_variable() {
    let (_dir, nc) = open(&met_nordic_like());
    let lat = nc.read_raw("latitude").unwrap();
    assert_eq!(lat, vec![59.0, 59.0, 59.0, 60.0, 60.0, 60.0]);
}

#[test]
fn test_missing_variable_and_slice() {
    let (_dir, nc) = open(&met_nordic_like());
    assert!(matches!(nc.read_values("wind_speed_of_gust"), Err(NetCdfError::MissingData(_))));
    assert!(matches!(
        nc.read_slice_values("air_temperature_2m", 5),
        Err(NetCdfError::MissingData(_))
    ));
}

#[test]
fn test_three_dimensional_field() {
    let builder = NetCdfBuilder::new()
        .dimension("time", 2)
        .dimension("y", 1)
        .dimension("x", 2)
        .variable(
            "precipitation_amount",
            &["time", "y", "x"],
            NcData::Float(vec![0.0, 0.5, 1.0, 1.5]),
            vec![],
        );
    let (_dir, nc) = open(&builder);

    assert_eq!(nc.read_slice_values("precipitation_amount", 1).unwrap(), vec![1.0, 1.5]);
    assert!(nc.read_slice_values("precipitation_amount", 2).is_err());
}

#[test]
fn test_not_a_netcdf_file() {
    let dir = scratch_dir();
    let path = dir.path().join("error.nc");
    std::fs::write(&path, b"<html>Service unavailable</html>").unwrap();
    assert!(matches!(NetCdfFile::open(&path), Err(NetCdfError::Netcdf(_))));
}

#[test]
fn test_truncated_file_is_rejected() {
    let bytes = met_nordic_like().build();
    let dir = scratch_dir();
    let path = dir.path().join("short.nc");
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let readable = NetCdfFile::open(&path).and_then(|nc| nc.read_values("wind_speed_10m"));
    assert!(readable.is_err());
}
