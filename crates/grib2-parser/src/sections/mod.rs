//! GRIB2 section parsing.
//!
//! Every parser receives the bytes of exactly one section, starting at its
//! 4-byte length field. Octet positions in the comments are 1-based as in
//! the WMO manual; slice indices are 0-based.

use crate::tables::{level_description, parameter_short_name};
use crate::Grib2Error;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub table_version: u8,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
}

/// Section 3: Grid Definition Section, template 3.0 (regular lat/lon)
#[derive(Debug, Clone, PartialEq)]
pub struct GridDefinition {
    pub template_number: u16,
    pub num_points_longitude: u32,
    pub num_points_latitude: u32,
    /// Degrees; GRIB2 stores microdegrees.
    pub first_latitude: f64,
    pub first_longitude: f64,
    pub last_latitude: f64,
    pub last_longitude: f64,
    pub longitude_increment: f64,
    pub latitude_increment: f64,
    pub scanning_mode: u8,
}

/// Section 4: Product Definition Section
#[derive(Debug, Clone)]
pub struct ProductDefinition {
    pub template_number: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    pub parameter_short_name: String,
    pub level_type: u8,
    pub level_value: f64,
    pub level_description: String,
    /// Forecast time converted to hours.
    pub forecast_hour: u32,
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone)]
pub struct DataRepresentation {
    pub num_data_points: u32,
    pub template_number: u16,
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
}

/// Section 6: Bitmap Section
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub indicator: u8,
    pub data: Bytes,
}

/// Section 7: Data Section
#[derive(Debug, Clone)]
pub struct DataSection {
    pub data: Bytes,
}

/// Length and number of the section starting at `data[0]`.
pub fn section_header(data: &[u8], offset: usize) -> Result<(usize, u8), Grib2Error> {
    if data.len() < 5 {
        return Err(Grib2Error::Truncated {
            offset,
            needed: 5,
            available: data.len(),
        });
    }
    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length < 5 || length > data.len() {
        return Err(Grib2Error::InvalidFormat(format!(
            "section at offset {} declares length {} with {} bytes left",
            offset,
            length,
            data.len()
        )));
    }
    Ok((length, data[4]))
}

/// Parse Section 0 (Indicator) from start of message
pub fn parse_indicator(data: &[u8]) -> Result<Indicator, Grib2Error> {
    if data.len() < 16 {
        return Err(Grib2Error::Truncated {
            offset: 0,
            needed: 16,
            available: data.len(),
        });
    }
    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat("invalid GRIB magic bytes".to_string()));
    }

    // Octet 7: discipline, octet 8: edition, octets 9-16: total length
    let discipline = data[6];
    let edition = data[7];
    if edition != 2 {
        return Err(Grib2Error::InvalidFormat(format!(
            "expected GRIB edition 2, got {}",
            edition
        )));
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&data[8..16]);

    Ok(Indicator {
        discipline,
        edition,
        message_length: u64::from_be_bytes(len),
    })
}

/// Parse Section 1 (Identification)
pub fn parse_identification(sec: &[u8]) -> Result<Identification, Grib2Error> {
    require(sec, 1, 19)?;

    let center = read_u16(sec, 5);
    let sub_center = read_u16(sec, 7);
    let table_version = sec[9];
    let significance_of_reference_time = sec[11];
    let year = read_u16(sec, 12);
    let (month, day, hour, minute, second) = (sec[14], sec[15], sec[16], sec[17], sec[18]);

    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| Grib2Error::InvalidSection {
            section: 1,
            reason: format!(
                "invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })?;

    Ok(Identification {
        center,
        sub_center,
        table_version,
        significance_of_reference_time,
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
    })
}

/// Parse Section 3 (Grid Definition). Only template 3.0 is supported.
pub fn parse_grid_definition(sec: &[u8]) -> Result<GridDefinition, Grib2Error> {
    require(sec, 3, 14)?;
    let template_number = read_u16(sec, 12);
    if template_number != 0 {
        return Err(Grib2Error::UnsupportedTemplate {
            section: 3,
            template: template_number,
        });
    }

    // Template 3.0 body starts at octet 15
    require(sec, 3, 72)?;
    let gd = &sec[14..];
    let ni = read_u32(gd, 16);
    let nj = read_u32(gd, 20);
    let la1 = read_signed_u32(gd, 32);
    let lo1 = read_signed_u32(gd, 36);
    let la2 = read_signed_u32(gd, 41);
    let lo2 = read_signed_u32(gd, 45);
    let di = read_u32(gd, 49);
    let dj = read_u32(gd, 53);
    let scanning_mode = gd[57];

    if ni == 0 || nj == 0 {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: format!("degenerate grid {}x{}", ni, nj),
        });
    }

    Ok(GridDefinition {
        template_number,
        num_points_longitude: ni,
        num_points_latitude: nj,
        first_latitude: micro(la1),
        first_longitude: micro(lo1),
        last_latitude: micro(la2),
        last_longitude: micro(lo2),
        longitude_increment: di as f64 / 1e6,
        latitude_increment: dj as f64 / 1e6,
        scanning_mode,
    })
}

/// Product templates sharing the 4.0 layout up to the first fixed surface.
const HORIZONTAL_PRODUCT_TEMPLATES: [u16; 6] = [0, 1, 2, 8, 11, 12];

/// Parse Section 4 (Product Definition)
pub fn parse_product_definition(
    sec: &[u8],
    discipline: u8,
) -> Result<ProductDefinition, Grib2Error> {
    require(sec, 4, 34)?;
    let template_number = read_u16(sec, 7);
    if !HORIZONTAL_PRODUCT_TEMPLATES.contains(&template_number) {
        return Err(Grib2Error::UnsupportedTemplate {
            section: 4,
            template: template_number,
        });
    }

    let parameter_category = sec[9];
    let parameter_number = sec[10];
    let time_unit = sec[17];
    let forecast_time = read_u32(sec, 18);
    let level_type = sec[22];
    let level_scale = sign_magnitude_i8(sec[23]);
    let level_scaled_value = read_signed_u32(sec, 24);

    let level_value = if level_scaled_value == i32::MAX || sec[23] == 0xFF {
        0.0
    } else {
        level_scaled_value as f64 / 10f64.powi(level_scale as i32)
    };

    let forecast_hour = forecast_time_hours(time_unit, forecast_time).ok_or_else(|| {
        Grib2Error::InvalidSection {
            section: 4,
            reason: format!("unsupported forecast time unit {}", time_unit),
        }
    })?;

    Ok(ProductDefinition {
        template_number,
        parameter_category,
        parameter_number,
        parameter_short_name: parameter_short_name(discipline, parameter_category, parameter_number),
        level_type,
        level_value,
        level_description: level_description(level_type, level_value),
        forecast_hour,
    })
}

/// Parse Section 5 (Data Representation)
pub fn parse_data_representation(sec: &[u8]) -> Result<DataRepresentation, Grib2Error> {
    require(sec, 5, 11)?;
    let num_data_points = read_u32(sec, 5);
    let template_number = read_u16(sec, 9);

    // Templates 5.0, 5.2, 5.3, 5.40, 5.41 share octets 12-20
    let (reference_value, binary_scale_factor, decimal_scale_factor, bits_per_value) =
        if sec.len() >= 21 {
            (
                f32::from_be_bytes([sec[11], sec[12], sec[13], sec[14]]),
                read_signed_u16(sec, 15),
                read_signed_u16(sec, 17),
                sec[19],
            )
        } else {
            (0.0, 0, 0, 0)
        };

    Ok(DataRepresentation {
        num_data_points,
        template_number,
        reference_value,
        binary_scale_factor,
        decimal_scale_factor,
        bits_per_value,
    })
}

/// Parse Section 6 (Bitmap)
pub fn parse_bitmap(sec: &[u8]) -> Result<Bitmap, Grib2Error> {
    require(sec, 6, 6)?;
    Ok(Bitmap {
        indicator: sec[5],
        data: Bytes::copy_from_slice(&sec[6..]),
    })
}

/// Parse Section 7 (Data)
pub fn parse_data_section(sec: &[u8]) -> Result<DataSection, Grib2Error> {
    require(sec, 7, 5)?;
    Ok(DataSection {
        data: Bytes::copy_from_slice(&sec[5..]),
    })
}

fn forecast_time_hours(unit: u8, value: u32) -> Option<u32> {
    match unit {
        0 => Some(value / 60),
        1 => Some(value),
        2 => Some(value * 24),
        10 => Some(value * 3),
        11 => Some(value * 6),
        12 => Some(value * 12),
        13 => Some(value / 3600),
        _ => None,
    }
}

fn require(sec: &[u8], section: u8, len: usize) -> Result<(), Grib2Error> {
    if sec.len() < len {
        return Err(Grib2Error::InvalidSection {
            section,
            reason: format!("needs at least {} bytes, got {}", len, sec.len()),
        });
    }
    Ok(())
}

fn micro(value: i32) -> f64 {
    value as f64 / 1e6
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// GRIB2 signed integers are sign-magnitude, not two's complement.
fn read_signed_u16(data: &[u8], at: usize) -> i16 {
    let raw = read_u16(data, at);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn read_signed_u32(data: &[u8], at: usize) -> i32 {
    let raw = read_u32(data, at);
    if raw == u32::MAX {
        return i32::MAX;
    }
    let magnitude = (raw & 0x7FFF_FFFF) as i32;
    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn sign_magnitude_i8(raw: u8) -> i8 {
    let magnitude = (raw & 0x7F) as i8;
    if raw & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_magnitude() {
        assert_eq!(read_signed_u16(&[0x80, 0x05], 0), -5);
        assert_eq!(read_signed_u16(&[0x00, 0x05], 0), 5);
        assert_eq!(read_signed_u32(&[0x80, 0x00, 0x00, 0x0A], 0), -10);
        assert_eq!(sign_magnitude_i8(0x81), -1);
    }

    #[test]
    fn test_indicator_rejects_edition_1() {
        let mut data = b"GRIB".to_vec();
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&[0u8; 8]);
        assert!(parse_indicator(&data).is_err());
    }

    #[test]
    fn test_forecast_time_units() {
        assert_eq!(forecast_time_hours(1, 6), Some(6));
        assert_eq!(forecast_time_hours(0, 180), Some(3));
        assert_eq!(forecast_time_hours(13, 7200), Some(2));
        assert_eq!(forecast_time_hours(99, 1), None);
    }

    #[test]
    fn test_section_header_bounds() {
        let sec = [0, 0, 0, 9, 3];
        assert!(section_header(&sec, 0).is_err());
        let sec = [0, 0, 0, 5, 7];
        assert_eq!(section_header(&sec, 0).unwrap(), (5, 7));
    }
}
