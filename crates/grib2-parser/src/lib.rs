//! GRIB2 reader (WMO FM 92 GRIB Edition 2) for regular lat/lon model output.
//!
//! [`Grib2Reader`] walks a byte buffer message by message. A message that
//! repeats sections 4-7 yields one [`Grib2Message`] per field, each sharing
//! the identification and grid of its parent.

pub mod sections;
pub mod tables;
pub mod unpacking;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use sections::{
    Bitmap, DataRepresentation, DataSection, GridDefinition, Identification, Indicator,
    ProductDefinition,
};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum Grib2Error {
    #[error("Invalid GRIB2 format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Unsupported template {section}.{template}")]
    UnsupportedTemplate { section: u8, template: u16 },

    #[error("Truncated data at offset {offset}: need {needed} bytes, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unpacking failed: {0}")]
    Unpacking(String),
}

pub type Result<T> = std::result::Result<T, Grib2Error>;

/// Scanning mode flag: points along a parallel run west-ward.
pub const SCAN_I_NEGATIVE: u8 = 0x80;
/// Scanning mode flag: rows run south to north.
pub const SCAN_J_POSITIVE: u8 = 0x40;
/// Scanning mode flag: adjacent points are consecutive in j.
pub const SCAN_J_CONSECUTIVE: u8 = 0x20;
/// Scanning mode flag: alternate rows reverse direction.
pub const SCAN_BOUSTROPHEDON: u8 = 0x10;

/// One decoded field.
#[derive(Debug, Clone)]
pub struct Grib2Message {
    pub indicator: Indicator,
    pub identification: Identification,
    pub grid_definition: GridDefinition,
    pub product_definition: ProductDefinition,
    pub data_representation: DataRepresentation,
    pub bitmap: Option<Bitmap>,
    pub data_section: DataSection,
    /// Complete bytes of the enclosing GRIB message.
    raw: Bytes,
    /// Position of this field among the fields of `raw`.
    field_index: usize,
}

impl Grib2Message {
    pub fn parameter(&self) -> &str {
        &self.product_definition.parameter_short_name
    }

    pub fn level(&self) -> &str {
        &self.product_definition.level_description
    }

    /// wgrib2-style match key, e.g. `UGRD:10 m above ground`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.parameter(), self.level())
    }

    pub fn forecast_hour(&self) -> u32 {
        self.product_definition.forecast_hour
    }

    pub fn valid_time(&self) -> DateTime<Utc> {
        self.identification.reference_time + Duration::hours(self.forecast_hour() as i64)
    }

    /// `(rows, cols)` = `(Nj, Ni)`.
    pub fn grid_dims(&self) -> (usize, usize) {
        (
            self.grid_definition.num_points_latitude as usize,
            self.grid_definition.num_points_longitude as usize,
        )
    }

    /// Latitude of each row and longitude of each column, in file order.
    ///
    /// Longitudes are not wrapped; a global 0..360 grid stays 0..360.
    pub fn coordinates(&self) -> (Vec<f64>, Vec<f64>) {
        let gd = &self.grid_definition;
        let (ny, nx) = self.grid_dims();
        let lat_step = if gd.scanning_mode & SCAN_J_POSITIVE != 0 {
            gd.latitude_increment
        } else {
            -gd.latitude_increment
        };
        let lon_step = if gd.scanning_mode & SCAN_I_NEGATIVE != 0 {
            -gd.longitude_increment
        } else {
            gd.longitude_increment
        };

        let lats = (0..ny).map(|j| gd.first_latitude + j as f64 * lat_step).collect();
        let lons = (0..nx).map(|i| gd.first_longitude + i as f64 * lon_step).collect();
        (lats, lons)
    }

    /// Decode values row-major as `[row][col]` matching [`Self::coordinates`].
    ///
    /// Missing points are NaN.
    pub fn unpack_data(&self) -> Result<Vec<f32>> {
        let (ny, nx) = self.grid_dims();
        let num_points = ny * nx;
        let drs = &self.data_representation;

        let bitmap = match &self.bitmap {
            Some(bm) if bm.indicator == 0 => Some(bm.data.as_ref()),
            Some(bm) if bm.indicator == 255 => None,
            Some(bm) => {
                return Err(Grib2Error::InvalidSection {
                    section: 6,
                    reason: format!("predefined bitmap {} not supported", bm.indicator),
                })
            }
            None => None,
        };

        let values = match drs.template_number {
            0 => unpacking::unpack_simple(
                &self.data_section.data,
                num_points,
                drs.bits_per_value,
                drs.reference_value,
                drs.binary_scale_factor,
                drs.decimal_scale_factor,
                bitmap,
            )?,
            other => {
                debug!(template = other, "Decoding packed field with grib crate");
                self.unpack_with_grib_crate()?
            }
        };

        if values.len() != num_points {
            return Err(Grib2Error::Unpacking(format!(
                "decoded {} values for a {}x{} grid",
                values.len(),
                ny,
                nx
            )));
        }

        self.reorder_rows(values)
    }

    fn unpack_with_grib_crate(&self) -> Result<Vec<f32>> {
        let grib_file = grib::from_reader(Cursor::new(self.raw.to_vec()))
            .map_err(|e| Grib2Error::Unpacking(format!("grib crate: {:?}", e)))?;
        let (_, submsg) = grib_file
            .iter()
            .nth(self.field_index)
            .ok_or_else(|| Grib2Error::Unpacking(format!("field {} not found", self.field_index)))?;
        let decoder = grib::Grib2SubmessageDecoder::from(submsg)
            .map_err(|e| Grib2Error::Unpacking(format!("grib crate: {}", e)))?;
        let values = decoder
            .dispatch()
            .map_err(|e| Grib2Error::Unpacking(format!("grib crate: {}", e)))?;
        Ok(values.collect())
    }

    /// Turn j-consecutive scans into row-major order.
    fn reorder_rows(&self, values: Vec<f32>) -> Result<Vec<f32>> {
        let mode = self.grid_definition.scanning_mode;
        if mode & SCAN_BOUSTROPHEDON != 0 {
            return Err(Grib2Error::InvalidSection {
                section: 3,
                reason: format!("boustrophedonic scanning mode {:#04x}", mode),
            });
        }
        if mode & SCAN_J_CONSECUTIVE == 0 {
            return Ok(values);
        }

        let (ny, nx) = self.grid_dims();
        let mut rows = vec![f32::NAN; values.len()];
        for i in 0..nx {
            for j in 0..ny {
                rows[j * nx + i] = values[i * ny + j];
            }
        }
        Ok(rows)
    }
}

/// Sequential reader over a buffer of concatenated GRIB2 messages.
pub struct Grib2Reader {
    data: Bytes,
    offset: usize,
    pending: Vec<Grib2Message>,
}

impl Grib2Reader {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            offset: 0,
            pending: Vec::new(),
        }
    }

    /// Next field, or `None` at end of buffer.
    pub fn next_message(&mut self) -> Result<Option<Grib2Message>> {
        if let Some(msg) = self.pending.pop() {
            return Ok(Some(msg));
        }

        let Some(start) = self.find_next_message() else {
            self.offset = self.data.len();
            return Ok(None);
        };

        let indicator = sections::parse_indicator(&self.data[start..])?;
        let len = indicator.message_length as usize;
        if start + len > self.data.len() {
            return Err(Grib2Error::Truncated {
                offset: start,
                needed: len,
                available: self.data.len() - start,
            });
        }
        let raw = self.data.slice(start..start + len);
        self.offset = start + len;

        let mut fields = parse_message(raw, indicator)?;
        // pending is popped from the back
        fields.reverse();
        self.pending = fields;
        Ok(self.pending.pop())
    }

    /// Read every field in the buffer.
    pub fn read_all(mut self) -> Result<Vec<Grib2Message>> {
        let mut out = Vec::new();
        while let Some(msg) = self.next_message()? {
            out.push(msg);
        }
        Ok(out)
    }

    fn find_next_message(&self) -> Option<usize> {
        self.data[self.offset..]
            .windows(4)
            .position(|w| w == b"GRIB")
            .map(|p| self.offset + p)
    }
}

fn parse_message(raw: Bytes, indicator: Indicator) -> Result<Vec<Grib2Message>> {
    if raw.len() < 20 || &raw[raw.len() - 4..] != b"7777" {
        return Err(Grib2Error::InvalidFormat("missing end section 7777".to_string()));
    }

    let mut identification = None;
    let mut grid = None;
    let mut product = None;
    let mut drs = None;
    let mut bitmap: Option<Bitmap> = None;
    let mut fields = Vec::new();

    let body_end = raw.len() - 4;
    let mut offset = 16;
    while offset < body_end {
        let (len, number) = sections::section_header(&raw[offset..body_end], offset)?;
        let sec = &raw[offset..offset + len];

        match number {
            1 => identification = Some(sections::parse_identification(sec)?),
            2 => {}
            3 => grid = Some(sections::parse_grid_definition(sec)?),
            4 => product = Some(sections::parse_product_definition(sec, indicator.discipline)?),
            5 => drs = Some(sections::parse_data_representation(sec)?),
            6 => {
                let parsed = sections::parse_bitmap(sec)?;
                // 254: reuse the previous bitmap of this message
                if parsed.indicator != 254 {
                    bitmap = Some(parsed);
                }
            }
            7 => {
                let missing = |name: &str| Grib2Error::InvalidFormat(format!("data section before {}", name));
                fields.push(Grib2Message {
                    indicator: indicator.clone(),
                    identification: identification.clone().ok_or_else(|| missing("section 1"))?,
                    grid_definition: grid.clone().ok_or_else(|| missing("section 3"))?,
                    product_definition: product.clone().ok_or_else(|| missing("section 4"))?,
                    data_representation: drs.clone().ok_or_else(|| missing("section 5"))?,
                    bitmap: bitmap.clone(),
                    data_section: sections::parse_data_section(sec)?,
                    raw: raw.clone(),
                    field_index: fields.len(),
                });
            }
            other => {
                return Err(Grib2Error::InvalidSection {
                    section: other,
                    reason: format!("unexpected section number at offset {}", offset),
                })
            }
        }
        offset += len;
    }

    if fields.is_empty() {
        return Err(Grib2Error::InvalidFormat("message has no data section".to_string()));
    }
    Ok(fields)
}
