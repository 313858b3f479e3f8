//! Variable access on top of libnetcdf.

use crate::error::{NetCdfError, NetCdfResult};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Values at or above this magnitude are libnetcdf's default float fill.
const DEFAULT_FILL_MAGNITUDE: f64 = 9.9e36;

/// An open NetCDF file (classic, 64-bit offset or NetCDF-4).
pub struct NetCdfFile {
    path: PathBuf,
    file: netcdf::File,
}

impl std::fmt::Debug for NetCdfFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetCdfFile").field("path", &self.path).finish()
    }
}

impl NetCdfFile {
    pub fn open(path: impl AsRef<Path>) -> NetCdfResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = netcdf::open(&path)?;
        debug!(
            path = %path.display(),
            variables = file.variables().count(),
            "Opened NetCDF file"
        );
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimension_len(&self, name: &str) -> Option<usize> {
        self.file.dimension(name).map(|d| d.len())
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.file.variable(name).is_some()
    }

    fn require(&self, name: &str) -> NetCdfResult<netcdf::Variable<'_>> {
        self.file
            .variable(name)
            .ok_or_else(|| NetCdfError::MissingData(format!("variable '{}'", name)))
    }

    /// Length of each of a variable's dimensions, outermost first.
    pub fn shape(&self, name: &str) -> NetCdfResult<Vec<usize>> {
        let var = self.require(name)?;
        Ok(var.dimensions().iter().map(|d| d.len()).collect())
    }

    pub fn dimension_names(&self, name: &str) -> NetCdfResult<Vec<String>> {
        let var = self.require(name)?;
        Ok(var.dimensions().iter().map(|d| d.name()).collect())
    }

    /// A text attribute of a variable.
    pub fn text_attribute(&self, name: &str, attribute: &str) -> Option<String> {
        let var = self.file.variable(name)?;
        if !has_attr(&var, attribute) {
            return None;
        }
        match var.attribute_value(attribute)?.ok()? {
            netcdf::AttributeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn units(&self, name: &str) -> Option<String> {
        self.text_attribute(name, "units")
    }

    pub fn global_attribute(&self, name: &str) -> Option<String> {
        match self.file.attribute(name)?.value().ok()? {
            netcdf::AttributeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Stored values of a whole variable, converted to f64 without unpacking.
    pub fn read_raw(&self, name: &str) -> NetCdfResult<Vec<f64>> {
        let var = self.require(name)?;
        Ok(var.get_values::<f64, _>(..)?)
    }

    /// Physical values of a whole variable: fill → NaN, then
    /// `value * scale_factor + add_offset`.
    pub fn read_values(&self, name: &str) -> NetCdfResult<Vec<f32>> {
        let var = self.require(name)?;
        let raw = var.get_values::<f64, _>(..)?;
        Ok(Packing::of(&var).unpack(raw))
    }

    /// Physical values of slice `index` along the outermost dimension.
    pub fn read_slice_values(&self, name: &str, index: usize) -> NetCdfResult<Vec<f32>> {
        let var = self.require(name)?;
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let outer = shape.first().copied().unwrap_or(0);
        if index >= outer {
            return Err(NetCdfError::MissingData(format!(
                "slice {} of '{}' ({} along its first dimension)",
                index, name, outer
            )));
        }

        let slice = index..index + 1;
        let raw = match shape.len() {
            1 => vec![var.get_values::<f64, _>(..)?[index]],
            2 => var.get_values::<f64, _>((slice, ..))?,
            3 => var.get_values::<f64, _>((slice, .., ..))?,
            4 => var.get_values::<f64, _>((slice, .., .., ..))?,
            rank => {
                return Err(NetCdfError::InvalidFormat(format!(
                    "'{}' has {} dimensions",
                    name, rank
                )))
            }
        };
        Ok(Packing::of(&var).unpack(raw))
    }
}

/// CF packing attributes of one variable.
struct Packing {
    fill: Option<f64>,
    scale: f64,
    offset: f64,
}

impl Packing {
    fn of(var: &netcdf::Variable) -> Self {
        Self {
            fill: f64_attr(var, "_FillValue").or_else(|| f64_attr(var, "missing_value")),
            scale: f64_attr(var, "scale_factor").unwrap_or(1.0),
            offset: f64_attr(var, "add_offset").unwrap_or(0.0),
        }
    }

    fn unpack(&self, raw: Vec<f64>) -> Vec<f32> {
        raw.into_iter()
            .map(|v| {
                let is_fill = match self.fill {
                    Some(f) => v == f || v as f32 == f as f32,
                    None => v.abs() >= DEFAULT_FILL_MAGNITUDE,
                };
                if is_fill || v.is_nan() {
                    f32::NAN
                } else {
                    (v * self.scale + self.offset) as f32
                }
            })
            .collect()
    }
}

/// Looking up an absent attribute makes HDF5 print to stderr, so check the
/// attribute list first.
fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let value = var.attribute_value(name)?.ok()?;
    f64::try_from(value).ok()
}
