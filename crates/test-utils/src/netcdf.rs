//! Synthetic NetCDF files for reader and adapter tests, written with libnetcdf.

use std::path::Path;

/// Attribute values supported by the builder.
#[derive(Debug, Clone)]
pub enum NcAttr {
    Text(String),
    Short(i16),
    Float(f32),
    Double(f64),
}

impl NcAttr {
    pub fn text(s: &str) -> Self {
        NcAttr::Text(s.to_string())
    }
}

/// Variable payloads, outermost dimension first.
#[derive(Debug, Clone)]
pub enum NcData {
    Short(Vec<i16>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

#[derive(Debug, Clone)]
struct NcVar {
    name: String,
    dims: Vec<String>,
    attrs: Vec<(String, NcAttr)>,
    data: NcData,
}

/// Builds a NetCDF file.
///
/// ```ignore
/// let bytes = NetCdfBuilder::new()
///     .dimension("time", 2)
///     .dimension("y", 2)
///     .dimension("x", 3)
///     .variable("air_temperature_2m", &["time", "y", "x"], NcData::Float(values), vec![])
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct NetCdfBuilder {
    dims: Vec<(String, usize)>,
    global_attrs: Vec<(String, NcAttr)>,
    vars: Vec<NcVar>,
}

impl NetCdfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension(mut self, name: &str, len: usize) -> Self {
        self.dims.push((name.to_string(), len));
        self
    }

    pub fn global_attribute(mut self, name: &str, value: NcAttr) -> Self {
        self.global_attrs.push((name.to_string(), value));
        self
    }

    pub fn variable(mut self, name: &str, dims: &[&str], data: NcData, attrs: Vec<(&str, NcAttr)>) -> Self {
        self.vars.push(NcVar {
            name: name.to_string(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            attrs: attrs.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
            data,
        });
        self
    }

    /// Write the file to `path`, replacing anything already there.
    pub fn write_to(&self, path: &Path) {
        let mut file = netcdf::create(path).unwrap_or_else(|e| panic!("create {}: {}", path.display(), e));

        for (name, len) in &self.dims {
            file.add_dimension(name, *len)
                .unwrap_or_else(|e| panic!("dimension {}: {}", name, e));
        }
        for (name, value) in &self.global_attrs {
            let result = match value {
                NcAttr::Text(s) => file.add_attribute(name, s.as_str()),
                NcAttr::Short(v) => file.add_attribute(name, *v),
                NcAttr::Float(v) => file.add_attribute(name, *v),
                NcAttr::Double(v) => file.add_attribute(name, *v),
            };
            result.unwrap_or_else(|e| panic!("global attribute {}: {}", name, e));
        }

        for var in &self.vars {
            let dims: Vec<&str> = var.dims.iter().map(String::as_str).collect();
            let mut nc_var = match &var.data {
                NcData::Short(_) => file.add_variable::<i16>(&var.name, &dims),
                NcData::Int(_) => file.add_variable::<i32>(&var.name, &dims),
                NcData::Float(_) => file.add_variable::<f32>(&var.name, &dims),
                NcData::Double(_) => file.add_variable::<f64>(&var.name, &dims),
            }
            .unwrap_or_else(|e| panic!("variable {}: {}", var.name, e));

            for (name, value) in &var.attrs {
                let result = match value {
                    NcAttr::Text(s) => nc_var.put_attribute(name, s.as_str()),
                    NcAttr::Short(v) => nc_var.put_attribute(name, *v),
                    NcAttr::Float(v) => nc_var.put_attribute(name, *v),
                    NcAttr::Double(v) => nc_var.put_attribute(name, *v),
                };
                result.unwrap_or_else(|e| panic!("attribute {}:{}: {}", var.name, name, e));
            }

            let result = match &var.data {
                NcData::Short(v) => nc_var.put_values(v, ..),
                NcData::Int(v) => nc_var.put_values(v, ..),
                NcData::Float(v) => nc_var.put_values(v, ..),
                NcData::Double(v) => nc_var.put_values(v, ..),
            };
            result.unwrap_or_else(|e| panic!("values of {}: {}", var.name, e));
        }
    }

    /// Write the file to a scratch location and return its bytes.
    pub fn build(&self) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("scratch dir: {}", e));
        let path = dir.path().join("fixture.nc");
        self.write_to(&path);
        std::fs::read(&path).unwrap_or_else(|e| panic!("read {}: {}", path.display(), e))
    }
}
