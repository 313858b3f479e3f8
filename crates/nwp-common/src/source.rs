//! Identifiers of the upstream model sources.

use crate::CommonError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of upstream NWP sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// NCEP GFS, global 0.25° GRIB2 output.
    Gfs,
    /// MET Norway MET Nordic / MEPS regional NetCDF output.
    MetNordic,
}

impl SourceId {
    pub const ALL: [SourceId; 2] = [SourceId::Gfs, SourceId::MetNordic];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Gfs => "gfs",
            SourceId::MetNordic => "met_nordic",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gfs" => Ok(SourceId::Gfs),
            "met_nordic" | "met-nordic" | "metnordic" => Ok(SourceId::MetNordic),
            other => Err(CommonError::UnknownSource(other.to_string())),
        }
    }
}
