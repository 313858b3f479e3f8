//! Per-cycle manifest: grid, cell digests and completed lead times.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use nwp_common::{CanonicalGrid, CanonicalVariable, ForecastCycle};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Record of one stored `(variable, lead_time)` cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    pub variable: CanonicalVariable,
    pub lead_time: u32,
    pub valid_time: DateTime<Utc>,
    pub sha256: String,
}

/// Authoritative index of a cycle's store directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub cycle: ForecastCycle,
    pub reference_time: DateTime<Utc>,
    pub grid: CanonicalGrid,
    /// `(n_lat, n_lon)`.
    pub shape: (usize, usize),
    pub compression: String,
    /// Keyed by [`cell_key`].
    pub cells: BTreeMap<String, CellRecord>,
    pub complete_lead_times: BTreeSet<u32>,
}

impl Manifest {
    pub fn new(cycle: ForecastCycle, grid: CanonicalGrid, compression: &str) -> Self {
        let shape = grid.shape();
        Self {
            cycle,
            reference_time: cycle.reference_time(),
            grid,
            shape,
            compression: compression.to_string(),
            cells: BTreeMap::new(),
            complete_lead_times: BTreeSet::new(),
        }
    }

    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temporary file so readers never see a torn manifest.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    pub fn cell(&self, variable: CanonicalVariable, lead_time: u32) -> Option<&CellRecord> {
        self.cells.get(&cell_key(variable, lead_time))
    }

    pub fn is_complete(&self, lead_time: u32) -> bool {
        self.complete_lead_times.contains(&lead_time)
    }

    /// Variables with at least one cell in a completed lead time.
    pub fn variables(&self) -> BTreeSet<CanonicalVariable> {
        self.cells
            .values()
            .filter(|c| self.is_complete(c.lead_time))
            .map(|c| c.variable)
            .collect()
    }
}

/// Relative array path of a cell inside the cycle hierarchy.
pub fn cell_key(variable: CanonicalVariable, lead_time: u32) -> String {
    format!("{}/f{:03}", variable.name(), lead_time)
}

/// Content digest of a field; all NaN payloads hash alike.
pub fn digest(values: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for v in values {
        let bits = if v.is_nan() { f32::NAN.to_bits() } else { v.to_bits() };
        hasher.update(bits.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nwp_common::{BoundingBox, SourceId};

    #[test]
    fn test_cell_key_format() {
        assert_eq!(cell_key(CanonicalVariable::WindGust, 6), "wind_gust/f006");
        assert_eq!(cell_key(CanonicalVariable::Temperature2m, 120), "temperature_2m/f120");
    }

    #[test]
    fn test_digest_is_content_based() {
        let a = digest(&[1.0, 2.0, f32::NAN]);
        let b = digest(&[1.0, 2.0, -f32::NAN]);
        assert_eq!(a, b);
        assert_ne!(a, digest(&[1.0, 2.0, 3.0]));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_manifest_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cycle = ForecastCycle::parse(SourceId::Gfs, "20250902", 18).unwrap();
        let grid = CanonicalGrid::new("test", BoundingBox::new(0.0, 50.0, 1.0, 51.0), 0.5).unwrap();

        assert!(Manifest::load(dir.path()).unwrap().is_none());

        let mut manifest = Manifest::new(cycle, grid, "blosc_zstd");
        manifest.cells.insert(
            cell_key(CanonicalVariable::WindSpeed10m, 3),
            CellRecord {
                variable: CanonicalVariable::WindSpeed10m,
                lead_time: 3,
                valid_time: cycle.valid_time(3),
                sha256: digest(&[1.0]),
            },
        );
        assert!(manifest.variables().is_empty());
        manifest.complete_lead_times.insert(3);
        manifest.save(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.shape, (3, 3));
        assert!(loaded.variables().contains(&CanonicalVariable::WindSpeed10m));
    }
}
