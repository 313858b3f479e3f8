//! Append-only, per-cycle Zarr dataset store.
//!
//! Layout under the store root:
//!
//! ```text
//! {root}/{source}/{YYYYMMDD}T{HH}Z.zarr/      one Zarr V3 hierarchy per cycle
//!     zarr.json                                root group
//!     manifest.json                            cell digests, completed lead times
//!     latitude/  longitude/                    coordinate arrays (written once)
//!     {variable}/f{lead:03}/                   one (lat, lon) array per cell
//! {root}/{source}/{YYYYMMDD}T{HH}Z.lock        single-writer lock file
//! ```
//!
//! Cells are staged under `.staging/` and renamed into place; the manifest is
//! the only record of what is complete.

mod dataset;
mod lock;
mod manifest;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nwp_common::{CanonicalGrid, CanonicalVariable, ForecastCycle};
use tracing::{debug, info, instrument};

use crate::config::StoreConfig;
use crate::error::{GridProcessorError, Result};
use crate::types::NormalizedField;
use crate::writer::{Attributes, ZarrWriter};

pub use dataset::ProcessedDataset;
pub use lock::CycleLock;
pub use manifest::{cell_key, digest, CellRecord, Manifest};

const STAGING_DIR: &str = ".staging";

/// What a lead-time write did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeadWriteOutcome {
    /// Cells newly written.
    pub written: usize,
    /// Cells already present with identical content.
    pub unchanged: usize,
}

impl LeadWriteOutcome {
    pub fn is_noop(&self) -> bool {
        self.written == 0
    }
}

/// Filesystem-backed store of processed datasets.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    config: StoreConfig,
    writer: ZarrWriter,
}

impl DatasetStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate().map_err(GridProcessorError::ConfigError)?;
        std::fs::create_dir_all(&config.root)?;
        Ok(Self {
            writer: ZarrWriter::new(config.clone()),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Directory of the cycle's Zarr hierarchy.
    pub fn cycle_path(&self, cycle: &ForecastCycle) -> PathBuf {
        self.config
            .root
            .join(cycle.source.as_str())
            .join(format!("{}.zarr", cycle.storage_key()))
    }

    fn lock_path(&self, cycle: &ForecastCycle) -> PathBuf {
        self.config
            .root
            .join(cycle.source.as_str())
            .join(format!("{}.lock", cycle.storage_key()))
    }

    /// Lead times already durably stored for the cycle (empty if none).
    pub fn completed_lead_times(&self, cycle: &ForecastCycle) -> Result<BTreeSet<u32>> {
        Ok(Manifest::load(&self.cycle_path(cycle))?
            .map(|m| m.complete_lead_times)
            .unwrap_or_default())
    }

    /// Take the cycle's writer lock and prepare its hierarchy.
    ///
    /// Fails fast with `CycleBusy` if another writer holds the cycle, and with
    /// `StoreConflict` if the cycle was stored on a different grid.
    #[instrument(skip_all, fields(cycle = %cycle))]
    pub fn open_writer(&self, cycle: &ForecastCycle, grid: &CanonicalGrid) -> Result<CycleWriter> {
        let lock = CycleLock::acquire(
            &self.lock_path(cycle),
            *cycle,
            Duration::from_secs(self.config.stale_lock_secs),
        )?;

        let path = self.cycle_path(cycle);
        let manifest = match Manifest::load(&path)? {
            Some(existing) => {
                if !same_grid(&existing.grid, grid) {
                    return Err(GridProcessorError::StoreConflict {
                        cycle: cycle.to_string(),
                        cell: format!("coordinates (stored grid '{}')", existing.grid.name),
                    });
                }
                debug!(complete = existing.complete_lead_times.len(), "Resuming stored cycle");
                existing
            }
            None => {
                let manifest = Manifest::new(*cycle, grid.clone(), self.config.zarr_compression.as_str());
                self.initialize(&path, &manifest)?;
                info!(path = %path.display(), shape = ?manifest.shape, "Created cycle store");
                manifest
            }
        };

        Ok(CycleWriter {
            writer: self.writer.clone(),
            path,
            manifest,
            _lock: lock,
        })
    }

    fn initialize(&self, path: &Path, manifest: &Manifest) -> Result<()> {
        let grid = &manifest.grid;
        let mut attrs = Attributes::new();
        attrs.insert("source".to_string(), serde_json::json!(manifest.cycle.source.as_str()));
        attrs.insert("cycle".to_string(), serde_json::json!(manifest.cycle.storage_key()));
        attrs.insert(
            "reference_time".to_string(),
            serde_json::json!(manifest.reference_time.to_rfc3339()),
        );
        attrs.insert("grid".to_string(), serde_json::json!(grid.name));
        attrs.insert(
            "bbox".to_string(),
            serde_json::json!([grid.bbox.min_lon, grid.bbox.min_lat, grid.bbox.max_lon, grid.bbox.max_lat]),
        );
        attrs.insert("resolution".to_string(), serde_json::json!(grid.resolution));
        self.writer.write_group(path, "/", attrs)?;

        for (name, values, units) in [
            ("latitude", grid.latitudes(), "degrees_north"),
            ("longitude", grid.longitudes(), "degrees_east"),
        ] {
            let mut attrs = Attributes::new();
            attrs.insert("units".to_string(), serde_json::json!(units));
            attrs.insert("standard_name".to_string(), serde_json::json!(name));
            attrs.insert("_ARRAY_DIMENSIONS".to_string(), serde_json::json!([name]));
            stage_and_commit(path, name, |dir| self.writer.write_coordinate(dir, &values, attrs))?;
        }

        manifest.save(path)
    }

    /// Store fields of any number of lead times in one locked session.
    pub fn write(
        &self,
        cycle: &ForecastCycle,
        grid: &CanonicalGrid,
        fields: &[NormalizedField],
    ) -> Result<BTreeMap<u32, LeadWriteOutcome>> {
        let mut by_lead: BTreeMap<u32, Vec<&NormalizedField>> = BTreeMap::new();
        for field in fields {
            by_lead.entry(field.lead_time).or_default().push(field);
        }

        let mut writer = self.open_writer(cycle, grid)?;
        let mut outcomes = BTreeMap::new();
        for (lead, fields) in by_lead {
            outcomes.insert(lead, writer.write_lead_time(lead, fields)?);
        }
        Ok(outcomes)
    }

    /// Open a stored cycle for reading.
    pub fn read(&self, cycle: &ForecastCycle) -> Result<ProcessedDataset> {
        let path = self.cycle_path(cycle);
        let manifest = Manifest::load(&path)?
            .ok_or_else(|| GridProcessorError::NotFound(format!("no dataset for {}", cycle)))?;
        ProcessedDataset::open(&path, manifest)
    }
}

/// Exclusive writer for one cycle; releases the lock on drop.
#[derive(Debug)]
pub struct CycleWriter {
    writer: ZarrWriter,
    path: PathBuf,
    manifest: Manifest,
    _lock: CycleLock,
}

impl CycleWriter {
    pub fn cycle(&self) -> ForecastCycle {
        self.manifest.cycle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn completed_lead_times(&self) -> &BTreeSet<u32> {
        &self.manifest.complete_lead_times
    }

    pub fn is_complete(&self, lead_time: u32) -> bool {
        self.manifest.is_complete(lead_time)
    }

    /// Write every field of one lead time, then mark it complete.
    ///
    /// Cells are append-only: identical content is skipped, different content
    /// is a `StoreConflict` and nothing of the lead time is written.
    #[instrument(skip_all, fields(cycle = %self.manifest.cycle, lead_hour = lead_time))]
    pub fn write_lead_time<'a, I>(&mut self, lead_time: u32, fields: I) -> Result<LeadWriteOutcome>
    where
        I: IntoIterator<Item = &'a NormalizedField>,
    {
        let expected = self.manifest.shape.0 * self.manifest.shape.1;
        let mut pending: Vec<(&NormalizedField, String)> = Vec::new();
        let mut outcome = LeadWriteOutcome::default();
        let mut seen: BTreeSet<CanonicalVariable> = BTreeSet::new();

        for field in fields {
            if field.lead_time != lead_time {
                return Err(GridProcessorError::invalid_metadata(format!(
                    "field {} has lead {} in a write for lead {}",
                    field.variable, field.lead_time, lead_time
                )));
            }
            if field.values.len() != expected {
                return Err(GridProcessorError::ShapeMismatch {
                    what: cell_key(field.variable, lead_time),
                    expected,
                    actual: field.values.len(),
                });
            }
            if !seen.insert(field.variable) {
                return Err(GridProcessorError::invalid_metadata(format!(
                    "duplicate {} in lead {}",
                    field.variable, lead_time
                )));
            }

            let sha = digest(&field.values);
            match self.manifest.cell(field.variable, lead_time) {
                Some(existing) if existing.sha256 == sha => outcome.unchanged += 1,
                Some(_) => {
                    return Err(GridProcessorError::StoreConflict {
                        cycle: self.manifest.cycle.to_string(),
                        cell: cell_key(field.variable, lead_time),
                    })
                }
                None => pending.push((field, sha)),
            }
        }

        if pending.is_empty() && self.manifest.is_complete(lead_time) {
            debug!(unchanged = outcome.unchanged, "Lead time already stored");
            return Ok(outcome);
        }

        for (field, sha) in pending {
            self.write_cell(field)?;
            let key = cell_key(field.variable, lead_time);
            self.manifest.cells.insert(
                key,
                CellRecord {
                    variable: field.variable,
                    lead_time,
                    valid_time: self.manifest.cycle.valid_time(lead_time),
                    sha256: sha,
                },
            );
            outcome.written += 1;
        }

        self.manifest.complete_lead_times.insert(lead_time);
        self.manifest.save(&self.path)?;
        debug!(written = outcome.written, unchanged = outcome.unchanged, "Stored lead time");
        Ok(outcome)
    }

    fn write_cell(&self, field: &NormalizedField) -> Result<()> {
        let variable = field.variable;
        let group_meta = self.path.join(variable.name()).join("zarr.json");
        if !group_meta.exists() {
            let mut attrs = Attributes::new();
            attrs.insert("units".to_string(), serde_json::json!(variable.units()));
            attrs.insert("long_name".to_string(), serde_json::json!(variable.long_name()));
            self.writer.write_group(&self.path, &format!("/{}", variable.name()), attrs)?;
        }

        let cycle = self.manifest.cycle;
        let mut attrs = Attributes::new();
        attrs.insert("variable".to_string(), serde_json::json!(variable.name()));
        attrs.insert("units".to_string(), serde_json::json!(variable.units()));
        attrs.insert("long_name".to_string(), serde_json::json!(variable.long_name()));
        attrs.insert("source".to_string(), serde_json::json!(cycle.source.as_str()));
        attrs.insert(
            "reference_time".to_string(),
            serde_json::json!(cycle.reference_time().to_rfc3339()),
        );
        attrs.insert("lead_time".to_string(), serde_json::json!(field.lead_time));
        attrs.insert(
            "valid_time".to_string(),
            serde_json::json!(cycle.valid_time(field.lead_time).to_rfc3339()),
        );
        attrs.insert(
            "_ARRAY_DIMENSIONS".to_string(),
            serde_json::json!(["latitude", "longitude"]),
        );

        let (height, width) = self.manifest.shape;
        stage_and_commit(&self.path, &cell_key(variable, field.lead_time), |dir| {
            self.writer
                .write_field(dir, &field.values, height, width, attrs)
                .map(|_| ())
        })
    }
}

/// Build `rel` in a staging directory, then rename it into the hierarchy.
fn stage_and_commit<F>(root: &Path, rel: &str, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let staging = root.join(STAGING_DIR).join(rel.replace('/', "."));
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    if let Err(e) = write(&staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    let target = root.join(rel);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Leftover from an interrupted run that never reached the manifest.
    if target.exists() {
        std::fs::remove_dir_all(&target)?;
    }
    std::fs::rename(&staging, &target)?;
    // Only succeeds once nothing else is staged.
    let _ = std::fs::remove_dir(root.join(STAGING_DIR));
    Ok(())
}

fn same_grid(a: &CanonicalGrid, b: &CanonicalGrid) -> bool {
    let close = |x: f64, y: f64| (x - y).abs() < 1e-9;
    a.name == b.name
        && close(a.resolution, b.resolution)
        && close(a.bbox.min_lon, b.bbox.min_lon)
        && close(a.bbox.min_lat, b.bbox.min_lat)
        && close(a.bbox.max_lon, b.bbox.max_lon)
        && close(a.bbox.max_lat, b.bbox.max_lat)
}
