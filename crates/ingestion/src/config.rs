//! Pipeline configuration.
//!
//! Loaded from YAML, then environment overrides, then validated:
//!
//! ```ignore
//! let mut config = PipelineConfig::load("config/pipeline.yaml")?;
//! config.apply_env_overrides();
//! config.validate()?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use grid_processor::{InterpolationMethod, StoreConfig};
use nwp_common::{BoundingBox, CanonicalGrid, CommonResult, CycleResolver, SourceId};
use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, Result};

/// Root configuration threaded through the orchestrator and adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub grid: GridConfig,
    pub store: StoreSection,
    pub retry: RetryConfig,
    pub gust: GustConfig,
    pub concurrency: ConcurrencyConfig,
    pub sources: SourcesConfig,
}

/// Canonical output grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Grid name; also used as the bbox when `bbox` is not given.
    pub name: String,
    /// `"min_lon,min_lat,max_lon,max_lat"` or a named window.
    pub bbox: Option<String>,
    /// Target spacing in degrees.
    pub resolution: f64,
    pub interpolation: InterpolationMethod,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            name: "europe".to_string(),
            bbox: None,
            resolution: 0.25,
            interpolation: InterpolationMethod::Bilinear,
        }
    }
}

impl GridConfig {
    pub fn bounding_box(&self) -> CommonResult<BoundingBox> {
        self.bbox.as_deref().unwrap_or(&self.name).parse()
    }

    pub fn canonical_grid(&self) -> CommonResult<CanonicalGrid> {
        CanonicalGrid::new(self.name.clone(), self.bounding_box()?, self.resolution)
    }
}

/// Processed store plus the raw download cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    #[serde(flatten)]
    pub zarr: StoreConfig,
    /// Root of `raw/{source}/{YYYYMMDD}/{HH}/`.
    pub raw_dir: PathBuf,
    /// Keep raw files after their lead times are stored.
    pub retain_raw_files: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            zarr: StoreConfig::default(),
            raw_dir: PathBuf::from("./data/raw"),
            retain_raw_files: false,
        }
    }
}

/// Bounded exponential backoff for fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt (doubles each retry).
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
            request_timeout_secs: 300,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Constants of the gust fallback tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GustConfig {
    /// β in `speed + β·sqrt(tke)`.
    pub beta: f32,
    /// G in `speed × G`.
    pub factor: f32,
}

impl Default for GustConfig {
    fn default() -> Self {
        Self { beta: 2.0, factor: 1.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Sources processed at the same time.
    pub parallel_sources: usize,
    /// In-flight downloads per source.
    pub concurrent_fetches: usize,
    /// Soft timeout per source cycle; completed lead times are kept.
    pub cycle_timeout_secs: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            parallel_sources: 2,
            concurrent_fetches: 4,
            cycle_timeout_secs: 90 * 60,
        }
    }
}

impl ConcurrencyConfig {
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}

/// When a source runs and which lead times it publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Nominal run hours (UTC).
    pub cadence: Vec<u8>,
    /// Minutes after the nominal run time until output is reliably published.
    pub latency_minutes: i64,
    pub lead_time_start: u32,
    pub lead_time_end: u32,
    pub lead_time_step: u32,
}

impl ScheduleConfig {
    /// Configured lead times, ascending.
    pub fn lead_times(&self) -> Vec<u32> {
        (self.lead_time_start..=self.lead_time_end)
            .step_by(self.lead_time_step.max(1) as usize)
            .collect()
    }

    pub fn resolver(&self) -> CommonResult<CycleResolver> {
        CycleResolver::new(&self.cadence, self.latency_minutes)
    }

    fn validate(&self, source: SourceId) -> std::result::Result<(), String> {
        if self.lead_time_step == 0 {
            return Err(format!("{}: lead_time_step must be > 0", source));
        }
        if self.lead_time_start > self.lead_time_end {
            return Err(format!("{}: lead_time_start after lead_time_end", source));
        }
        self.resolver().map_err(|e| format!("{}: {}", source, e))?;
        Ok(())
    }
}

/// NOAA GFS through the NOMADS GRIB filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GfsConfig {
    #[serde(flatten)]
    pub schedule: ScheduleConfig,
    /// Filter CGI endpoint; query parameters are appended.
    pub filter_url: String,
    /// Extra degrees requested around the grid window so edge cells interpolate.
    pub margin_degrees: f64,
}

impl Default for GfsConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig {
                enabled: true,
                cadence: vec![0, 6, 12, 18],
                latency_minutes: 300,
                lead_time_start: 0,
                lead_time_end: 72,
                lead_time_step: 3,
            },
            filter_url: "https://nomads.ncep.noaa.gov/cgi-bin/filter_gfs_0p25.pl".to_string(),
            margin_degrees: 0.5,
        }
    }
}

/// MET Norway MET Nordic through THREDDS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetNordicConfig {
    #[serde(flatten)]
    pub schedule: ScheduleConfig,
    /// URL with `{year} {month} {day} {date} {hour}` and
    /// `{north} {south} {east} {west} {vars}` placeholders.
    pub url_template: String,
}

impl Default for MetNordicConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig {
                enabled: true,
                cadence: (0..24).collect(),
                latency_minutes: 90,
                lead_time_start: 0,
                lead_time_end: 60,
                lead_time_step: 1,
            },
            url_template: concat!(
                "https://thredds.met.no/thredds/ncss/grid/metpparchive/{year}/{month}/{day}/",
                "met_forecast_1_0km_nordic_{date}T{hour}Z.nc",
                "?{vars}&north={north}&south={south}&east={east}&west={west}",
                "&horizStride=1&addLatLon=true&accept=netcdf3"
            )
            .to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub gfs: GfsConfig,
    pub met_nordic: MetNordicConfig,
}

impl SourcesConfig {
    pub fn schedule(&self, source: SourceId) -> &ScheduleConfig {
        match source {
            SourceId::Gfs => &self.gfs.schedule,
            SourceId::MetNordic => &self.met_nordic.schedule,
        }
    }

    /// Enabled sources in declaration order.
    pub fn enabled(&self) -> Vec<SourceId> {
        SourceId::ALL
            .into_iter()
            .filter(|s| self.schedule(*s).enabled)
            .collect()
    }
}

impl PipelineConfig {
    /// Parse a YAML configuration file. Missing sections take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
            .map_err(|e| IngestionError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Override fields from environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        self.store.zarr.apply_env_overrides();

        if let Ok(val) = std::env::var("PIPELINE_RAW_DIR") {
            self.store.raw_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PIPELINE_RETAIN_RAW_FILES") {
            self.store.retain_raw_files = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("PIPELINE_GRID_BBOX") {
            self.grid.bbox = Some(val);
        }

        if let Ok(val) = std::env::var("PIPELINE_GRID_RESOLUTION") {
            if let Ok(res) = val.parse() {
                self.grid.resolution = res;
            }
        }

        if let Ok(val) = std::env::var("PIPELINE_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.retry.max_attempts = n;
            }
        }

        if let Ok(val) = std::env::var("PIPELINE_CYCLE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.concurrency.cycle_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("PIPELINE_CONCURRENT_FETCHES") {
            if let Ok(n) = val.parse() {
                self.concurrency.concurrent_fetches = n;
            }
        }

        if let Ok(val) = std::env::var("GFS_FILTER_URL") {
            self.sources.gfs.filter_url = val;
        }

        if let Ok(val) = std::env::var("MET_NORDIC_URL_TEMPLATE") {
            self.sources.met_nordic.url_template = val;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let invalid = IngestionError::InvalidConfig;

        self.grid.canonical_grid().map_err(|e| invalid(e.to_string()))?;
        self.store.zarr.validate().map_err(invalid)?;

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be > 0".to_string()));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.initial_delay_ms exceeds max_delay_ms".to_string()));
        }
        if self.concurrency.parallel_sources == 0 || self.concurrency.concurrent_fetches == 0 {
            return Err(invalid("concurrency limits must be > 0".to_string()));
        }
        if !(self.gust.beta.is_finite() && self.gust.beta >= 0.0) {
            return Err(invalid(format!("gust.beta must be >= 0, got {}", self.gust.beta)));
        }
        if !(self.gust.factor.is_finite() && self.gust.factor >= 1.0) {
            return Err(invalid(format!("gust.factor must be >= 1, got {}", self.gust.factor)));
        }

        for source in SourceId::ALL {
            self.sources.schedule(source).validate(source).map_err(invalid)?;
        }
        if self.sources.enabled().is_empty() {
            return Err(invalid("no source enabled".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.grid.canonical_grid().unwrap().shape(), (141, 221));
        assert_eq!(config.sources.gfs.schedule.lead_times().len(), 25);
        assert_eq!(config.sources.met_nordic.schedule.lead_times().len(), 61);
        assert_eq!(config.sources.enabled(), vec![SourceId::Gfs, SourceId::MetNordic]);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
grid:
  name: nordic
  resolution: 0.5
  interpolation: nearest
store:
  root: /tmp/processed
  zarr_compression: zstd
  retain_raw_files: true
gust:
  factor: 1.4
sources:
  met_nordic:
    enabled: false
    cadence: [0, 6, 12, 18]
    latency_minutes: 60
    lead_time_start: 0
    lead_time_end: 6
    lead_time_step: 1
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.grid.interpolation, InterpolationMethod::Nearest);
        assert_eq!(config.grid.bounding_box().unwrap(), BoundingBox::named("nordic").unwrap());
        assert_eq!(config.store.zarr.root, PathBuf::from("/tmp/processed"));
        assert_eq!(config.store.zarr.zarr_chunk_size, 512);
        assert!(config.store.retain_raw_files);
        assert_eq!(config.gust.beta, 2.0);
        assert_eq!(config.gust.factor, 1.4);
        assert_eq!(config.sources.enabled(), vec![SourceId::Gfs]);
        assert_eq!(config.sources.gfs.schedule.cadence, vec![0, 6, 12, 18]);
    }

    #[test]
    fn test_explicit_bbox_overrides_name() {
        let grid = GridConfig {
            name: "alps".to_string(),
            bbox: Some("5,44,17,49".to_string()),
            resolution: 0.1,
            ..Default::default()
        };
        let canonical = grid.canonical_grid().unwrap();
        assert_eq!(canonical.name, "alps");
        assert_eq!(canonical.bbox, BoundingBox::new(5.0, 44.0, 17.0, 49.0));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.gust.factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.sources.gfs.schedule.lead_time_step = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.grid.name = "atlantis".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.sources.gfs.schedule.enabled = false;
        config.sources.met_nordic.schedule.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lead_times_respect_step() {
        let schedule = ScheduleConfig {
            enabled: true,
            cadence: vec![0],
            latency_minutes: 0,
            lead_time_start: 3,
            lead_time_end: 12,
            lead_time_step: 3,
        };
        assert_eq!(schedule.lead_times(), vec![3, 6, 9, 12]);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/pipeline.yaml");
        let config = PipelineConfig::load(path).unwrap();
        config.validate().unwrap();

        let defaults = PipelineConfig::default();
        assert_eq!(config.sources.met_nordic.url_template, defaults.sources.met_nordic.url_template);
        assert_eq!(config.sources.met_nordic.schedule.cadence, defaults.sources.met_nordic.schedule.cadence);
        assert_eq!(
            config.sources.gfs.schedule.lead_times(),
            defaults.sources.gfs.schedule.lead_times()
        );
        assert_eq!(config.store.zarr.stale_lock_secs, defaults.store.zarr.stale_lock_secs);
        assert_eq!(config.gust, defaults.gust);
    }
}
