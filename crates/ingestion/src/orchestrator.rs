//! Per-cycle pipeline: resolve → fetch → extract → derive → normalize → store.
//!
//! Sources run independently, `parallel_sources` at a time. Within a source,
//! fetches overlap while each fetched file is processed on the blocking pool,
//! one lead time after another, through the cycle's single writer.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use grid_processor::{CycleWriter, DatasetStore, GridNormalizer, GridProcessorError, NormalizedField};
use metrics::counter;
use nwp_common::{CanonicalGrid, CanonicalVariable, ForecastCycle, SourceId};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapter::{FetchResult, GfsAdapter, MetNordicAdapter, RawGridFile, SourceAdapter};
use crate::config::PipelineConfig;
use crate::derive::{DerivedQuantityComputer, GustFactor, GustTier};
use crate::download::DownloadManager;
use crate::error::{FetchError, IngestionError, PipelineError};
use crate::extract::{RawContents, VariableExtractor};
use crate::report::{CycleReport, ErrorKind, MissingVariable, SourceReport};
use crate::transport::ReqwestTransport;

/// What to run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Explicit `(run_date, run_hour)`; resolved from `now` otherwise.
    pub cycle: Option<(NaiveDate, u8)>,
    /// Sources to run; empty means every configured source.
    pub sources: Vec<SourceId>,
    pub now: DateTime<Utc>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            cycle: None,
            sources: Vec::new(),
            now: Utc::now(),
        }
    }
}

impl RunRequest {
    pub fn for_cycle(run_date: NaiveDate, run_hour: u8) -> Self {
        Self {
            cycle: Some((run_date, run_hour)),
            ..Self::default()
        }
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = SourceId>) -> Self {
        self.sources = sources.into_iter().collect();
        self
    }
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    downloads: DownloadManager,
    store: DatasetStore,
    grid: CanonicalGrid,
    normalizer: Arc<GridNormalizer>,
    derive: Arc<DerivedQuantityComputer>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        downloads: DownloadManager,
    ) -> Result<Self, PipelineError> {
        let grid = config
            .grid
            .canonical_grid()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let store = DatasetStore::new(config.store.zarr.clone())?;
        let normalizer = Arc::new(GridNormalizer::new(grid.clone(), config.grid.interpolation));
        let derive = Arc::new(DerivedQuantityComputer::new(&config.gust));

        Ok(Self {
            config,
            adapters,
            downloads,
            store,
            grid,
            normalizer,
            derive,
        })
    }

    /// Production wiring: HTTP transport and an adapter per enabled source.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let transport = ReqwestTransport::new(config.retry.request_timeout())
            .map_err(|e| PipelineError::Config(format!("HTTP client: {}", e)))?;
        let downloads = DownloadManager::new(Arc::new(transport), config.retry.clone());
        let adapters = build_adapters(&config)?;
        Self::new(config, adapters, downloads)
    }

    /// Replace the constant factor of the last gust tier.
    pub fn with_gust_factor(mut self, gust_factor: Arc<dyn GustFactor>) -> Self {
        self.derive = Arc::new(DerivedQuantityComputer::new(&self.config.gust).with_gust_factor(gust_factor));
        self
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn grid(&self) -> &CanonicalGrid {
        &self.grid
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.adapters.iter().map(|a| a.source()).collect()
    }

    /// Run one cycle per selected source and aggregate the reports.
    #[instrument(skip_all)]
    pub async fn run(&self, request: &RunRequest, cancel: &CancellationToken) -> CycleReport {
        let started_at = Utc::now();
        let mut reports = Vec::new();

        let selected: Vec<Arc<dyn SourceAdapter>> = if request.sources.is_empty() {
            self.adapters.clone()
        } else {
            let mut selected = Vec::new();
            let mut seen = BTreeSet::new();
            for source in request.sources.iter().filter(|s| seen.insert(**s)) {
                match self.adapters.iter().find(|a| a.source() == *source) {
                    Some(adapter) => selected.push(adapter.clone()),
                    None => reports.push(SourceReport::failed(
                        *source,
                        None,
                        ErrorKind::Config,
                        format!("source {} is not enabled", source),
                    )),
                }
            }
            selected
        };

        info!(
            sources = ?selected.iter().map(|a| a.source()).collect::<Vec<_>>(),
            cycle = ?request.cycle,
            "Starting ingestion run"
        );

        let source_reports: Vec<SourceReport> = stream::iter(selected)
            .map(|adapter| async move { self.run_adapter(adapter.as_ref(), request, cancel).await })
            .buffer_unordered(self.config.concurrency.parallel_sources.max(1))
            .collect()
            .await;
        reports.extend(source_reports);

        let report = CycleReport::new(started_at, reports);
        info!(
            status = ?report.status,
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Ingestion run finished"
        );
        report
    }

    async fn run_adapter(
        &self,
        adapter: &dyn SourceAdapter,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> SourceReport {
        let source = adapter.source();
        let cycle = match request.cycle {
            Some((date, hour)) => match adapter.resolver().from_override(source, date, hour) {
                Ok(cycle) => cycle,
                Err(e) => return SourceReport::failed(source, None, ErrorKind::Config, e.to_string()),
            },
            None => adapter.resolver().resolve(source, request.now),
        };

        match self.run_source(adapter, cycle, cancel).await {
            Ok(report) => report,
            Err(e) => {
                let kind = match &e {
                    PipelineError::CycleBusy(_) => ErrorKind::CycleBusy,
                    PipelineError::Store(inner) if inner.is_conflict() => ErrorKind::StoreConflict,
                    PipelineError::Store(_) => ErrorKind::Store,
                    PipelineError::Config(_) => ErrorKind::Config,
                    PipelineError::Task(_) => ErrorKind::Internal,
                };
                error!(source = %source, cycle = %cycle, error = %e, "Source cycle aborted");
                SourceReport::failed(source, Some(&cycle), kind, e.to_string())
            }
        }
    }

    /// Process the pending lead times of one source cycle.
    ///
    /// Fails only when the store cannot be opened or fails fatally; lead-time
    /// scoped problems are recorded in the report.
    #[instrument(skip_all, fields(source = %cycle.source, cycle = %cycle))]
    pub async fn run_source(
        &self,
        adapter: &dyn SourceAdapter,
        cycle: ForecastCycle,
        cancel: &CancellationToken,
    ) -> Result<SourceReport, PipelineError> {
        let source = cycle.source;
        let store = self.store.clone();
        let grid = self.grid.clone();
        let writer = tokio::task::spawn_blocking(move || store.open_writer(&cycle, &grid))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;

        let mut report = SourceReport::new(source, Some(&cycle));
        let completed = writer.completed_lead_times().clone();
        let (skipped, pending): (Vec<u32>, Vec<u32>) =
            adapter.lead_times().iter().copied().partition(|l| completed.contains(l));
        report.lead_times_skipped = skipped;

        if pending.is_empty() {
            info!(skipped = report.lead_times_skipped.len(), "All lead times already stored");
            report.finish(0);
            return Ok(report);
        }
        info!(
            pending = pending.len(),
            skipped = report.lead_times_skipped.len(),
            "Processing source cycle"
        );

        let processor = Arc::new(LeadProcessor {
            cycle,
            extractor: VariableExtractor::new(adapter.variable_map()),
            derive: self.derive.clone(),
            normalizer: self.normalizer.clone(),
            writer: Mutex::new(writer),
        });

        let deadline = tokio::time::sleep(self.config.concurrency.cycle_timeout());
        tokio::pin!(deadline);

        let mut fetches = Some(adapter.fetch(
            &self.downloads,
            &cycle,
            &pending,
            self.config.concurrency.concurrent_fetches,
            cancel,
        ));
        let mut processing: JoinSet<(RawGridFile, Result<Vec<LeadResult>, GridProcessorError>)> = JoinSet::new();
        let mut fatal: Option<GridProcessorError> = None;

        while fetches.is_some() || !processing.is_empty() {
            tokio::select! {
                biased;

                _ = cancel.cancelled(), if fetches.is_some() => {
                    warn!("Stop requested, abandoning outstanding fetches");
                    report.cancelled = true;
                    fetches = None;
                }
                _ = &mut deadline, if fetches.is_some() => {
                    warn!(
                        timeout_secs = self.config.concurrency.cycle_timeout_secs,
                        "Cycle soft timeout reached, keeping completed lead times"
                    );
                    report.timed_out = true;
                    report.error(None, ErrorKind::Timeout, "cycle soft timeout reached before all lead times were fetched");
                    fetches = None;
                }
                Some(joined) = processing.join_next() => match joined {
                    Ok((raw, Ok(results))) => {
                        let all_stored = results.iter().all(|r| matches!(r, LeadResult::Stored { .. }));
                        for result in results {
                            record_lead(&mut report, result);
                        }
                        if all_stored && !self.config.store.retain_raw_files {
                            if let Err(e) = tokio::fs::remove_file(&raw.path).await {
                                debug!(path = %raw.path.display(), error = %e, "Could not remove raw file");
                            }
                        }
                    }
                    Ok((raw, Err(e))) => {
                        error!(path = %raw.path.display(), error = %e, "Store failed, aborting source cycle");
                        fatal.get_or_insert(e);
                        fetches = None;
                    }
                    Err(e) => {
                        error!(error = %e, "Processing task failed");
                        report.error(None, ErrorKind::Internal, format!("processing task failed: {}", e));
                    }
                },
                next = next_fetch(&mut fetches), if fetches.is_some() => match next {
                    Some((_, Ok(raw))) => {
                        let processor = processor.clone();
                        processing.spawn_blocking(move || {
                            let results = processor.process_file(&raw);
                            (raw, results)
                        });
                    }
                    Some((request, Err(e))) => record_fetch_failure(&mut report, &request.lead_times, &e),
                    None => fetches = None,
                },
            }
        }

        if let Some(e) = fatal {
            return Err(e.into());
        }

        report.finish(pending.len());
        info!(
            status = ?report.status,
            stored = report.lead_times_stored.len(),
            failed = report.lead_times_failed.len(),
            missing = report.missing_variables.len(),
            "Source cycle finished"
        );
        Ok(report)
    }
}

/// One adapter per enabled source, all sharing the canonical window.
pub fn build_adapters(config: &PipelineConfig) -> Result<Vec<Arc<dyn SourceAdapter>>, PipelineError> {
    let window = config
        .grid
        .bounding_box()
        .map_err(|e| PipelineError::Config(e.to_string()))?;
    let raw_dir = &config.store.raw_dir;

    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    for source in config.sources.enabled() {
        let adapter: Arc<dyn SourceAdapter> = match source {
            SourceId::Gfs => Arc::new(
                GfsAdapter::new(&config.sources.gfs, &window, raw_dir).map_err(|e| PipelineError::Config(e.to_string()))?,
            ),
            SourceId::MetNordic => Arc::new(
                MetNordicAdapter::new(&config.sources.met_nordic, &window, raw_dir)
                    .map_err(|e| PipelineError::Config(e.to_string()))?,
            ),
        };
        adapters.push(adapter);
    }
    Ok(adapters)
}

async fn next_fetch(fetches: &mut Option<BoxStream<'_, FetchResult>>) -> Option<FetchResult> {
    match fetches {
        Some(stream) => stream.next().await,
        None => None,
    }
}

fn fetch_error_kind(err: &FetchError) -> ErrorKind {
    match err {
        FetchError::Transient { .. } => ErrorKind::TransientFetch,
        FetchError::Permanent { .. } => ErrorKind::PermanentFetch,
        FetchError::Parse { .. } => ErrorKind::Parse,
        FetchError::Cancelled { .. } => ErrorKind::Cancelled,
        FetchError::Io { .. } => ErrorKind::Io,
    }
}

fn record_fetch_failure(report: &mut SourceReport, lead_times: &[u32], err: &FetchError) {
    let kind = fetch_error_kind(err);
    match lead_times {
        [lead_time] => report.fail_lead_time(*lead_time, kind, err.to_string()),
        _ => {
            // One bundle error, not one per contained lead time.
            report.lead_times_failed.extend(lead_times);
            report.error(None, kind, format!("{} (covering {} lead times)", err, lead_times.len()));
        }
    }
}

fn record_lead(report: &mut SourceReport, result: LeadResult) {
    match result {
        LeadResult::Stored {
            lead_time,
            gust_tier,
            missing,
        } => {
            counter!("ingest_lead_times_stored_total", "source" => report.source.as_str()).increment(1);
            report.lead_times_stored.push(lead_time);
            if let Some(tier) = gust_tier {
                report.gust_tiers.insert(lead_time, tier);
            }
            report
                .missing_variables
                .extend(missing.into_iter().map(|variable| MissingVariable { lead_time, variable }));
        }
        LeadResult::Failed {
            lead_time,
            kind,
            message,
        } => report.fail_lead_time(lead_time, kind, message),
    }
}

#[derive(Debug)]
enum LeadResult {
    Stored {
        lead_time: u32,
        gust_tier: Option<GustTier>,
        missing: Vec<CanonicalVariable>,
    },
    Failed {
        lead_time: u32,
        kind: ErrorKind,
        message: String,
    },
}

/// Lead-time scoped failure, or a store failure that ends the source cycle.
enum LeadError {
    Lead(ErrorKind, String),
    Fatal(GridProcessorError),
}

impl From<IngestionError> for LeadError {
    fn from(err: IngestionError) -> Self {
        LeadError::Lead(ErrorKind::Extraction, err.to_string())
    }
}

impl From<GridProcessorError> for LeadError {
    fn from(err: GridProcessorError) -> Self {
        if err.is_conflict() {
            LeadError::Lead(ErrorKind::StoreConflict, err.to_string())
        } else {
            LeadError::Fatal(err)
        }
    }
}

/// Blocking half of a source cycle, shared by the processing tasks.
struct LeadProcessor {
    cycle: ForecastCycle,
    extractor: VariableExtractor,
    derive: Arc<DerivedQuantityComputer>,
    normalizer: Arc<GridNormalizer>,
    writer: Mutex<CycleWriter>,
}

impl LeadProcessor {
    fn process_file(&self, raw: &RawGridFile) -> Result<Vec<LeadResult>, GridProcessorError> {
        let contents = match self.extractor.open(raw) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %raw.path.display(), error = %e, "Could not open raw file");
                return Ok(raw
                    .lead_times
                    .iter()
                    .map(|&lead_time| LeadResult::Failed {
                        lead_time,
                        kind: ErrorKind::Extraction,
                        message: e.to_string(),
                    })
                    .collect());
            }
        };

        let mut results = Vec::with_capacity(raw.lead_times.len());
        for &lead_time in &raw.lead_times {
            match self.process_lead(&contents, lead_time) {
                Ok(result) => results.push(result),
                Err(LeadError::Lead(kind, message)) => {
                    warn!(lead_hour = lead_time, kind = ?kind, error = %message, "Lead time failed");
                    results.push(LeadResult::Failed {
                        lead_time,
                        kind,
                        message,
                    });
                }
                Err(LeadError::Fatal(e)) => return Err(e),
            }
        }
        Ok(results)
    }

    fn process_lead(&self, contents: &RawContents, lead_time: u32) -> Result<LeadResult, LeadError> {
        let mut fields = self.extractor.extract(contents, lead_time)?;
        let summary = self.derive.compute(&mut fields, self.cycle.valid_time(lead_time));

        let normalized = fields
            .fields
            .iter()
            .map(|(variable, values)| {
                let values = self.normalizer.normalize(&fields.grid, values)?;
                Ok(NormalizedField::new(*variable, lead_time, values))
            })
            .collect::<Result<Vec<_>, GridProcessorError>>()
            .map_err(|e| LeadError::Lead(ErrorKind::Extraction, e.to_string()))?;

        let outcome = {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| GridProcessorError::storage_error("cycle writer lock poisoned"))?;
            writer.write_lead_time(lead_time, &normalized)?
        };

        debug!(
            lead_hour = lead_time,
            written = outcome.written,
            unchanged = outcome.unchanged,
            gust_tier = ?summary.gust_tier,
            "Lead time stored"
        );

        let mut missing: BTreeSet<CanonicalVariable> = fields.missing.into_iter().collect();
        missing.extend(summary.unavailable);
        Ok(LeadResult::Stored {
            lead_time,
            gust_tier: summary.gust_tier,
            missing: missing.into_iter().collect(),
        })
    }
}
