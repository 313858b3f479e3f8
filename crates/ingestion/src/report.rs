//! Structured per-source and per-cycle run reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nwp_common::{CanonicalVariable, ForecastCycle, SourceId};
use serde::{Deserialize, Serialize};

use crate::derive::GustTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Degraded,
    Failed,
}

impl RunStatus {
    /// Failed only when every source failed; any imperfection degrades.
    pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a SourceStatus>) -> Self {
        let mut any = false;
        let mut all_failed = true;
        let mut all_success = true;
        for status in statuses {
            any = true;
            all_failed &= *status == SourceStatus::Failed;
            all_success &= *status == SourceStatus::Success;
        }
        if !any || all_failed {
            RunStatus::Failed
        } else if all_success {
            RunStatus::Success
        } else {
            RunStatus::Degraded
        }
    }
}

/// Classification of a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientFetch,
    PermanentFetch,
    Parse,
    Extraction,
    StoreConflict,
    CycleBusy,
    Store,
    Io,
    Cancelled,
    Timeout,
    Config,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedError {
    /// `None` for source-level errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_time: Option<u32>,
    pub kind: ErrorKind,
    pub message: String,
}

/// A mapped variable the source did not provide for one lead time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingVariable {
    pub lead_time: u32,
    pub variable: CanonicalVariable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: SourceId,
    /// Unset when the cycle could not be resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<String>,
    pub status: SourceStatus,
    pub lead_times_stored: Vec<u32>,
    /// Already complete in the store before this run.
    pub lead_times_skipped: Vec<u32>,
    pub lead_times_failed: Vec<u32>,
    pub missing_variables: Vec<MissingVariable>,
    pub errors: Vec<ReportedError>,
    /// Gust cascade tier used per stored lead time.
    pub gust_tiers: BTreeMap<u32, GustTier>,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl SourceReport {
    pub fn new(source: SourceId, cycle: Option<&ForecastCycle>) -> Self {
        Self {
            source,
            cycle: cycle.map(|c| c.to_string()),
            status: SourceStatus::Success,
            lead_times_stored: Vec::new(),
            lead_times_skipped: Vec::new(),
            lead_times_failed: Vec::new(),
            missing_variables: Vec::new(),
            errors: Vec::new(),
            gust_tiers: BTreeMap::new(),
            timed_out: false,
            cancelled: false,
        }
    }

    /// Report for a source whose cycle could not be run at all.
    pub fn failed(source: SourceId, cycle: Option<&ForecastCycle>, kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut report = Self::new(source, cycle);
        report.error(None, kind, message);
        report.status = SourceStatus::Failed;
        report
    }

    pub fn error(&mut self, lead_time: Option<u32>, kind: ErrorKind, message: impl Into<String>) {
        self.errors.push(ReportedError {
            lead_time,
            kind,
            message: message.into(),
        });
    }

    pub fn fail_lead_time(&mut self, lead_time: u32, kind: ErrorKind, message: impl Into<String>) {
        if !self.lead_times_failed.contains(&lead_time) {
            self.lead_times_failed.push(lead_time);
        }
        self.error(Some(lead_time), kind, message);
    }

    pub fn has_error(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// Sort lists and derive the status from what was recorded.
    ///
    /// Missing variables alone do not degrade a source. Errors, failed or
    /// unattempted lead times, a timeout and cancellation do. A source that
    /// stored nothing and had nothing left to store is a success.
    pub fn finish(&mut self, pending: usize) {
        self.lead_times_stored.sort_unstable();
        self.lead_times_skipped.sort_unstable();
        self.lead_times_failed.sort_unstable();
        self.missing_variables.sort_by_key(|m| (m.lead_time, m.variable));

        let complete = self.lead_times_stored.len() >= pending;
        self.status = if pending > 0 && self.lead_times_stored.is_empty() {
            SourceStatus::Failed
        } else if complete && self.errors.is_empty() && !self.timed_out && !self.cancelled {
            SourceStatus::Success
        } else {
            SourceStatus::Degraded
        };
    }
}

/// Outcome of one orchestrator run across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub sources: BTreeMap<SourceId, SourceReport>,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>, reports: impl IntoIterator<Item = SourceReport>) -> Self {
        let sources: BTreeMap<_, _> = reports.into_iter().map(|r| (r.source, r)).collect();
        Self {
            started_at,
            finished_at: Utc::now(),
            status: RunStatus::aggregate(sources.values().map(|r| &r.status)),
            sources,
        }
    }

    pub fn source(&self, source: SourceId) -> Option<&SourceReport> {
        self.sources.get(&source)
    }

    /// Total failure caused by another run holding a cycle.
    pub fn is_busy(&self) -> bool {
        self.status == RunStatus::Failed
            && self.sources.values().any(|r| r.has_error(ErrorKind::CycleBusy))
    }
}
