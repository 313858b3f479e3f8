//! Forecast cycles and the resolver that picks the latest published one.

use crate::{CommonError, CommonResult, SourceId};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One model run of one source: `(source, run_date, run_hour)`.
///
/// Every downstream artifact (raw files, store units, reports) is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForecastCycle {
    pub source: SourceId,
    pub run_date: NaiveDate,
    pub run_hour: u8,
}

impl ForecastCycle {
    pub fn new(source: SourceId, run_date: NaiveDate, run_hour: u8) -> CommonResult<Self> {
        if run_hour > 23 {
            return Err(CommonError::InvalidCycle(format!(
                "run hour {} out of range 0-23",
                run_hour
            )));
        }
        Ok(Self {
            source,
            run_date,
            run_hour,
        })
    }

    /// Parse a `YYYYMMDD` date and an hour into a cycle.
    pub fn parse(source: SourceId, date: &str, hour: u8) -> CommonResult<Self> {
        let run_date = NaiveDate::parse_from_str(date, "%Y%m%d")
            .map_err(|e| CommonError::InvalidCycle(format!("invalid date '{}': {}", date, e)))?;
        Self::new(source, run_date, hour)
    }

    /// Nominal model initialisation time.
    pub fn reference_time(&self) -> DateTime<Utc> {
        let naive = self
            .run_date
            .and_hms_opt(self.run_hour as u32, 0, 0)
            .unwrap_or_else(|| self.run_date.and_time(chrono::NaiveTime::MIN));
        Utc.from_utc_datetime(&naive)
    }

    /// `YYYYMMDD` form of the run date.
    pub fn date_str(&self) -> String {
        self.run_date.format("%Y%m%d").to_string()
    }

    /// Two-digit run hour (`"06"`).
    pub fn hour_str(&self) -> String {
        format!("{:02}", self.run_hour)
    }

    /// Stable key used for store paths, e.g. `20250902T18Z`.
    pub fn storage_key(&self) -> String {
        format!("{}T{:02}Z", self.date_str(), self.run_hour)
    }

    /// Valid time of a lead time in this cycle.
    pub fn valid_time(&self, lead_hour: u32) -> DateTime<Utc> {
        self.reference_time() + Duration::hours(lead_hour as i64)
    }
}

impl fmt::Display for ForecastCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.storage_key())
    }
}

/// Computes the most recent cycle guaranteed to be published.
///
/// Pure: the caller supplies `now`, so resolution is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleResolver {
    cadence: Vec<u8>,
    latency: Duration,
}

impl CycleResolver {
    /// `cadence` holds the nominal run hours of the source, `latency_minutes`
    /// how long after a nominal run time its output is reliably available.
    pub fn new(cadence: &[u8], latency_minutes: i64) -> CommonResult<Self> {
        if cadence.is_empty() {
            return Err(CommonError::InvalidCycle("empty cycle cadence".to_string()));
        }
        if let Some(bad) = cadence.iter().find(|&&h| h > 23) {
            return Err(CommonError::InvalidCycle(format!(
                "cadence hour {} out of range 0-23",
                bad
            )));
        }
        if latency_minutes < 0 {
            return Err(CommonError::InvalidCycle(format!(
                "negative publication latency: {} min",
                latency_minutes
            )));
        }

        let mut cadence = cadence.to_vec();
        cadence.sort_unstable();
        cadence.dedup();

        Ok(Self {
            cadence,
            latency: Duration::minutes(latency_minutes),
        })
    }

    pub fn cadence(&self) -> &[u8] {
        &self.cadence
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Latest cycle whose nominal time is at or before `now - latency`.
    ///
    /// When no cadence hour of the shifted day qualifies, the last cycle of
    /// the previous day is returned.
    pub fn resolve(&self, source: SourceId, now: DateTime<Utc>) -> ForecastCycle {
        let available = now - self.latency;
        let date = available.date_naive();
        let hour = available.hour() as u8;

        match self.cadence.iter().rev().find(|&&h| h <= hour) {
            Some(&run_hour) => ForecastCycle {
                source,
                run_date: date,
                run_hour,
            },
            None => ForecastCycle {
                source,
                run_date: date.pred_opt().unwrap_or(date),
                run_hour: self.cadence[self.cadence.len() - 1],
            },
        }
    }

    /// Validate an explicit `(date, hour)` override against the cadence.
    pub fn from_override(
        &self,
        source: SourceId,
        run_date: NaiveDate,
        run_hour: u8,
    ) -> CommonResult<ForecastCycle> {
        if !self.cadence.contains(&run_hour) {
            return Err(CommonError::InvalidCycle(format!(
                "{} does not run at {:02}Z (cadence {:?})",
                source, run_hour, self.cadence
            )));
        }
        ForecastCycle::new(source, run_date, run_hour)
    }

    /// Cycle immediately preceding `cycle` in this cadence.
    pub fn previous(&self, cycle: &ForecastCycle) -> ForecastCycle {
        match self.cadence.iter().rev().find(|&&h| h < cycle.run_hour) {
            Some(&run_hour) => ForecastCycle { run_hour, ..*cycle },
            None => ForecastCycle {
                run_date: cycle.run_date.pred_opt().unwrap_or(cycle.run_date),
                run_hour: self.cadence[self.cadence.len() - 1],
                ..*cycle
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gfs_resolver() -> CycleResolver {
        CycleResolver::new(&[0, 6, 12, 18], 240).unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_rolls_back_across_midnight() {
        let cycle = gfs_resolver().resolve(SourceId::Gfs, at("2025-09-03T02:00:00Z"));
        assert_eq!(cycle.run_date, NaiveDate::from_ymd_opt(2025, 9, 2).unwrap());
        assert_eq!(cycle.run_hour, 18);
    }

    #[test]
    fn test_inside_latency_window_picks_previous_cycle() {
        // 12Z is nominal but only 3h old
        let cycle = gfs_resolver().resolve(SourceId::Gfs, at("2025-09-03T15:00:00Z"));
        assert_eq!(cycle.run_hour, 6);

        let cycle = gfs_resolver().resolve(SourceId::Gfs, at("2025-09-03T16:00:00Z"));
        assert_eq!(cycle.run_hour, 12);
    }

    #[test]
    fn test_resolved_cycle_is_never_too_recent() {
        let resolver = gfs_resolver();
        let start = at("2025-01-01T00:00:00Z");
        for step in 0..(4 * 24 * 3) {
            let now = start + Duration::minutes(step * 15);
            let cycle = resolver.resolve(SourceId::Gfs, now);
            assert!([0, 6, 12, 18].contains(&cycle.run_hour));
            assert!(cycle.reference_time() <= now - resolver.latency());
            // and it is the latest such cycle
            let next = cycle.reference_time() + Duration::hours(6);
            assert!(next > now - resolver.latency());
        }
    }

    #[test]
    fn test_hourly_cadence() {
        let cadence: Vec<u8> = (0..24).collect();
        let resolver = CycleResolver::new(&cadence, 90).unwrap();
        let cycle = resolver.resolve(SourceId::MetNordic, at("2025-09-03T00:45:00Z"));
        assert_eq!(cycle.run_date, NaiveDate::from_ymd_opt(2025, 9, 2).unwrap());
        assert_eq!(cycle.run_hour, 23);
    }

    #[test]
    fn test_override_must_match_cadence() {
        let resolver = gfs_resolver();
        let date = NaiveDate::from_ymd_opt(2025, 9, 2).unwrap();
        assert!(resolver.from_override(SourceId::Gfs, date, 12).is_ok());
        assert!(resolver.from_override(SourceId::Gfs, date, 3).is_err());
    }

    #[test]
    fn test_previous_cycle() {
        let resolver = gfs_resolver();
        let cycle = ForecastCycle::parse(SourceId::Gfs, "20250903", 0).unwrap();
        let prev = resolver.previous(&cycle);
        assert_eq!(prev.storage_key(), "20250902T18Z");
    }

    #[test]
    fn test_invalid_cadence() {
        assert!(CycleResolver::new(&[], 0).is_err());
        assert!(CycleResolver::new(&[24], 0).is_err());
        assert!(CycleResolver::new(&[0], -5).is_err());
    }
}
