//! CF time coordinates (`"<unit> since <epoch>"`).

use crate::error::{NetCdfError, NetCdfResult};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// A parsed CF `units` attribute of a time coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    pub seconds_per_unit: f64,
    pub epoch: DateTime<Utc>,
}

impl TimeUnits {
    /// Parse e.g. `seconds since 1970-01-01 00:00:00 +00:00`.
    pub fn parse(units: &str) -> NetCdfResult<Self> {
        let invalid = || NetCdfError::InvalidFormat(format!("unsupported time units '{}'", units));

        let (unit, epoch) = units.split_once(" since ").ok_or_else(invalid)?;
        let seconds_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "s" => 1.0,
            "minutes" | "minute" | "mins" => 60.0,
            "hours" | "hour" | "h" => 3600.0,
            "days" | "day" | "d" => 86400.0,
            _ => return Err(invalid()),
        };

        Ok(Self {
            seconds_per_unit,
            epoch: parse_epoch(epoch.trim()).ok_or_else(invalid)?,
        })
    }

    pub fn to_datetime(&self, value: f64) -> DateTime<Utc> {
        let millis = (value * self.seconds_per_unit * 1000.0).round() as i64;
        self.epoch + Duration::milliseconds(millis)
    }
}

fn parse_epoch(s: &str) -> Option<DateTime<Utc>> {
    // Drop a trailing UTC offset; CF model output is UTC.
    let trimmed = s
        .trim_end_matches(" UTC")
        .trim_end_matches(" +00:00")
        .trim_end_matches("+00:00")
        .trim_end_matches('Z')
        .trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}
