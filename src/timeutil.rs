//! Timestamp interpretation helpers
//!
//! Scan exports carry ISO-8601 timestamps with an explicit offset. Reference
//! exports carry naive wall-clock times that must be localized to the user's
//! timezone before conversion to UTC.

use crate::error::CalibrationError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse an ISO-8601 timestamp that must include a UTC offset
pub fn parse_iso_to_utc(s: &str) -> Result<DateTime<Utc>, CalibrationError> {
    let trimmed = s.trim();
    DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            if parse_naive(trimmed).is_some() {
                CalibrationError::DateParse(format!(
                    "timestamp '{trimmed}' must include a timezone offset"
                ))
            } else {
                CalibrationError::DateParse(format!("unparseable timestamp '{trimmed}'"))
            }
        })
}

/// Interpret a naive wall-clock timestamp in `tz` and convert it to UTC.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant.
/// Local times skipped by a DST jump are rejected.
pub fn local_to_utc(s: &str, tz: &Tz) -> Result<DateTime<Utc>, CalibrationError> {
    let trimmed = s.trim();
    let naive = parse_naive(trimmed)
        .ok_or_else(|| CalibrationError::DateParse(format!("unparseable timestamp '{trimmed}'")))?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            CalibrationError::DateParse(format!(
                "local time '{trimmed}' does not exist in {}",
                tz.name()
            ))
        })
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}
