//! Core types for the calibration pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw scan intervals, per-second samples, context intervals, bins,
//! paired bins and calibrated pairs.

use crate::error::CalibrationError;
use crate::timeutil::parse_iso_to_utc;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physiological context of a sample or bin.
///
/// Variants are declared in ascending precedence, so the derived ordering
/// matches the resolution order sleep > sport > active > rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Rest,
    Active,
    Sport,
    Sleep,
}

impl Context {
    /// All contexts, highest precedence first
    pub const BY_PRECEDENCE: [Context; 4] =
        [Context::Sleep, Context::Sport, Context::Active, Context::Rest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Rest => "rest",
            Context::Active => "active",
            Context::Sport => "sport",
            Context::Sleep => "sleep",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an auxiliary context interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalKind {
    Sleep,
    Sport,
}

/// Longest single segment a scan record may describe, in seconds
pub const MAX_INTERVAL_SECONDS: i64 = 86_400;

/// Compact sensor record: `value` held for `duration` seconds from `start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInterval {
    pub start: DateTime<Utc>,
    /// Length in whole seconds
    pub duration: i64,
    pub value: f64,
}

impl RawInterval {
    pub fn new(start: DateTime<Utc>, duration: i64, value: f64) -> Self {
        Self {
            start,
            duration,
            value,
        }
    }

    /// Exclusive end, or `None` when it is not representable
    pub fn end(&self) -> Option<DateTime<Utc>> {
        Duration::try_seconds(self.duration).and_then(|d| self.start.checked_add_signed(d))
    }

    /// Check the interval can be expanded
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.duration < 0 {
            return Err(CalibrationError::MalformedInterval(format!(
                "negative duration {}s at {}",
                self.duration,
                self.start.to_rfc3339()
            )));
        }
        if self.duration > MAX_INTERVAL_SECONDS {
            return Err(CalibrationError::MalformedInterval(format!(
                "duration {}s at {} exceeds {MAX_INTERVAL_SECONDS}s",
                self.duration,
                self.start.to_rfc3339()
            )));
        }
        if self.end().is_none() {
            return Err(CalibrationError::MalformedInterval(format!(
                "interval at {} runs past the representable time range",
                self.start.to_rfc3339()
            )));
        }
        if !self.value.is_finite() {
            return Err(CalibrationError::MalformedInterval(format!(
                "non-finite value {} at {}",
                self.value,
                self.start.to_rfc3339()
            )));
        }
        Ok(())
    }
}

/// One row of a scan export: consecutive segments starting at `start`.
///
/// Segment `i` lasts `durations[i]` seconds at `values[i]` and begins where
/// segment `i - 1` ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub start: DateTime<Utc>,
    pub durations: Vec<i64>,
    pub values: Vec<f64>,
}

impl ScanRecord {
    /// Build a record from an export row whose start is ISO-8601 text with
    /// a UTC offset
    pub fn from_export(
        start: &str,
        durations: Vec<i64>,
        values: Vec<f64>,
    ) -> Result<Self, CalibrationError> {
        let start = parse_iso_to_utc(start)
            .map_err(|e| CalibrationError::MalformedInterval(format!("bad record start: {e}")))?;
        Ok(Self {
            start,
            durations,
            values,
        })
    }

    /// Lay the record's segments back-to-back as raw intervals
    pub fn intervals(&self) -> Result<Vec<RawInterval>, CalibrationError> {
        if self.durations.len() != self.values.len() {
            return Err(CalibrationError::MalformedInterval(format!(
                "record at {} has {} durations but {} values",
                self.start.to_rfc3339(),
                self.durations.len(),
                self.values.len()
            )));
        }

        let mut cursor = self.start;
        let mut intervals = Vec::with_capacity(self.durations.len());
        for (&duration, &value) in self.durations.iter().zip(&self.values) {
            let interval = RawInterval::new(cursor, duration, value);
            interval.validate()?;
            cursor = cursor
                .checked_add_signed(Duration::seconds(duration))
                .ok_or_else(|| {
                    CalibrationError::MalformedInterval(format!(
                        "record at {} runs past the representable time range",
                        self.start.to_rfc3339()
                    ))
                })?;
            intervals.push(interval);
        }
        Ok(intervals)
    }
}

/// A single point observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Half-open `[start, end)` time range labelled sleep or sport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub kind: IntervalKind,
}

impl ContextInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, kind: IntervalKind) -> Self {
        Self { start, end, kind }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// Aggregate of one series over one fixed-width window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub bin_start: DateTime<Utc>,
    pub aggregated_value: f64,
    /// Seconds of scan samples, or number of reference readings
    pub coverage_seconds: f64,
    pub context: Context,
}

/// A scan bin matched with the reference bin for the same window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub bin_start: DateTime<Utc>,
    pub scan_value: f64,
    pub ref_value: f64,
    pub context: Context,
    pub scan_coverage: f64,
    pub ref_coverage: f64,
}

/// Pair with the calibrated prediction appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedPair {
    #[serde(flatten)]
    pub pair: Pair,
    pub predicted_value: f64,
    /// Which fitted model produced the prediction
    pub model_scope: ModelScope,
}

impl CalibratedPair {
    pub fn error(&self) -> f64 {
        self.predicted_value - self.pair.ref_value
    }
}

/// Group a model was trained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelScope {
    Global,
    Rest,
    Active,
    Sport,
    Sleep,
}

impl ModelScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelScope::Global => "global",
            ModelScope::Rest => "rest",
            ModelScope::Active => "active",
            ModelScope::Sport => "sport",
            ModelScope::Sleep => "sleep",
        }
    }
}

impl From<Context> for ModelScope {
    fn from(context: Context) -> Self {
        match context {
            Context::Rest => ModelScope::Rest,
            Context::Active => ModelScope::Active,
            Context::Sport => ModelScope::Sport,
            Context::Sleep => ModelScope::Sleep,
        }
    }
}

impl fmt::Display for ModelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
