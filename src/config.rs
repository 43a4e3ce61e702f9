//! Calibration configuration
//!
//! All tunables of the pipeline live in [`CalibrationConfig`]. It has sensible
//! defaults, round-trips through JSON, and is validated once before a run.

use crate::error::CalibrationError;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default timezone used to interpret naive reference timestamps
pub const DEFAULT_TIMEZONE: &str = "Europe/Rome";

/// Default minimum scan coverage (seconds) for a bin to be paired
pub const DEFAULT_MIN_SCAN_COVERAGE_S: f64 = 30.0;

/// Default minimum number of pairs needed to fit a model
pub const DEFAULT_MIN_SAMPLES_PER_CONTEXT: usize = 5;

/// Calibrator family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Pchip,
    Isotonic,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Pchip => "pchip",
            ModelKind::Isotonic => "isotonic",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pchip" => Ok(ModelKind::Pchip),
            "isotonic" => Ok(ModelKind::Isotonic),
            other => Err(CalibrationError::InvalidConfig(format!(
                "unknown model kind '{other}'"
            ))),
        }
    }
}

/// Width of a time bin, in whole seconds.
///
/// Parsed from frequency strings such as `"1min"`, `"30s"`, `"30S"`, `"5T"`
/// or `"1h"`. Serialized back as a plain number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BinSizeRepr", into = "u32")]
pub struct BinSize(u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum BinSizeRepr {
    Seconds(u32),
    Text(String),
}

impl TryFrom<BinSizeRepr> for BinSize {
    type Error = CalibrationError;

    fn try_from(repr: BinSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            BinSizeRepr::Seconds(secs) => BinSize::from_seconds(secs),
            BinSizeRepr::Text(text) => text.parse(),
        }
    }
}

impl From<BinSize> for u32 {
    fn from(size: BinSize) -> Self {
        size.0
    }
}

impl Default for BinSize {
    fn default() -> Self {
        BinSize(60)
    }
}

impl BinSize {
    pub fn from_seconds(seconds: u32) -> Result<Self, CalibrationError> {
        if seconds == 0 {
            return Err(CalibrationError::InvalidBinSize(
                "bin size must be at least one second".to_string(),
            ));
        }
        Ok(BinSize(seconds))
    }

    pub fn seconds(&self) -> u32 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::seconds(i64::from(self.0))
    }

    /// Start of the bin containing `ts`, aligned to the Unix epoch
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = i64::from(self.0);
        let floored = ts.timestamp().div_euclid(width) * width;
        DateTime::from_timestamp(floored, 0).unwrap_or(ts)
    }
}

impl FromStr for BinSize {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);

        // A bare unit such as "min" means one of it
        let count: u32 = if digits.is_empty() {
            1
        } else {
            digits
                .parse()
                .map_err(|_| CalibrationError::InvalidBinSize(s.to_string()))?
        };

        let unit_seconds = match unit.trim() {
            "" | "s" | "S" | "sec" | "secs" | "second" | "seconds" => 1,
            "min" | "mins" | "minute" | "minutes" | "T" | "m" => 60,
            "h" | "H" | "hour" | "hours" => 3600,
            _ => return Err(CalibrationError::InvalidBinSize(s.to_string())),
        };

        let seconds = count
            .checked_mul(unit_seconds)
            .ok_or_else(|| CalibrationError::InvalidBinSize(s.to_string()))?;
        BinSize::from_seconds(seconds)
    }
}

impl fmt::Display for BinSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 3600 == 0 {
            write!(f, "{}h", self.0 / 3600)
        } else if self.0 % 60 == 0 {
            write!(f, "{}min", self.0 / 60)
        } else {
            write!(f, "{}s", self.0)
        }
    }
}

/// Thresholds used to label a sample as active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Resting heart rate; estimated from the scan series when absent
    pub resting_baseline_bpm: Option<f64>,
    /// Margin above the resting baseline that counts as active
    pub active_margin_bpm: f64,
    /// Percentile (0-1) of scan values used as the estimated baseline
    pub baseline_percentile: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            resting_baseline_bpm: None,
            active_margin_bpm: 30.0,
            baseline_percentile: 0.05,
        }
    }
}

/// Parameters of the model fitters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FittingConfig {
    /// Equal-width bins used to build PCHIP knots
    pub pchip_bins: usize,
    /// Bins holding fewer points than this yield no knot
    pub min_points_per_knot: usize,
    /// Predictions are clipped into `[clip_lo, clip_hi]`
    pub clip_lo: f64,
    pub clip_hi: f64,
}

impl Default for FittingConfig {
    fn default() -> Self {
        Self {
            pchip_bins: 15,
            min_points_per_knot: 1,
            clip_lo: 35.0,
            clip_hi: 220.0,
        }
    }
}

/// Complete configuration of a calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub model_kind: ModelKind,
    pub bin_size: BinSize,
    pub min_scan_coverage_s: f64,
    /// Minimum reference readings in a bin for it to be paired
    pub min_ref_points: f64,
    /// Plausible heart-rate range; pairs outside on either side are dropped
    pub hr_valid_range: (f64, f64),
    pub min_samples_per_context: usize,
    pub activity: ActivityConfig,
    pub fitting: FittingConfig,
    /// Ascending zone edges used for metrics, in bpm
    pub zone_edges: Vec<f64>,
    /// IANA timezone of naive reference timestamps
    pub timezone: String,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            model_kind: ModelKind::Pchip,
            bin_size: BinSize::default(),
            min_scan_coverage_s: DEFAULT_MIN_SCAN_COVERAGE_S,
            min_ref_points: 1.0,
            hr_valid_range: (30.0, 230.0),
            min_samples_per_context: DEFAULT_MIN_SAMPLES_PER_CONTEXT,
            activity: ActivityConfig::default(),
            fitting: FittingConfig::default(),
            zone_edges: vec![100.0, 140.0, 170.0],
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

impl CalibrationConfig {
    /// Load a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, CalibrationError> {
        let config: CalibrationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, CalibrationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Resolve the configured IANA timezone
    pub fn tz(&self) -> Result<Tz, CalibrationError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| CalibrationError::InvalidTimezone(self.timezone.clone()))
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !self.min_scan_coverage_s.is_finite() || self.min_scan_coverage_s < 0.0 {
            return Err(CalibrationError::InvalidConfig(format!(
                "min_scan_coverage_s must be a non-negative number, got {}",
                self.min_scan_coverage_s
            )));
        }
        let (lo, hi) = self.hr_valid_range;
        if !(lo < hi) {
            return Err(CalibrationError::InvalidConfig(format!(
                "hr_valid_range must be ascending, got ({lo}, {hi})"
            )));
        }
        if self.min_samples_per_context == 0 {
            return Err(CalibrationError::InvalidConfig(
                "min_samples_per_context must be at least 1".to_string(),
            ));
        }
        if self.fitting.pchip_bins == 0 {
            return Err(CalibrationError::InvalidConfig(
                "pchip_bins must be at least 1".to_string(),
            ));
        }
        if !(self.fitting.clip_lo < self.fitting.clip_hi) {
            return Err(CalibrationError::InvalidConfig(format!(
                "clip range must be ascending, got ({}, {})",
                self.fitting.clip_lo, self.fitting.clip_hi
            )));
        }
        if !(0.0..=1.0).contains(&self.activity.baseline_percentile) {
            return Err(CalibrationError::InvalidConfig(format!(
                "baseline_percentile must be within [0, 1], got {}",
                self.activity.baseline_percentile
            )));
        }
        if self.zone_edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(CalibrationError::InvalidConfig(
                "zone_edges must be strictly ascending".to_string(),
            ));
        }
        self.tz()?;
        Ok(())
    }
}
