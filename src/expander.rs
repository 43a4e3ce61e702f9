//! Interval expansion
//!
//! Turns compact `(start, duration, value)` scan records into per-second
//! samples. Each second of an interval carries the interval's value unchanged
//! (step distribution).

use crate::error::CalibrationError;
use crate::types::{RawInterval, Sample};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Expander for raw scan intervals
pub struct IntervalExpander;

impl IntervalExpander {
    /// Lazily expand one interval into one sample per whole second
    pub fn expand_interval(
        interval: &RawInterval,
    ) -> Result<impl Iterator<Item = Sample>, CalibrationError> {
        interval.validate()?;
        let start = interval.start;
        let value = interval.value;
        Ok((0..interval.duration).map(move |k| Sample::new(start + Duration::seconds(k), value)))
    }

    /// Expand a sequence of intervals into the samples covering their union.
    ///
    /// Output is ordered by timestamp with exactly one sample per second.
    /// Where intervals overlap, the later interval in input order wins.
    pub fn expand(intervals: &[RawInterval]) -> Result<Vec<Sample>, CalibrationError> {
        let mut by_second: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        let mut emitted = 0usize;

        for interval in intervals {
            for sample in Self::expand_interval(interval)? {
                by_second.insert(sample.timestamp, sample.value);
                emitted += 1;
            }
        }

        if emitted > by_second.len() {
            debug!(
                overwritten = emitted - by_second.len(),
                "overlapping scan intervals resolved last-write-wins"
            );
        }

        Ok(by_second
            .into_iter()
            .map(|(timestamp, value)| Sample::new(timestamp, value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_expand_one_sample_per_second() {
        let interval = RawInterval::new(t0(), 60, 70.0);
        let samples: Vec<Sample> = IntervalExpander::expand_interval(&interval)
            .unwrap()
            .collect();

        assert_eq!(samples.len(), 60);
        assert_eq!(samples[0].timestamp, t0());
        assert_eq!(samples[59].timestamp, t0() + Duration::seconds(59));
        assert!(samples.iter().all(|s| s.value == 70.0));
    }

    #[test]
    fn test_zero_duration_yields_nothing() {
        let samples = IntervalExpander::expand(&[RawInterval::new(t0(), 0, 70.0)]).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_overlap_is_last_write_wins() {
        let intervals = vec![
            RawInterval::new(t0(), 10, 60.0),
            RawInterval::new(t0() + Duration::seconds(5), 10, 80.0),
        ];
        let samples = IntervalExpander::expand(&intervals).unwrap();

        assert_eq!(samples.len(), 15);
        assert_eq!(samples[4].value, 60.0);
        assert_eq!(samples[5].value, 80.0);
        assert_eq!(samples[14].timestamp, t0() + Duration::seconds(14));
    }

    #[test]
    fn test_output_is_sorted_even_for_unordered_input() {
        let intervals = vec![
            RawInterval::new(t0() + Duration::seconds(100), 2, 90.0),
            RawInterval::new(t0(), 2, 60.0),
        ];
        let samples = IntervalExpander::expand(&intervals).unwrap();
        let stamps: Vec<_> = samples.iter().map(|s| s.timestamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }

    #[test]
    fn test_malformed_intervals_fail() {
        assert!(matches!(
            IntervalExpander::expand(&[RawInterval::new(t0(), -5, 70.0)]),
            Err(CalibrationError::MalformedInterval(_))
        ));
        assert!(matches!(
            IntervalExpander::expand(&[RawInterval::new(t0(), 5, f64::NAN)]),
            Err(CalibrationError::MalformedInterval(_))
        ));
        assert!(matches!(
            IntervalExpander::expand(&[RawInterval::new(t0(), 10_000_000_000_000, 70.0)]),
            Err(CalibrationError::MalformedInterval(_))
        ));
    }
}
