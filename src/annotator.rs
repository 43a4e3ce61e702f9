//! Context annotation
//!
//! Labels each sample with a physiological context. Sleep and sport come from
//! auxiliary interval tables; anything else is active or rest depending on
//! how far the sample sits above the resting heart rate.
//!
//! Resolution order: sleep > sport > active > rest.

use crate::config::ActivityConfig;
use crate::types::{Context, ContextInterval, IntervalKind, Sample};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Sorted, merged index of half-open intervals for O(log n) membership tests.
///
/// Overlapping or touching input intervals are merged at construction, so
/// both `starts` and `ends` are strictly increasing and `ends[i] < starts[i + 1]`.
#[derive(Debug, Clone, Default)]
pub struct IntervalIndex {
    starts: Vec<DateTime<Utc>>,
    ends: Vec<DateTime<Utc>>,
}

impl IntervalIndex {
    /// Build an index from `(start, end)` ranges; empty ranges are ignored
    pub fn new(ranges: impl IntoIterator<Item = (DateTime<Utc>, DateTime<Utc>)>) -> Self {
        let mut ranges: Vec<_> = ranges.into_iter().filter(|(s, e)| s < e).collect();
        ranges.sort();

        let mut starts: Vec<DateTime<Utc>> = Vec::with_capacity(ranges.len());
        let mut ends: Vec<DateTime<Utc>> = Vec::with_capacity(ranges.len());

        for (start, end) in ranges {
            match ends.last_mut() {
                Some(last_end) if start <= *last_end => {
                    if end > *last_end {
                        *last_end = end;
                    }
                }
                _ => {
                    starts.push(start);
                    ends.push(end);
                }
            }
        }

        Self { starts, ends }
    }

    /// Index every interval of `kind`
    pub fn of_kind(intervals: &[ContextInterval], kind: IntervalKind) -> Self {
        Self::new(
            intervals
                .iter()
                .filter(|i| i.kind == kind)
                .map(|i| (i.start, i.end)),
        )
    }

    /// Whether `ts` falls inside any indexed interval
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        // Last interval starting at or before ts
        let idx = self.starts.partition_point(|&start| start <= ts);
        idx > 0 && ts < self.ends[idx - 1]
    }

    /// Number of disjoint intervals after merging
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

/// Heart-rate level above which a sample counts as active
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityThreshold {
    pub resting_baseline_bpm: f64,
    pub active_margin_bpm: f64,
}

impl ActivityThreshold {
    /// Resolve the threshold from configuration, estimating the resting
    /// baseline from `samples` when none is configured.
    ///
    /// With no configured baseline and no samples, nothing is ever active.
    pub fn resolve(config: &ActivityConfig, samples: &[Sample]) -> Self {
        let resting_baseline_bpm = config.resting_baseline_bpm.unwrap_or_else(|| {
            let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
            percentile(&values, config.baseline_percentile).unwrap_or(f64::INFINITY)
        });

        debug!(
            resting_baseline_bpm,
            active_margin_bpm = config.active_margin_bpm,
            "activity threshold resolved"
        );

        Self {
            resting_baseline_bpm,
            active_margin_bpm: config.active_margin_bpm,
        }
    }

    pub fn threshold_bpm(&self) -> f64 {
        self.resting_baseline_bpm + self.active_margin_bpm
    }

    pub fn is_active(&self, value: f64) -> bool {
        value > self.threshold_bpm()
    }
}

/// Assigns a context to timestamps using immutable interval indexes
#[derive(Debug, Clone)]
pub struct ContextAnnotator {
    sleep: IntervalIndex,
    sport: IntervalIndex,
    activity: ActivityThreshold,
}

impl ContextAnnotator {
    pub fn new(sleep: IntervalIndex, sport: IntervalIndex, activity: ActivityThreshold) -> Self {
        Self {
            sleep,
            sport,
            activity,
        }
    }

    /// Build sleep and sport indexes from a mixed interval table
    pub fn from_intervals(intervals: &[ContextInterval], activity: ActivityThreshold) -> Self {
        Self::new(
            IntervalIndex::of_kind(intervals, IntervalKind::Sleep),
            IntervalIndex::of_kind(intervals, IntervalKind::Sport),
            activity,
        )
    }

    /// Context of a timestamp given the heart-rate value observed there
    pub fn context_at(&self, ts: DateTime<Utc>, value: f64) -> Context {
        if self.sleep.contains(ts) {
            Context::Sleep
        } else if self.sport.contains(ts) {
            Context::Sport
        } else if self.activity.is_active(value) {
            Context::Active
        } else {
            Context::Rest
        }
    }

    /// Pair every sample with its context
    pub fn annotate<'a, I>(&'a self, samples: I) -> impl Iterator<Item = (Sample, Context)> + 'a
    where
        I: IntoIterator<Item = Sample>,
        I::IntoIter: 'a,
    {
        samples
            .into_iter()
            .map(move |s| (s, self.context_at(s.timestamp, s.value)))
    }

    pub fn activity(&self) -> &ActivityThreshold {
        &self.activity
    }
}

/// Linear-interpolated percentile of `values`, `q` in [0, 1]
pub(crate) fn percentile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn threshold(baseline: f64) -> ActivityThreshold {
        ActivityThreshold {
            resting_baseline_bpm: baseline,
            active_margin_bpm: 30.0,
        }
    }

    #[test]
    fn test_interval_index_membership() {
        let index = IntervalIndex::new(vec![(t(10), t(20)), (t(40), t(50))]);

        assert!(!index.contains(t(9)));
        assert!(index.contains(t(10)));
        assert!(index.contains(t(19)));
        assert!(!index.contains(t(20)));
        assert!(!index.contains(t(30)));
        assert!(index.contains(t(45)));
        assert!(!index.contains(t(50)));
    }

    #[test]
    fn test_interval_index_merges_overlaps() {
        let index = IntervalIndex::new(vec![
            (t(30), t(40)),
            (t(0), t(10)),
            (t(5), t(15)),
            (t(15), t(20)),
            (t(32), t(35)),
            (t(60), t(60)),
        ]);

        assert_eq!(index.len(), 2);
        assert!(index.contains(t(17)));
        assert!(!index.contains(t(20)));
        assert!(index.contains(t(39)));
        assert!(!index.contains(t(60)));
    }

    #[test]
    fn test_empty_index() {
        let index = IntervalIndex::default();
        assert!(index.is_empty());
        assert!(!index.contains(t(0)));
    }

    #[test]
    fn test_context_precedence() {
        let intervals = vec![
            ContextInterval::new(t(0), t(100), IntervalKind::Sleep),
            ContextInterval::new(t(50), t(150), IntervalKind::Sport),
        ];
        let annotator = ContextAnnotator::from_intervals(&intervals, threshold(60.0));

        // sleep beats sport and activity
        assert_eq!(annotator.context_at(t(60), 150.0), Context::Sleep);
        // sport beats activity
        assert_eq!(annotator.context_at(t(120), 150.0), Context::Sport);
        // outside intervals: threshold decides
        assert_eq!(annotator.context_at(t(200), 95.0), Context::Active);
        assert_eq!(annotator.context_at(t(200), 90.0), Context::Rest);
    }

    #[test]
    fn test_annotate_is_total() {
        let annotator = ContextAnnotator::from_intervals(&[], threshold(60.0));
        let samples: Vec<Sample> = (0..10).map(|i| Sample::new(t(i), 50.0 + 10.0 * i as f64)).collect();
        let labelled: Vec<_> = annotator.annotate(samples).collect();

        assert_eq!(labelled.len(), 10);
        assert_eq!(labelled[0].1, Context::Rest);
        assert_eq!(labelled[9].1, Context::Active);
    }

    #[test]
    fn test_threshold_estimated_from_samples() {
        let config = ActivityConfig {
            resting_baseline_bpm: None,
            active_margin_bpm: 20.0,
            baseline_percentile: 0.0,
        };
        let samples: Vec<Sample> = [55.0, 70.0, 120.0]
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(t(i as i64), v))
            .collect();

        let activity = ActivityThreshold::resolve(&config, &samples);
        assert_eq!(activity.resting_baseline_bpm, 55.0);
        assert_eq!(activity.threshold_bpm(), 75.0);
    }

    #[test]
    fn test_threshold_without_data_is_never_active() {
        let activity = ActivityThreshold::resolve(&ActivityConfig::default(), &[]);
        assert!(!activity.is_active(250.0));
    }

    #[test]
    fn test_percentile() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 0.5), Some(30.0));
        assert_eq!(percentile(&values, 1.0), Some(50.0));
        assert_eq!(percentile(&values, 0.125), Some(15.0));
        assert_eq!(percentile(&[], 0.5), None);
    }

    proptest! {
        #[test]
        fn prop_context_follows_precedence(
            sleep in prop::collection::vec((0i64..1000, 0i64..300), 0..6),
            sport in prop::collection::vec((0i64..1000, 0i64..300), 0..6),
            probes in prop::collection::vec((0i64..1400, 40.0f64..200.0), 1..50),
        ) {
            let mut intervals: Vec<ContextInterval> = sleep
                .iter()
                .map(|&(s, len)| ContextInterval::new(t(s), t(s + len), IntervalKind::Sleep))
                .collect();
            intervals.extend(
                sport
                    .iter()
                    .map(|&(s, len)| ContextInterval::new(t(s), t(s + len), IntervalKind::Sport)),
            );
            let activity = threshold(60.0);
            let annotator = ContextAnnotator::from_intervals(&intervals, activity);

            for &(at, value) in &probes {
                let ts = t(at);
                let in_kind = |kind: IntervalKind| intervals.iter().any(|i| i.kind == kind && i.contains(ts));
                let expected = if in_kind(IntervalKind::Sleep) {
                    Context::Sleep
                } else if in_kind(IntervalKind::Sport) {
                    Context::Sport
                } else if value > activity.threshold_bpm() {
                    Context::Active
                } else {
                    Context::Rest
                };
                prop_assert_eq!(annotator.context_at(ts, value), expected);
            }
        }
    }
}
