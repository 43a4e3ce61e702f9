//! Pair joining
//!
//! Aligns scan bins with reference bins on bin start. Rows that lack either
//! side, or whose data quality is insufficient, are dropped silently: sparse
//! coverage is an expected property of wearable exports.

use crate::config::CalibrationConfig;
use crate::types::{Bin, Pair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Why joined rows were discarded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStats {
    pub scan_bins: usize,
    pub reference_bins: usize,
    pub unmatched: usize,
    pub low_scan_coverage: usize,
    pub low_ref_points: usize,
    pub out_of_range: usize,
    pub paired: usize,
}

/// Inner join of scan and reference bins with quality gating
#[derive(Debug, Clone)]
pub struct PairJoiner {
    min_scan_coverage_s: f64,
    min_ref_points: f64,
    hr_valid_range: Option<(f64, f64)>,
}

impl PairJoiner {
    /// Joiner gated only by scan coverage
    pub fn new(min_scan_coverage_s: f64) -> Self {
        Self {
            min_scan_coverage_s,
            min_ref_points: 0.0,
            hr_valid_range: None,
        }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            min_scan_coverage_s: config.min_scan_coverage_s,
            min_ref_points: config.min_ref_points,
            hr_valid_range: Some(config.hr_valid_range),
        }
    }

    /// Require at least `points` reference readings per bin
    pub fn with_min_ref_points(mut self, points: f64) -> Self {
        self.min_ref_points = points;
        self
    }

    /// Drop pairs where either value is outside `[lo, hi]`
    pub fn with_hr_valid_range(mut self, lo: f64, hi: f64) -> Self {
        self.hr_valid_range = Some((lo, hi));
        self
    }

    pub fn join(&self, scan: &[Bin], reference: &[Bin]) -> Vec<Pair> {
        self.join_with_stats(scan, reference).0
    }

    /// Join bins and report how many rows each filter removed
    pub fn join_with_stats(&self, scan: &[Bin], reference: &[Bin]) -> (Vec<Pair>, JoinStats) {
        let by_start: HashMap<DateTime<Utc>, &Bin> =
            reference.iter().map(|b| (b.bin_start, b)).collect();

        let mut stats = JoinStats {
            scan_bins: scan.len(),
            reference_bins: reference.len(),
            ..Default::default()
        };
        let mut pairs = Vec::new();

        for scan_bin in scan {
            let Some(ref_bin) = by_start.get(&scan_bin.bin_start) else {
                stats.unmatched += 1;
                continue;
            };
            if scan_bin.coverage_seconds < self.min_scan_coverage_s {
                stats.low_scan_coverage += 1;
                continue;
            }
            if ref_bin.coverage_seconds < self.min_ref_points {
                stats.low_ref_points += 1;
                continue;
            }
            if let Some((lo, hi)) = self.hr_valid_range {
                let in_range = |v: f64| (lo..=hi).contains(&v);
                if !in_range(scan_bin.aggregated_value) || !in_range(ref_bin.aggregated_value) {
                    stats.out_of_range += 1;
                    continue;
                }
            }

            pairs.push(Pair {
                bin_start: scan_bin.bin_start,
                scan_value: scan_bin.aggregated_value,
                ref_value: ref_bin.aggregated_value,
                context: scan_bin.context,
                scan_coverage: scan_bin.coverage_seconds,
                ref_coverage: ref_bin.coverage_seconds,
            });
        }

        pairs.sort_by_key(|p| p.bin_start);
        stats.paired = pairs.len();

        debug!(
            paired = stats.paired,
            unmatched = stats.unmatched,
            low_scan_coverage = stats.low_scan_coverage,
            low_ref_points = stats.low_ref_points,
            out_of_range = stats.out_of_range,
            "joined scan and reference bins"
        );

        (pairs, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Context;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn bin(minute: i64, value: f64, coverage: f64, context: Context) -> Bin {
        Bin {
            bin_start: t(minute),
            aggregated_value: value,
            coverage_seconds: coverage,
            context,
        }
    }

    #[test]
    fn test_full_coverage_minute_pairs() {
        let scan = vec![bin(0, 70.0, 60.0, Context::Rest)];
        let reference = vec![bin(0, 72.0, 1.0, Context::Rest)];

        let pairs = PairJoiner::new(30.0).join(&scan, &reference);

        assert_eq!(
            pairs,
            vec![Pair {
                bin_start: t(0),
                scan_value: 70.0,
                ref_value: 72.0,
                context: Context::Rest,
                scan_coverage: 60.0,
                ref_coverage: 1.0,
            }]
        );
    }

    #[test]
    fn test_low_scan_coverage_is_dropped() {
        let scan = vec![bin(0, 70.0, 10.0, Context::Rest)];
        let reference = vec![bin(0, 72.0, 5.0, Context::Rest)];

        let (pairs, stats) = PairJoiner::new(30.0).join_with_stats(&scan, &reference);

        assert!(pairs.is_empty());
        assert_eq!(stats.low_scan_coverage, 1);
    }

    #[test]
    fn test_unmatched_bins_are_dropped() {
        let scan = vec![bin(0, 70.0, 60.0, Context::Rest), bin(1, 75.0, 60.0, Context::Rest)];
        let reference = vec![bin(1, 76.0, 3.0, Context::Rest), bin(2, 80.0, 3.0, Context::Rest)];

        let (pairs, stats) = PairJoiner::new(30.0).join_with_stats(&scan, &reference);

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].bin_start, t(1));
        assert_eq!(stats.unmatched, 1);
    }

    #[test]
    fn test_context_comes_from_scan_bin() {
        let scan = vec![bin(0, 70.0, 60.0, Context::Sleep)];
        let reference = vec![bin(0, 72.0, 2.0, Context::Active)];

        let pairs = PairJoiner::new(0.0).join(&scan, &reference);
        assert_eq!(pairs[0].context, Context::Sleep);
    }

    #[test]
    fn test_quality_filters() {
        let scan = vec![
            bin(0, 70.0, 60.0, Context::Rest),
            bin(1, 250.0, 60.0, Context::Rest),
            bin(2, 70.0, 60.0, Context::Rest),
        ];
        let reference = vec![
            bin(0, 72.0, 0.0, Context::Rest),
            bin(1, 150.0, 4.0, Context::Rest),
            bin(2, 71.0, 4.0, Context::Rest),
        ];

        let joiner = PairJoiner::new(30.0)
            .with_min_ref_points(1.0)
            .with_hr_valid_range(30.0, 230.0);
        let (pairs, stats) = joiner.join_with_stats(&scan, &reference);

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].bin_start, t(2));
        assert_eq!(stats.low_ref_points, 1);
        assert_eq!(stats.out_of_range, 1);
    }

    #[test]
    fn test_from_config_uses_configured_gates() {
        let config = CalibrationConfig::default();
        let joiner = PairJoiner::from_config(&config);

        let scan = vec![bin(0, 70.0, config.min_scan_coverage_s - 1.0, Context::Rest)];
        let reference = vec![bin(0, 72.0, 1.0, Context::Rest)];
        assert!(joiner.join(&scan, &reference).is_empty());
    }

    proptest! {
        #[test]
        fn prop_every_pair_meets_coverage_minimum(
            scan in prop::collection::btree_map(0i64..120, (40.0f64..200.0, 0.0f64..=60.0), 0..80),
            reference in prop::collection::btree_map(0i64..120, (40.0f64..200.0, 1.0f64..6.0), 0..80),
            min_coverage in 0.0f64..=60.0,
        ) {
            let scan_bins: Vec<Bin> = scan
                .iter()
                .map(|(&m, &(v, c))| bin(m, v, c, Context::Rest))
                .collect();
            let reference_bins: Vec<Bin> = reference
                .iter()
                .map(|(&m, &(v, c))| bin(m, v, c, Context::Rest))
                .collect();

            let (pairs, stats) =
                PairJoiner::new(min_coverage).join_with_stats(&scan_bins, &reference_bins);

            prop_assert!(pairs.iter().all(|p| p.scan_coverage >= min_coverage));
            prop_assert!(pairs.windows(2).all(|w| w[0].bin_start < w[1].bin_start));

            let expected = scan
                .iter()
                .filter(|(m, v)| reference.contains_key(*m) && v.1 >= min_coverage)
                .count();
            prop_assert_eq!(pairs.len(), expected);
            prop_assert_eq!(
                stats.paired + stats.unmatched + stats.low_scan_coverage,
                stats.scan_bins
            );
        }
    }
}
