//! Calibration error metrics
//!
//! Errors are grouped by heart-rate zone of the scan value so that accuracy
//! at rest and at high intensity can be judged separately.

use crate::types::CalibratedPair;
use serde::{Deserialize, Serialize};

/// Splits heart rates into zones at ascending edges.
///
/// Edges `[100, 140, 170]` give zones `<100`, `100-140`, `140-170`, `>170`.
/// A value equal to an edge belongs to the zone above it.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneClassifier {
    edges: Vec<f64>,
}

impl Default for ZoneClassifier {
    fn default() -> Self {
        Self::new(vec![100.0, 140.0, 170.0])
    }
}

impl ZoneClassifier {
    pub fn new(edges: Vec<f64>) -> Self {
        Self { edges }
    }

    /// Index of the zone containing `bpm`
    pub fn zone_index(&self, bpm: f64) -> usize {
        self.edges.partition_point(|&edge| edge <= bpm)
    }

    /// Human-readable label of zone `idx`
    pub fn label(&self, idx: usize) -> String {
        let n = self.edges.len();
        if n == 0 {
            return "all".to_string();
        }
        if idx == 0 {
            format!("<{}", self.edges[0])
        } else if idx >= n {
            format!(">{}", self.edges[n - 1])
        } else {
            format!("{}-{}", self.edges[idx - 1], self.edges[idx])
        }
    }

    pub fn zone_count(&self) -> usize {
        self.edges.len() + 1
    }

    pub fn classify(&self, bpm: f64) -> String {
        self.label(self.zone_index(bpm))
    }
}

/// Error statistics over one group of predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMetrics {
    pub zone: String,
    pub n: usize,
    /// Mean absolute error, bpm
    pub mae: f64,
    /// Mean signed error (predicted minus reference), bpm
    pub bias: f64,
}

impl ZoneMetrics {
    fn from_errors(zone: String, errors: &[f64]) -> Self {
        let n = errors.len();
        if n == 0 {
            return Self {
                zone,
                n,
                mae: 0.0,
                bias: 0.0,
            };
        }
        let count = n as f64;
        Self {
            zone,
            n,
            mae: errors.iter().map(|e| e.abs()).sum::<f64>() / count,
            bias: errors.iter().sum::<f64>() / count,
        }
    }
}

/// Per-zone metrics plus the aggregate over all predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Zones without predictions are omitted
    pub zones: Vec<ZoneMetrics>,
    pub overall: ZoneMetrics,
}

impl MetricsSummary {
    pub fn zone(&self, label: &str) -> Option<&ZoneMetrics> {
        self.zones.iter().find(|z| z.zone == label)
    }
}

/// Compute MAE and bias per zone of the scan value, plus overall
pub fn compute_metrics(pairs: &[CalibratedPair], zones: &ZoneClassifier) -> MetricsSummary {
    let mut per_zone: Vec<Vec<f64>> = vec![Vec::new(); zones.zone_count()];
    let mut all = Vec::with_capacity(pairs.len());

    for pair in pairs {
        let err = pair.error();
        per_zone[zones.zone_index(pair.pair.scan_value)].push(err);
        all.push(err);
    }

    let zone_metrics = per_zone
        .iter()
        .enumerate()
        .filter(|(_, errors)| !errors.is_empty())
        .map(|(idx, errors)| ZoneMetrics::from_errors(zones.label(idx), errors))
        .collect();

    MetricsSummary {
        zones: zone_metrics,
        overall: ZoneMetrics::from_errors("all".to_string(), &all),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Context, ModelScope, Pair};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn calibrated(scan: f64, reference: f64, predicted: f64) -> CalibratedPair {
        CalibratedPair {
            pair: Pair {
                bin_start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                scan_value: scan,
                ref_value: reference,
                context: Context::Rest,
                scan_coverage: 60.0,
                ref_coverage: 1.0,
            },
            predicted_value: predicted,
            model_scope: ModelScope::Global,
        }
    }

    #[test]
    fn test_zone_labels() {
        let zones = ZoneClassifier::default();
        assert_eq!(zones.classify(60.0), "<100");
        assert_eq!(zones.classify(100.0), "100-140");
        assert_eq!(zones.classify(150.0), "140-170");
        assert_eq!(zones.classify(170.0), ">170");
        assert_eq!(zones.zone_count(), 4);

        let fractional = ZoneClassifier::new(vec![92.5]);
        assert_eq!(fractional.classify(80.0), "<92.5");
        assert_eq!(ZoneClassifier::new(vec![]).classify(80.0), "all");
    }

    #[test]
    fn test_mae_and_bias() {
        let pairs = vec![
            calibrated(60.0, 62.0, 60.0),
            calibrated(70.0, 70.0, 74.0),
            calibrated(150.0, 150.0, 147.0),
        ];
        let summary = compute_metrics(&pairs, &ZoneClassifier::default());

        assert_eq!(
            summary.zone("<100"),
            Some(&ZoneMetrics {
                zone: "<100".to_string(),
                n: 2,
                mae: 3.0,
                bias: 1.0,
            })
        );
        assert_eq!(summary.zone("140-170").unwrap().bias, -3.0);
        assert_eq!(summary.zone("100-140"), None);

        assert_eq!(summary.overall.n, 3);
        assert!((summary.overall.mae - 3.0).abs() < 1e-12);
        assert!((summary.overall.bias - (-1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_metrics() {
        let summary = compute_metrics(&[], &ZoneClassifier::default());
        assert!(summary.zones.is_empty());
        assert_eq!(summary.overall.n, 0);
        assert_eq!(summary.overall.mae, 0.0);
    }
}
