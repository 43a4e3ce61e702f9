//! Run reports
//!
//! This module turns a finished [`CalibrationRun`] into its output documents:
//! a JSON summary of the fitted models and metrics, and flat dataset rows
//! with temporal features for tabular export.

use crate::config::{CalibrationConfig, ModelKind};
use crate::error::CalibrationError;
use crate::joiner::JoinStats;
use crate::metrics::MetricsSummary;
use crate::models::FittedModel;
use crate::trainer::CalibrationRun;
use crate::types::{CalibratedPair, Context, ModelScope};
use crate::{CALIB_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Who produced a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub run_id: String,
}

/// JSON summary of a calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub producer: Producer,
    pub computed_at_utc: String,
    /// Requested model family; individual models may have fallen back
    pub model_kind: ModelKind,
    pub models: BTreeMap<ModelScope, FittedModel>,
    /// Contexts that are predicted with the global model
    pub fallback_contexts: Vec<Context>,
    pub metrics: MetricsSummary,
    pub pairs_per_context: BTreeMap<Context, usize>,
    pub join_stats: JoinStats,
    pub activity_threshold_bpm: f64,
    pub config: CalibrationConfig,
}

impl CalibrationSummary {
    pub fn to_json(&self) -> Result<String, CalibrationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One calibrated bin flattened for CSV export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub bin_start: DateTime<Utc>,
    pub scan_value: f64,
    pub ref_value: f64,
    pub context: Context,
    pub scan_coverage: f64,
    pub ref_coverage: f64,
    pub predicted_value: f64,
    pub model_scope: ModelScope,
    /// Hour of day in the configured timezone, 0-23
    pub local_hour: u32,
    /// Day of week in the configured timezone, Monday = 0
    pub local_weekday: u32,
}

impl DatasetRow {
    pub fn from_calibrated(pair: &CalibratedPair, tz: &Tz) -> Self {
        let local = pair.pair.bin_start.with_timezone(tz);
        Self {
            bin_start: pair.pair.bin_start,
            scan_value: pair.pair.scan_value,
            ref_value: pair.pair.ref_value,
            context: pair.pair.context,
            scan_coverage: pair.pair.scan_coverage,
            ref_coverage: pair.pair.ref_coverage,
            predicted_value: pair.predicted_value,
            model_scope: pair.model_scope,
            local_hour: local.hour(),
            local_weekday: local.weekday().num_days_from_monday(),
        }
    }
}

/// Builds reports for calibration runs
pub struct ReportEncoder {
    run_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create an encoder with a fresh run id
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_run_id(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn summarize(&self, run: &CalibrationRun, config: &CalibrationConfig) -> CalibrationSummary {
        let mut models = BTreeMap::new();
        let mut fallback_contexts = Vec::new();
        models.insert(ModelScope::Global, run.models.global.clone());
        for (&context, model) in &run.models.by_context {
            match model {
                Some(model) => {
                    models.insert(model.scope, model.clone());
                }
                None => fallback_contexts.push(context),
            }
        }

        CalibrationSummary {
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: CALIB_VERSION.to_string(),
                run_id: self.run_id.clone(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            model_kind: run.models.kind,
            models,
            fallback_contexts,
            metrics: run.metrics.clone(),
            pairs_per_context: run.context_counts(),
            join_stats: run.join_stats.clone(),
            activity_threshold_bpm: run.activity_threshold_bpm,
            config: config.clone(),
        }
    }

    /// Flatten calibrated pairs with local-time features in `config`'s timezone
    pub fn dataset_rows(
        &self,
        run: &CalibrationRun,
        config: &CalibrationConfig,
    ) -> Result<Vec<DatasetRow>, CalibrationError> {
        let tz = config.tz()?;
        Ok(run
            .pairs
            .iter()
            .map(|pair| DatasetRow::from_calibrated(pair, &tz))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{calibrate, CalibrationInputs};
    use crate::types::{ContextInterval, IntervalKind, RawInterval, Sample};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        // Monday
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn run_fixture() -> (CalibrationRun, CalibrationConfig) {
        let mut config = CalibrationConfig::default();
        config.model_kind = ModelKind::Isotonic;
        config.activity.resting_baseline_bpm = Some(60.0);

        let inputs = CalibrationInputs {
            scan: (0..12)
                .map(|m| RawInterval::new(t(m * 60), 60, 55.0 + m as f64))
                .collect(),
            reference: (0..12)
                .map(|m| Sample::new(t(m * 60 + 20), 56.0 + m as f64))
                .collect(),
            context_intervals: vec![ContextInterval::new(t(0), t(120), IntervalKind::Sleep)],
        };
        (calibrate(&inputs, &config).unwrap(), config)
    }

    #[test]
    fn test_summary_lists_fallbacks() {
        let (run, config) = run_fixture();
        let encoder = ReportEncoder::with_run_id("test-run".to_string());
        let summary = encoder.summarize(&run, &config);

        assert_eq!(summary.producer.run_id, "test-run");
        assert_eq!(summary.producer.name, PRODUCER_NAME);
        assert!(summary.models.contains_key(&ModelScope::Global));
        assert!(summary.models.contains_key(&ModelScope::Rest));
        assert!(summary.fallback_contexts.contains(&Context::Sleep));
        assert_eq!(summary.pairs_per_context[&Context::Sleep], 2);
        assert_eq!(summary.pairs_per_context[&Context::Rest], 10);

        let json = summary.to_json().unwrap();
        let parsed: CalibrationSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.models.keys().collect::<Vec<_>>(),
            vec![&ModelScope::Global, &ModelScope::Rest]
        );
        assert_eq!(parsed.fallback_contexts, summary.fallback_contexts);
    }

    #[test]
    fn test_dataset_rows_use_local_time() {
        let (run, config) = run_fixture();
        let rows = ReportEncoder::new().dataset_rows(&run, &config).unwrap();

        assert_eq!(rows.len(), 12);
        // 00:00 UTC is 01:00 in Rome in winter
        assert_eq!(rows[0].local_hour, 1);
        assert_eq!(rows[0].local_weekday, 0);
        assert_eq!(rows[0].context, Context::Sleep);
        assert_eq!(rows[5].model_scope, ModelScope::Rest);
    }

    #[test]
    fn test_local_columns_cross_midnight() {
        let sunday_late = Utc.with_ymd_and_hms(2023, 12, 31, 23, 30, 0).unwrap();
        let pair = CalibratedPair {
            pair: crate::types::Pair {
                bin_start: sunday_late,
                scan_value: 70.0,
                ref_value: 71.0,
                context: Context::Rest,
                scan_coverage: 60.0,
                ref_coverage: 1.0,
            },
            predicted_value: 70.5,
            model_scope: ModelScope::Global,
        };

        let row = DatasetRow::from_calibrated(&pair, &chrono_tz::Europe::Rome);
        assert_eq!(row.local_hour, 0);
        assert_eq!(row.local_weekday, 0);

        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("local_hour").is_some());
        assert!(json.get("hour").is_none());
    }

    #[test]
    fn test_unique_run_ids() {
        assert_ne!(ReportEncoder::new().run_id(), ReportEncoder::new().run_id());
    }
}
