//! Pipeline orchestration
//!
//! This module wires the alignment stages together and exposes the one-call
//! public API of the crate.
//!
//! Pipeline stages:
//! 1. IntervalExpander - scan intervals to per-second samples
//! 2. ContextAnnotator - sleep / sport / active / rest per sample
//! 3. Binner - fixed-width bins for both series
//! 4. PairJoiner - coverage-gated inner join on bin start
//! 5. ContextualModelTrainer - per-context monotonic models (see `trainer`)

use crate::annotator::{ActivityThreshold, ContextAnnotator};
use crate::binner::Binner;
use crate::config::CalibrationConfig;
use crate::error::CalibrationError;
use crate::expander::IntervalExpander;
use crate::joiner::{JoinStats, PairJoiner};
use crate::trainer::{CalibrationRun, ContextualModelTrainer};
use crate::types::{ContextInterval, Pair, RawInterval, Sample};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Everything a calibration run consumes, already parsed and in UTC
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationInputs {
    /// Scan series of the device being calibrated
    pub scan: Vec<RawInterval>,
    /// Point readings of the reference device
    pub reference: Vec<Sample>,
    /// Sleep and sport intervals
    pub context_intervals: Vec<ContextInterval>,
}

/// Output of the alignment stages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairedDataset {
    pub pairs: Vec<Pair>,
    pub join_stats: JoinStats,
    /// Heart rate above which a sample was labelled active
    pub activity_threshold_bpm: f64,
}

/// Run stages 1-4: expand, annotate, bin both series and join them.
pub fn build_pairs(
    inputs: &CalibrationInputs,
    config: &CalibrationConfig,
) -> Result<PairedDataset, CalibrationError> {
    config.validate()?;

    // Stage 1: expand scan intervals
    let scan_samples = IntervalExpander::expand(&inputs.scan)?;

    let reference: Vec<Sample> = inputs
        .reference
        .iter()
        .copied()
        .filter(|s| s.value.is_finite())
        .collect();
    if reference.len() < inputs.reference.len() {
        warn!(
            dropped = inputs.reference.len() - reference.len(),
            "ignoring non-finite reference readings"
        );
    }

    debug!(
        scan_samples = scan_samples.len(),
        reference_samples = reference.len(),
        context_intervals = inputs.context_intervals.len(),
        "expanded inputs"
    );

    // Stage 2: build the context index once for both series
    let activity = ActivityThreshold::resolve(&config.activity, &scan_samples);
    let annotator = ContextAnnotator::from_intervals(&inputs.context_intervals, activity);

    // Stage 3: bin both series
    let binner = Binner::new(config.bin_size);
    let scan_bins = binner.bin(annotator.annotate(scan_samples));
    let reference_bins = binner.bin(annotator.annotate(reference));

    debug!(
        scan_bins = scan_bins.len(),
        reference_bins = reference_bins.len(),
        bin_size = %config.bin_size,
        "binned series"
    );

    if config.min_scan_coverage_s > f64::from(config.bin_size.seconds()) {
        warn!(
            min_scan_coverage_s = config.min_scan_coverage_s,
            bin_size = %config.bin_size,
            "minimum scan coverage exceeds the bin width; no bin can be paired"
        );
    }

    // Stage 4: join
    let (pairs, join_stats) =
        PairJoiner::from_config(config).join_with_stats(&scan_bins, &reference_bins);

    Ok(PairedDataset {
        pairs,
        join_stats,
        activity_threshold_bpm: annotator.activity().threshold_bpm(),
    })
}

/// Run the full calibration pipeline with `config`.
///
/// # Example
/// ```ignore
/// let run = calibrate(&inputs, &CalibrationConfig::default())?;
/// println!("overall MAE: {:.2}", run.metrics.overall.mae);
/// ```
pub fn calibrate(
    inputs: &CalibrationInputs,
    config: &CalibrationConfig,
) -> Result<CalibrationRun, CalibrationError> {
    ContextualModelTrainer::new(config.clone()).train_and_apply(inputs)
}
