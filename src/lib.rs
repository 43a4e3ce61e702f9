//! HR Calibrate - contextual calibration of wearable heart rate
//!
//! Aligns a wearable's compact heart-rate intervals with point readings from a
//! reference device and fits monotonic models that map one onto the other,
//! through a deterministic pipeline: interval expansion → context annotation →
//! binning → pair joining → contextual model training.
//!
//! ## Modules
//!
//! - **Alignment**: `expander`, `annotator`, `binner`, `joiner`
//! - **Models**: isotonic and PCHIP fits in `models`, per-context training in `trainer`
//! - **Reporting**: zone metrics in `metrics`, JSON summary and dataset rows in `report`

pub mod annotator;
pub mod binner;
pub mod config;
pub mod error;
pub mod expander;
pub mod joiner;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod timeutil;
pub mod trainer;
pub mod types;

pub use config::{BinSize, CalibrationConfig, ModelKind};
pub use error::CalibrationError;
pub use models::FittedModel;
pub use pipeline::{build_pairs, calibrate, CalibrationInputs, PairedDataset};
pub use trainer::{CalibrationRun, ContextualModelTrainer, ModelSet};
pub use types::{CalibratedPair, Context, ContextInterval, ModelScope, Pair, RawInterval, Sample};

/// Crate version embedded in every summary
pub const CALIB_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for summaries
pub const PRODUCER_NAME: &str = "hr-calibrate";
