//! Error types for HR Calibrate

use thiserror::Error;

/// Errors that can occur while building pairs or fitting calibration models
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Malformed interval: {0}")]
    MalformedInterval(String),

    #[error("{stage} failed: only {found} pairs, minimum is {required}")]
    InsufficientData {
        stage: String,
        found: usize,
        required: usize,
    },

    #[error("Invalid bin size: {0}")]
    InvalidBinSize(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Date parse error: {0}")]
    DateParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CalibrationError {
    pub(crate) fn insufficient(stage: impl Into<String>, found: usize, required: usize) -> Self {
        CalibrationError::InsufficientData {
            stage: stage.into(),
            found,
            required,
        }
    }
}
