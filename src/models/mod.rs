//! Monotonic calibration models
//!
//! A [`FittedModel`] maps a scan heart rate to a calibrated heart rate through
//! an ordered list of knots. The model family is a tag ([`ModelKind`]):
//! isotonic models interpolate linearly between knots, PCHIP models use a
//! shape-preserving cubic Hermite interpolant. Both are non-decreasing.

mod isotonic;
mod pchip;

pub(crate) use isotonic::pava;

use crate::config::{FittingConfig, ModelKind};
use crate::error::CalibrationError;
use crate::metrics::MetricsSummary;
use crate::types::ModelScope;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fewer PCHIP knots than this fall back to an isotonic fit
pub const MIN_KNOTS_FOR_PCHIP: usize = 3;

/// Control point of a piecewise interpolant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Knot {
    pub x: f64,
    pub y: f64,
}

impl Knot {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A trained monotonic mapping from scan value to reference value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub scope: ModelScope,
    pub kind: ModelKind,
    /// Strictly increasing in `x`, non-decreasing in `y`
    pub knots: Vec<Knot>,
    pub clip_lo: f64,
    pub clip_hi: f64,
    /// Number of pairs the model was trained on
    pub n_samples: usize,
    /// In-sample error of the model on its training pairs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSummary>,
}

impl FittedModel {
    /// Fit a model of `kind` on `(xs[i], ys[i])` pairs.
    ///
    /// Non-finite pairs are ignored. A PCHIP fit that yields fewer than
    /// [`MIN_KNOTS_FOR_PCHIP`] knots is replaced by an isotonic fit.
    pub fn fit(
        kind: ModelKind,
        scope: ModelScope,
        xs: &[f64],
        ys: &[f64],
        params: &FittingConfig,
    ) -> Result<Self, CalibrationError> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = xs
            .iter()
            .zip(ys)
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(&x, &y)| (x, y))
            .unzip();

        if xs.is_empty() {
            return Err(CalibrationError::insufficient(
                format!("{scope} model fit"),
                0,
                1,
            ));
        }

        let (kind, knots) = match kind {
            ModelKind::Isotonic => (ModelKind::Isotonic, isotonic::fit(&xs, &ys)),
            ModelKind::Pchip => {
                let knots =
                    pchip::fit_knots(&xs, &ys, params.pchip_bins, params.min_points_per_knot);
                if knots.len() < MIN_KNOTS_FOR_PCHIP {
                    debug!(
                        %scope,
                        knots = knots.len(),
                        "too few PCHIP knots, falling back to isotonic"
                    );
                    (ModelKind::Isotonic, isotonic::fit(&xs, &ys))
                } else {
                    (ModelKind::Pchip, knots)
                }
            }
        };

        let knots = knots
            .into_iter()
            .map(|k| Knot::new(k.x, k.y.clamp(params.clip_lo, params.clip_hi)))
            .collect();

        Ok(Self {
            scope,
            kind,
            knots,
            clip_lo: params.clip_lo,
            clip_hi: params.clip_hi,
            n_samples: xs.len(),
            metrics: None,
        })
    }

    /// Predict the calibrated value for scan value `x`.
    ///
    /// Inputs outside the knot range take the boundary knot's value.
    pub fn evaluate(&self, x: f64) -> f64 {
        let (Some(first), Some(last)) = (self.knots.first(), self.knots.last()) else {
            return x.clamp(self.clip_lo, self.clip_hi);
        };
        if x.is_nan() {
            return f64::NAN;
        }
        if x <= first.x {
            return first.y;
        }
        if x >= last.x {
            return last.y;
        }

        let y = match self.kind {
            ModelKind::Isotonic => isotonic::interpolate(&self.knots, x),
            ModelKind::Pchip => pchip::interpolate(&self.knots, x),
        };
        y.clamp(self.clip_lo, self.clip_hi)
    }

    /// Predict a batch of scan values
    pub fn evaluate_all(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.evaluate(x)).collect()
    }

    /// Knot x range covered by the model
    pub fn domain(&self) -> Option<(f64, f64)> {
        Some((self.knots.first()?.x, self.knots.last()?.x))
    }
}

/// Index of the segment `[knots[k].x, knots[k + 1].x]` containing `x`.
///
/// Requires `knots[0].x < x < knots[last].x`.
fn segment(knots: &[Knot], x: f64) -> usize {
    knots.partition_point(|k| k.x <= x).saturating_sub(1).min(knots.len() - 2)
}
