//! Contextual model training
//!
//! One global model is fitted on every pair, plus one model per context that
//! has enough pairs of its own. Pairs whose context has no model are
//! predicted with the global model.

use crate::config::{CalibrationConfig, ModelKind};
use crate::error::CalibrationError;
use crate::joiner::JoinStats;
use crate::metrics::{self, MetricsSummary, ZoneClassifier};
use crate::models::FittedModel;
use crate::pipeline::{self, CalibrationInputs};
use crate::types::{CalibratedPair, Context, ModelScope, Pair};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Global model plus the per-context models that could be trained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSet {
    pub kind: ModelKind,
    pub global: FittedModel,
    /// Every context is present; `None` means it falls back to `global`
    pub by_context: BTreeMap<Context, Option<FittedModel>>,
}

impl ModelSet {
    /// Model used to predict a pair of `context`
    pub fn select(&self, context: Context) -> &FittedModel {
        self.by_context
            .get(&context)
            .and_then(Option::as_ref)
            .unwrap_or(&self.global)
    }

    /// All fitted models, global first
    pub fn models(&self) -> impl Iterator<Item = &FittedModel> {
        std::iter::once(&self.global).chain(self.by_context.values().flatten())
    }
}

/// Result of a complete calibration run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationRun {
    pub pairs: Vec<CalibratedPair>,
    pub models: ModelSet,
    pub metrics: MetricsSummary,
    pub join_stats: JoinStats,
    pub activity_threshold_bpm: f64,
}

impl CalibrationRun {
    /// Number of paired bins per context
    pub fn context_counts(&self) -> BTreeMap<Context, usize> {
        let mut counts: BTreeMap<Context, usize> =
            Context::BY_PRECEDENCE.iter().map(|&c| (c, 0)).collect();
        for pair in &self.pairs {
            *counts.entry(pair.pair.context).or_default() += 1;
        }
        counts
    }
}

/// Fits and applies contextual calibration models
#[derive(Debug, Clone, Default)]
pub struct ContextualModelTrainer {
    config: CalibrationConfig,
    zones: ZoneClassifier,
}

impl ContextualModelTrainer {
    pub fn new(config: CalibrationConfig) -> Self {
        let zones = ZoneClassifier::new(config.zone_edges.clone());
        Self { config, zones }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Fit the global model and one model per sufficiently populated context.
    pub fn train(&self, pairs: &[Pair]) -> Result<ModelSet, CalibrationError> {
        let min_samples = self.config.min_samples_per_context;
        if pairs.len() < min_samples {
            return Err(CalibrationError::insufficient(
                "global model fit",
                pairs.len(),
                min_samples,
            ));
        }

        let global = self.fit_scope(ModelScope::Global, pairs)?;

        let mut by_context = BTreeMap::new();
        for context in Context::BY_PRECEDENCE {
            let group: Vec<Pair> = pairs
                .iter()
                .filter(|p| p.context == context)
                .cloned()
                .collect();

            let model = if group.len() >= min_samples {
                Some(self.fit_scope(context.into(), &group)?)
            } else {
                if !group.is_empty() {
                    warn!(
                        %context,
                        pairs = group.len(),
                        min_samples,
                        "too few pairs for a context model, using global model"
                    );
                }
                None
            };
            by_context.insert(context, model);
        }

        info!(
            kind = %self.config.model_kind,
            pairs = pairs.len(),
            context_models = by_context.values().flatten().count(),
            "trained calibration models"
        );

        Ok(ModelSet {
            kind: self.config.model_kind,
            global,
            by_context,
        })
    }

    /// Predict every pair with the model of its context, or the global one
    pub fn apply(&self, pairs: &[Pair], models: &ModelSet) -> Vec<CalibratedPair> {
        pairs
            .iter()
            .map(|pair| {
                let model = models.select(pair.context);
                CalibratedPair {
                    pair: pair.clone(),
                    predicted_value: model.evaluate(pair.scan_value),
                    model_scope: model.scope,
                }
            })
            .collect()
    }

    /// Per-zone MAE and bias of calibrated pairs
    pub fn compute_metrics(&self, calibrated: &[CalibratedPair]) -> MetricsSummary {
        metrics::compute_metrics(calibrated, &self.zones)
    }

    /// Build pairs from `inputs`, then train, apply and evaluate.
    pub fn train_and_apply(
        &self,
        inputs: &CalibrationInputs,
    ) -> Result<CalibrationRun, CalibrationError> {
        let dataset = pipeline::build_pairs(inputs, &self.config)?;
        if dataset.pairs.is_empty() {
            return Err(CalibrationError::insufficient(
                "pair join",
                0,
                self.config.min_samples_per_context,
            ));
        }

        let models = self.train(&dataset.pairs)?;
        let pairs = self.apply(&dataset.pairs, &models);
        let metrics = self.compute_metrics(&pairs);

        info!(
            pairs = pairs.len(),
            mae = metrics.overall.mae,
            bias = metrics.overall.bias,
            "calibration complete"
        );

        Ok(CalibrationRun {
            pairs,
            models,
            metrics,
            join_stats: dataset.join_stats,
            activity_threshold_bpm: dataset.activity_threshold_bpm,
        })
    }

    fn fit_scope(&self, scope: ModelScope, pairs: &[Pair]) -> Result<FittedModel, CalibrationError> {
        let xs: Vec<f64> = pairs.iter().map(|p| p.scan_value).collect();
        let ys: Vec<f64> = pairs.iter().map(|p| p.ref_value).collect();

        let mut model =
            FittedModel::fit(self.config.model_kind, scope, &xs, &ys, &self.config.fitting)?;

        let in_sample: Vec<CalibratedPair> = pairs
            .iter()
            .map(|pair| CalibratedPair {
                pair: pair.clone(),
                predicted_value: model.evaluate(pair.scan_value),
                model_scope: scope,
            })
            .collect();
        model.metrics = Some(self.compute_metrics(&in_sample));

        debug!(
            %scope,
            kind = %model.kind,
            knots = model.knots.len(),
            n = model.n_samples,
            "fitted model"
        );
        Ok(model)
    }
}
