//! End-to-end pipeline: feature engineering, both base models and the
//! ensemble combination behind one training/prediction surface.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{align_series, DailyBar, SampleSet};
use crate::ensemble::{
    EnsembleCombiner, EnsembleConfig, PredictionResult, StackingCombiner, StackingConfig,
    WeightSnapshot,
};
use crate::error::PredictorError;
use crate::features::{FeatureConfig, FeatureEngineer, FeatureSchema};
use crate::models::{
    BayesianConfig, BayesianRegressor, TreeEnsemble, TreeEnsembleConfig,
};

/// Which combination strategy serves predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendStrategy {
    /// Regime-weighted dynamic blending (the shipped default)
    RegimeWeighted,
    /// K-fold stacking meta-model
    Stacking,
}

/// Aggregated configuration surface for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub features: FeatureConfig,
    pub bayesian: BayesianConfig,
    pub trees: TreeEnsembleConfig,
    pub ensemble: EnsembleConfig,
    pub stacking: StackingConfig,
    pub strategy: BlendStrategy,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            bayesian: BayesianConfig::default(),
            trees: TreeEnsembleConfig::default(),
            ensemble: EnsembleConfig::default(),
            stacking: StackingConfig::default(),
            strategy: BlendStrategy::RegimeWeighted,
        }
    }
}

/// The full next-session range predictor.
#[derive(Debug)]
pub struct EnsemblePredictor {
    config: PredictorConfig,
    engineer: FeatureEngineer,
    bayesian: BayesianRegressor,
    trees: TreeEnsemble,
    combiner: EnsembleCombiner,
    stacking: StackingCombiner,
}

impl EnsemblePredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            engineer: FeatureEngineer::new(config.features.clone()),
            bayesian: BayesianRegressor::new(config.bayesian.clone()),
            trees: TreeEnsemble::new(config.trees.clone()),
            combiner: EnsembleCombiner::new(config.ensemble.clone()),
            stacking: StackingCombiner::new(config.stacking.clone()),
            config,
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn schema(&self) -> &FeatureSchema {
        self.engineer.schema()
    }

    pub fn combiner(&self) -> &EnsembleCombiner {
        &self.combiner
    }

    pub fn bayesian(&self) -> &BayesianRegressor {
        &self.bayesian
    }

    pub fn trees(&self) -> &TreeEnsemble {
        &self.trees
    }

    pub fn is_trained(&self) -> bool {
        self.bayesian.is_trained() && self.trees.is_trained()
    }

    /// Align the three raw series, engineer the sample set and train.
    pub fn train(
        &mut self,
        primary: &[DailyBar],
        peer: &[DailyBar],
        index: &[DailyBar],
    ) -> Result<SampleSet, PredictorError> {
        let aligned = align_series(primary, peer, index)?;
        let samples = self.engineer.build_samples(&aligned)?;
        self.train_on_samples(&samples)?;
        Ok(samples)
    }

    /// Train on an already engineered sample set.
    pub fn train_on_samples(&mut self, samples: &SampleSet) -> Result<(), PredictorError> {
        if samples.num_features() != self.engineer.schema().len() {
            return Err(PredictorError::SchemaMismatch {
                expected: self.engineer.schema().len(),
                actual: samples.num_features(),
            });
        }

        match self.config.strategy {
            BlendStrategy::RegimeWeighted => {
                self.bayesian.fit(samples)?;
                self.trees.fit(samples)?;
                self.combiner
                    .initialize_weights(&self.bayesian, &self.trees, samples)?;
            }
            BlendStrategy::Stacking => {
                self.stacking
                    .fit(samples, &mut self.bayesian, &mut self.trees)?;
            }
        }

        info!(
            samples = samples.len(),
            features = samples.num_features(),
            strategy = ?self.config.strategy,
            "ensemble predictor trained"
        );
        Ok(())
    }

    /// Predict one engineered sample.
    pub fn predict_sample(
        &mut self,
        date: NaiveDate,
        features: &[f64],
        calibrated: bool,
    ) -> Result<PredictionResult, PredictorError> {
        let bayes = self.bayesian.predict(features, calibrated)?;
        let tree = self.trees.predict(features)?;
        let signals = self.engineer.schema().regime_signals(features);

        match self.config.strategy {
            BlendStrategy::RegimeWeighted => {
                Ok(self.combiner.combine(date, &signals, &bayes, &tree))
            }
            BlendStrategy::Stacking => {
                let (low, high) = self.stacking.predict(&bayes, &tree)?;
                let (final_low, final_high, range_reconciled) =
                    crate::ensemble::combiner::reconcile_range(
                        low,
                        high,
                        tree.range,
                        self.config.ensemble.range_trigger,
                        self.config.ensemble.range_adjustment,
                        self.config.ensemble.min_gap,
                    );

                // Provenance weights: the meta-model's coefficient shares.
                let snapshot = |bayes_coef: f64, tree_coef: f64| {
                    let total = bayes_coef.abs() + tree_coef.abs();
                    if total > 1e-12 {
                        (bayes_coef.abs() / total, tree_coef.abs() / total)
                    } else {
                        (0.5, 0.5)
                    }
                };
                let (bl, tl) = self
                    .stacking
                    .meta_low()
                    .map(|m| snapshot(m.bayes_coef, m.tree_coef))
                    .unwrap_or((0.5, 0.5));
                let (bh, th) = self
                    .stacking
                    .meta_high()
                    .map(|m| snapshot(m.bayes_coef, m.tree_coef))
                    .unwrap_or((0.5, 0.5));

                let mid = (bayes.low + bayes.high) / 2.0;
                let confidence = if mid.abs() < 1e-8 {
                    0.1
                } else {
                    (1.0 / (1.0 + (bayes.high - bayes.low) / mid)).clamp(0.1, 1.0)
                };

                Ok(PredictionResult {
                    date,
                    bayesian_low: bayes.low,
                    bayesian_high: bayes.high,
                    tree_low: tree.low,
                    tree_high: tree.high,
                    tree_range: tree.range,
                    final_low,
                    final_high,
                    weights: WeightSnapshot {
                        bayesian_low: bl,
                        tree_low: tl,
                        bayesian_high: bh,
                        tree_high: th,
                    },
                    confidence,
                    regime: crate::ensemble::RegimeDetector::new(
                        self.config.ensemble.thresholds.clone(),
                    )
                    .classify(&signals),
                    range_reconciled,
                })
            }
        }
    }

    /// Engineer the latest feature vector from raw series and predict the
    /// following session's range.
    pub fn predict_next(
        &mut self,
        primary: &[DailyBar],
        peer: &[DailyBar],
        index: &[DailyBar],
        calibrated: bool,
    ) -> Result<PredictionResult, PredictorError> {
        let aligned = align_series(primary, peer, index)?;
        let (date, features) = self.engineer.build_latest_vector(&aligned)?;
        self.predict_sample(date, &features, calibrated)
    }

    /// Record a realized outcome for weight-performance tracking.
    pub fn update_performance(&mut self, date: NaiveDate, actual_low: f64, actual_high: f64) {
        self.combiner.update_performance(date, actual_low, actual_high);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn synthetic_bars(n: usize, scale: f64, phase: f64) -> Vec<DailyBar> {
        let start: NaiveDate = "2023-06-01".parse().unwrap();
        (0..n)
            .map(|i| {
                let date = start + Duration::days(i as i64);
                let base = scale * (100.0 + (i as f64 * 0.21 + phase).sin() * 4.0 + i as f64 * 0.04);
                DailyBar {
                    date,
                    open: base - 0.4,
                    high: base + 1.3,
                    low: base - 1.2,
                    close: base,
                    volume: 1_000_000.0 * scale + (i as f64 * 0.9).cos() * 40_000.0,
                }
            })
            .collect()
    }

    fn trained_predictor(strategy: BlendStrategy) -> (EnsemblePredictor, SampleSet) {
        let mut predictor = EnsemblePredictor::new(PredictorConfig {
            strategy,
            ..PredictorConfig::default()
        });
        let primary = synthetic_bars(160, 1.0, 0.0);
        let peer = synthetic_bars(160, 0.5, 0.7);
        let index = synthetic_bars(160, 4.0, 1.9);
        let samples = predictor.train(&primary, &peer, &index).unwrap();
        (predictor, samples)
    }

    #[test]
    fn end_to_end_ordering_invariant() {
        let (mut predictor, samples) = trained_predictor(BlendStrategy::RegimeWeighted);
        for i in 0..samples.len() {
            let result = predictor
                .predict_sample(samples.dates[i], &samples.features[i], true)
                .unwrap();
            assert!(
                result.final_high >= result.final_low,
                "inverted bounds at {}",
                samples.dates[i]
            );
            assert!((0.1..=1.0).contains(&result.confidence));
        }
    }

    #[test]
    fn stacking_strategy_trains_and_predicts() {
        let (mut predictor, samples) = trained_predictor(BlendStrategy::Stacking);
        let result = predictor
            .predict_sample(samples.dates[50], &samples.features[50], false)
            .unwrap();
        assert!(result.final_high >= result.final_low);
    }

    #[test]
    fn repeated_runs_are_deterministic() {
        let (mut a, samples) = trained_predictor(BlendStrategy::RegimeWeighted);
        let (mut b, _) = trained_predictor(BlendStrategy::RegimeWeighted);
        let ra = a
            .predict_sample(samples.dates[30], &samples.features[30], true)
            .unwrap();
        let rb = b
            .predict_sample(samples.dates[30], &samples.features[30], true)
            .unwrap();
        assert_eq!(ra.final_low.to_bits(), rb.final_low.to_bits());
        assert_eq!(ra.final_high.to_bits(), rb.final_high.to_bits());
    }

    #[test]
    fn predict_next_uses_latest_session() {
        let (mut predictor, _) = trained_predictor(BlendStrategy::RegimeWeighted);
        let primary = synthetic_bars(160, 1.0, 0.0);
        let peer = synthetic_bars(160, 0.5, 0.7);
        let index = synthetic_bars(160, 4.0, 1.9);
        let result = predictor.predict_next(&primary, &peer, &index, true).unwrap();
        assert_eq!(result.date, primary.last().unwrap().date);
        assert!(result.final_high >= result.final_low);
    }

    #[test]
    fn untrained_predictor_refuses() {
        let mut predictor = EnsemblePredictor::new(PredictorConfig::default());
        let n = predictor.schema().len();
        let err = predictor
            .predict_sample("2024-01-05".parse().unwrap(), &vec![0.0; n], false)
            .unwrap_err();
        assert!(matches!(err, PredictorError::NotTrained));
    }
}
