//! K-fold stacking: the alternate combiner.
//!
//! Generates out-of-fold base predictions via contiguous k-fold retraining,
//! fits a linear meta-model per target on those honestly out-of-sample
//! pairs, then retrains both base models on the full training set for
//! serving. The base model that produced a fold's meta-features never saw
//! that fold: the leakage discipline stacking depends on.

use std::ops::Range;

use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::SampleSet;
use crate::error::PredictorError;
use crate::models::bayesian::{BayesianRegressor, RangePrediction};
use crate::models::gbt::{TreeEnsemble, TreePrediction};

/// Stacking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackingConfig {
    /// Number of contiguous folds
    pub k: usize,
    /// Ridge term stabilizing the meta-model solve
    pub ridge: f64,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self { k: 5, ridge: 1e-6 }
    }
}

/// Linear meta-model over the two base predictions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetaModel {
    pub intercept: f64,
    pub bayes_coef: f64,
    pub tree_coef: f64,
}

impl MetaModel {
    fn evaluate(&self, bayes: f64, tree: f64) -> f64 {
        self.intercept + self.bayes_coef * bayes + self.tree_coef * tree
    }
}

/// Contiguous fold bounds partitioning `0..n` into `k` slices.
pub(crate) fn fold_bounds(n: usize, k: usize) -> Vec<Range<usize>> {
    (0..k).map(|i| (i * n / k)..((i + 1) * n / k)).collect()
}

/// Stacking meta-combiner over the two base models.
#[derive(Debug, Clone)]
pub struct StackingCombiner {
    config: StackingConfig,
    meta_low: Option<MetaModel>,
    meta_high: Option<MetaModel>,
}

impl StackingCombiner {
    pub fn new(config: StackingConfig) -> Self {
        Self {
            config,
            meta_low: None,
            meta_high: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.meta_low.is_some() && self.meta_high.is_some()
    }

    pub fn meta_low(&self) -> Option<&MetaModel> {
        self.meta_low.as_ref()
    }

    pub fn meta_high(&self) -> Option<&MetaModel> {
        self.meta_high.as_ref()
    }

    /// Fit the meta-models on out-of-fold base predictions, then retrain the
    /// passed base models on the entire training set so serving uses
    /// maximally informed bases.
    pub fn fit(
        &mut self,
        samples: &SampleSet,
        bayesian: &mut BayesianRegressor,
        trees: &mut TreeEnsemble,
    ) -> Result<(), PredictorError> {
        let n = samples.len();
        let k = self.config.k.max(2);
        // Every fold complement must itself be trainable.
        let needed = (crate::models::bayesian::MIN_TRAIN_SAMPLES * k) / (k - 1) + k;
        if n < needed {
            return Err(PredictorError::InsufficientData { needed, got: n });
        }

        let mut rows_low: Vec<[f64; 2]> = Vec::new();
        let mut rows_high: Vec<[f64; 2]> = Vec::new();
        let mut y_low: Vec<f64> = Vec::new();
        let mut y_high: Vec<f64> = Vec::new();

        for fold in fold_bounds(n, k) {
            let train = samples.without_range(fold.clone());
            let mut fold_bayes = BayesianRegressor::new(bayesian.config().clone());
            let mut fold_trees = TreeEnsemble::new(trees.config().clone());
            if let Err(e) = fold_bayes.fit(&train) {
                warn!(error = %e, "skipping fold: bayesian fit failed");
                continue;
            }
            if let Err(e) = fold_trees.fit(&train) {
                warn!(error = %e, "skipping fold: tree fit failed");
                continue;
            }

            for i in fold {
                let (b, t) = match (
                    fold_bayes.predict(&samples.features[i], false),
                    fold_trees.predict(&samples.features[i]),
                ) {
                    (Ok(b), Ok(t)) => (b, t),
                    _ => continue,
                };
                rows_low.push([b.low, t.low]);
                y_low.push(samples.target_low[i]);
                rows_high.push([b.high, t.high]);
                y_high.push(samples.target_high[i]);
            }
        }

        if rows_low.is_empty() {
            return Err(PredictorError::InsufficientValidSamples);
        }

        let meta_low = fit_meta(&rows_low, &y_low, self.config.ridge)?;
        let meta_high = fit_meta(&rows_high, &y_high, self.config.ridge)?;
        debug!(
            meta_samples = rows_low.len(),
            bayes_low = meta_low.bayes_coef,
            tree_low = meta_low.tree_coef,
            "stacking meta-models fitted"
        );

        // Production bases see the full training window; only the meta-model
        // was restricted to out-of-sample pairs.
        bayesian.fit(samples)?;
        trees.fit(samples)?;

        self.meta_low = Some(meta_low);
        self.meta_high = Some(meta_high);
        Ok(())
    }

    /// Combine one pair of base predictions into stacked low/high bounds.
    pub fn predict(
        &self,
        bayes: &RangePrediction,
        tree: &TreePrediction,
    ) -> Result<(f64, f64), PredictorError> {
        let (meta_low, meta_high) = match (&self.meta_low, &self.meta_high) {
            (Some(l), Some(h)) => (l, h),
            _ => return Err(PredictorError::NotTrained),
        };
        Ok((
            meta_low.evaluate(bayes.low, tree.low),
            meta_high.evaluate(bayes.high, tree.high),
        ))
    }
}

/// Least-squares fit of `y ≈ intercept + c1·x1 + c2·x2` with a ridge term.
fn fit_meta(rows: &[[f64; 2]], targets: &[f64], ridge: f64) -> Result<MetaModel, PredictorError> {
    let m = rows.len();
    let x = DMatrix::from_fn(m, 3, |r, c| match c {
        0 => 1.0,
        1 => rows[r][0],
        _ => rows[r][1],
    });
    let y = DVector::from_column_slice(targets);
    let xtx = x.transpose() * &x + DMatrix::identity(3, 3) * ridge;
    let xty = x.transpose() * y;
    let chol =
        Cholesky::new(xtx).ok_or(PredictorError::Numerical("meta-model normal equations singular"))?;
    let beta = chol.solve(&xty);
    Ok(MetaModel {
        intercept: beta[0],
        bayes_coef: beta[1],
        tree_coef: beta[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bayesian::BayesianConfig;
    use crate::models::gbt::TreeEnsembleConfig;
    use chrono::NaiveDate;

    fn samples(n: usize) -> SampleSet {
        let mut set = SampleSet::new(vec!["x1".into(), "x2".into()]);
        for i in 0..n {
            let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64);
            let x1 = (i as f64 * 0.11).sin();
            let x2 = i as f64 / n as f64;
            let mid = 100.0 + 3.0 * x1 + 10.0 * x2;
            set.push(date, vec![x1, x2], mid - 1.0, mid + 1.0);
        }
        set
    }

    #[test]
    fn folds_partition_without_overlap() {
        let bounds = fold_bounds(103, 5);
        assert_eq!(bounds.len(), 5);
        assert_eq!(bounds[0].start, 0);
        assert_eq!(bounds[4].end, 103);
        let mut covered = vec![false; 103];
        for fold in &bounds {
            for i in fold.clone() {
                // Each index appears in exactly one fold: no sample's
                // meta-feature can come from a model trained on it.
                assert!(!covered[i]);
                covered[i] = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn fold_training_set_excludes_the_fold() {
        let set = samples(50);
        let bounds = fold_bounds(set.len(), 5);
        let fold = bounds[2].clone();
        let train = set.without_range(fold.clone());
        assert_eq!(train.len(), set.len() - fold.len());
        for date in &train.dates {
            assert!(!set.dates[fold.clone()].contains(date));
        }
    }

    #[test]
    fn stacking_fits_and_predicts() {
        let set = samples(120);
        let mut bayes = BayesianRegressor::new(BayesianConfig::default());
        let mut trees = TreeEnsemble::new(TreeEnsembleConfig::default());
        let mut stacking = StackingCombiner::new(StackingConfig::default());

        stacking.fit(&set, &mut bayes, &mut trees).unwrap();
        assert!(stacking.is_trained());
        assert!(bayes.is_trained());
        assert!(trees.is_trained());

        let b = bayes.predict(&set.features[100], false).unwrap();
        let t = trees.predict(&set.features[100]).unwrap();
        let (low, high) = stacking.predict(&b, &t).unwrap();
        assert!(low.is_finite() && high.is_finite());
        assert!((low - set.target_low[100]).abs() < 10.0);
    }

    #[test]
    fn predict_before_fit_fails() {
        let stacking = StackingCombiner::new(StackingConfig::default());
        let b = RangePrediction {
            low: 1.0,
            high: 2.0,
            low_variance: 0.1,
            high_variance: 0.1,
        };
        let t = TreePrediction {
            low: 1.0,
            high: 2.0,
            range: 1.0,
        };
        assert!(matches!(stacking.predict(&b, &t), Err(PredictorError::NotTrained)));
    }

    #[test]
    fn too_small_for_folding_is_rejected() {
        let set = samples(12);
        let mut bayes = BayesianRegressor::new(BayesianConfig::default());
        let mut trees = TreeEnsemble::new(TreeEnsembleConfig::default());
        let mut stacking = StackingCombiner::new(StackingConfig::default());
        let err = stacking.fit(&set, &mut bayes, &mut trees).unwrap_err();
        assert!(matches!(err, PredictorError::InsufficientData { .. }));
    }
}
