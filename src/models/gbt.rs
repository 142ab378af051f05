//! Gradient-boosted regression trees for the low/high/range targets.
//!
//! Three independently configured boosters share one feature-assembly
//! contract. Trees are grown depth- and leaf-bounded on MSE gain with a
//! minimum leaf size; boosting applies shrinkage and optional early stopping
//! against a trailing validation slice. All randomness (feature subsampling)
//! comes from an explicitly seeded ChaCha8 generator.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::SampleSet;
use crate::error::PredictorError;

/// Minimum training rows accepted by `fit`.
pub const MIN_TRAIN_SAMPLES: usize = 10;

/// Hyperparameters for one boosted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbtParams {
    /// Boosting rounds (upper bound when early stopping is active)
    pub n_rounds: usize,
    /// Shrinkage applied to each tree's contribution
    pub learning_rate: f64,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Maximum leaves per tree
    pub max_leaves: usize,
    /// Minimum samples in a leaf
    pub min_samples_leaf: usize,
    /// Stop after this many rounds without validation improvement (0 = off)
    pub early_stopping_rounds: usize,
    /// Trailing fraction held back for early stopping
    pub validation_fraction: f64,
    /// Features considered per tree (None = all)
    pub max_features: Option<usize>,
    /// Seed for feature subsampling
    pub seed: u64,
}

impl Default for GbtParams {
    fn default() -> Self {
        Self {
            n_rounds: 200,
            learning_rate: 0.05,
            max_depth: 3,
            max_leaves: 8,
            min_samples_leaf: 5,
            early_stopping_rounds: 10,
            validation_fraction: 0.15,
            max_features: None,
            seed: 42,
        }
    }
}

/// Per-target parameter triple. The range target gets a shallower, slower
/// configuration: the spread is noisier than either bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsembleConfig {
    pub low: GbtParams,
    pub high: GbtParams,
    pub range: GbtParams,
}

impl Default for TreeEnsembleConfig {
    fn default() -> Self {
        let range = GbtParams {
            n_rounds: 150,
            learning_rate: 0.03,
            max_depth: 2,
            max_leaves: 4,
            min_samples_leaf: 8,
            seed: 44,
            ..GbtParams::default()
        };
        Self {
            low: GbtParams { seed: 42, ..GbtParams::default() },
            high: GbtParams { seed: 43, ..GbtParams::default() },
            range,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeNode {
    feature_idx: Option<usize>,
    threshold: Option<f64>,
    value: f64,
    left: Option<Box<TreeNode>>,
    right: Option<Box<TreeNode>>,
}

impl TreeNode {
    fn leaf(value: f64) -> Self {
        Self {
            feature_idx: None,
            threshold: None,
            value,
            left: None,
            right: None,
        }
    }

    fn is_leaf(&self) -> bool {
        self.left.is_none()
    }

    fn predict(&self, features: &[f64]) -> f64 {
        if self.is_leaf() {
            return self.value;
        }
        let idx = self.feature_idx.unwrap_or(0);
        let threshold = self.threshold.unwrap_or(0.0);
        let value = features.get(idx).copied().unwrap_or(0.0);
        let child = if value <= threshold { &self.left } else { &self.right };
        match child {
            Some(node) => node.predict(features),
            None => self.value,
        }
    }
}

struct Split {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// One gradient-boosted regression model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbtModel {
    params: GbtParams,
    base_prediction: f64,
    trees: Vec<TreeNode>,
    feature_importance: Vec<f64>,
    n_features: usize,
    trained: bool,
}

impl GbtModel {
    pub fn new(params: GbtParams) -> Self {
        Self {
            params,
            base_prediction: 0.0,
            trees: Vec::new(),
            feature_importance: Vec::new(),
            n_features: 0,
            trained: false,
        }
    }

    pub fn params(&self) -> &GbtParams {
        &self.params
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Split-gain feature importance, normalized to sum to 1.
    pub fn feature_importance(&self) -> &[f64] {
        &self.feature_importance
    }

    pub fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), PredictorError> {
        let n = features.len();
        if n < MIN_TRAIN_SAMPLES {
            return Err(PredictorError::InsufficientData {
                needed: MIN_TRAIN_SAMPLES,
                got: n,
            });
        }
        let n_features = features[0].len();

        // Trailing validation slice for early stopping, temporal order kept.
        let use_early_stop = self.params.early_stopping_rounds > 0
            && self.params.validation_fraction > 0.0;
        let val_len = if use_early_stop {
            let v = (n as f64 * self.params.validation_fraction).round() as usize;
            if n - v >= MIN_TRAIN_SAMPLES && v >= 3 {
                v
            } else {
                0
            }
        } else {
            0
        };
        let train_len = n - val_len;

        let base = targets[..train_len].iter().sum::<f64>() / train_len as f64;
        let mut train_preds = vec![base; train_len];
        let mut val_preds = vec![base; val_len];

        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let mut trees: Vec<TreeNode> = Vec::new();
        let mut importance = vec![0.0; n_features];

        let mut best_mse = f64::MAX;
        let mut best_round = 0;
        let mut stall = 0;

        for round in 0..self.params.n_rounds {
            let residuals: Vec<f64> = targets[..train_len]
                .iter()
                .zip(train_preds.iter())
                .map(|(t, p)| t - p)
                .collect();

            let indices: Vec<usize> = (0..train_len).collect();
            let tree = self.build_node(
                &features[..train_len],
                &residuals,
                &indices,
                0,
                &mut (self.params.max_leaves.max(2)),
                &mut importance,
                &mut rng,
            );

            // A pure leaf tree means no split improved anything; stop.
            if tree.is_leaf() && tree.value.abs() < 1e-12 {
                break;
            }

            for (i, pred) in train_preds.iter_mut().enumerate() {
                *pred += self.params.learning_rate * tree.predict(&features[i]);
            }
            if val_len > 0 {
                for (k, pred) in val_preds.iter_mut().enumerate() {
                    *pred += self.params.learning_rate * tree.predict(&features[train_len + k]);
                }
            }
            trees.push(tree);

            if val_len > 0 {
                let mse = val_preds
                    .iter()
                    .zip(targets[train_len..].iter())
                    .map(|(p, t)| (p - t).powi(2))
                    .sum::<f64>()
                    / val_len as f64;
                if mse + 1e-12 < best_mse {
                    best_mse = mse;
                    best_round = round + 1;
                    stall = 0;
                } else {
                    stall += 1;
                    if stall >= self.params.early_stopping_rounds {
                        break;
                    }
                }
            }
        }

        if val_len > 0 && best_round > 0 {
            trees.truncate(best_round);
        }
        debug!(trees = trees.len(), base, "gbt model fitted");

        let total: f64 = importance.iter().sum();
        if total > 0.0 {
            for v in &mut importance {
                *v /= total;
            }
        }

        self.base_prediction = base;
        self.trees = trees;
        self.feature_importance = importance;
        self.n_features = n_features;
        self.trained = true;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_node(
        &self,
        features: &[Vec<f64>],
        residuals: &[f64],
        indices: &[usize],
        depth: usize,
        remaining_leaves: &mut usize,
        importance: &mut [f64],
        rng: &mut ChaCha8Rng,
    ) -> TreeNode {
        let mean = indices.iter().map(|&i| residuals[i]).sum::<f64>() / indices.len() as f64;

        if depth >= self.params.max_depth
            || indices.len() < 2 * self.params.min_samples_leaf
            || *remaining_leaves < 2
        {
            return TreeNode::leaf(mean);
        }

        let split = match self.best_split(features, residuals, indices, rng) {
            Some(s) => s,
            None => return TreeNode::leaf(mean),
        };

        importance[split.feature_idx] += split.gain;
        *remaining_leaves -= 1;

        let left = self.build_node(
            features,
            residuals,
            &split.left,
            depth + 1,
            remaining_leaves,
            importance,
            rng,
        );
        let right = self.build_node(
            features,
            residuals,
            &split.right,
            depth + 1,
            remaining_leaves,
            importance,
            rng,
        );

        TreeNode {
            feature_idx: Some(split.feature_idx),
            threshold: Some(split.threshold),
            value: mean,
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    /// Exhaustive sorted scan per candidate feature using prefix sums;
    /// deterministic tie-breaking (first best wins).
    fn best_split(
        &self,
        features: &[Vec<f64>],
        residuals: &[f64],
        indices: &[usize],
        rng: &mut ChaCha8Rng,
    ) -> Option<Split> {
        let n_features = features[0].len();
        let candidates: Vec<usize> = match self.params.max_features {
            Some(m) if m < n_features => {
                let mut all: Vec<usize> = (0..n_features).collect();
                all.shuffle(rng);
                all.truncate(m);
                all
            }
            _ => (0..n_features).collect(),
        };

        let min_leaf = self.params.min_samples_leaf;
        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&i| residuals[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| residuals[i].powi(2)).sum();
        let parent_sse = total_sq - total_sum * total_sum / n as f64;

        let mut best: Option<(usize, f64, f64)> = None;

        for &f in &candidates {
            let mut pairs: Vec<(f64, f64)> = indices
                .iter()
                .map(|&i| (features[i][f], residuals[i]))
                .collect();
            pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 0..n - 1 {
                left_sum += pairs[k].1;
                left_sq += pairs[k].1.powi(2);
                let left_n = k + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                // Split only between distinct values.
                if pairs[k].0 >= pairs[k + 1].0 {
                    continue;
                }
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let left_sse = left_sq - left_sum * left_sum / left_n as f64;
                let right_sse = right_sq - right_sum * right_sum / right_n as f64;
                let gain = parent_sse - left_sse - right_sse;
                if gain > best.map(|(_, _, g)| g).unwrap_or(1e-12) {
                    let threshold = (pairs[k].0 + pairs[k + 1].0) / 2.0;
                    best = Some((f, threshold, gain));
                }
            }
        }

        best.map(|(feature_idx, threshold, gain)| {
            let (left, right): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| features[i][feature_idx] <= threshold);
            Split {
                feature_idx,
                threshold,
                gain,
                left,
                right,
            }
        })
    }

    pub fn predict(&self, features: &[f64]) -> Result<f64, PredictorError> {
        if !self.trained {
            return Err(PredictorError::NotTrained);
        }
        if features.len() != self.n_features {
            return Err(PredictorError::SchemaMismatch {
                expected: self.n_features,
                actual: features.len(),
            });
        }
        let mut pred = self.base_prediction;
        for tree in &self.trees {
            pred += self.params.learning_rate * tree.predict(features);
        }
        Ok(pred)
    }
}

/// Prediction triple from the tree side of the ensemble.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TreePrediction {
    pub low: f64,
    pub high: f64,
    /// Independently predicted high − low spread, consumed by range
    /// reconciliation
    pub range: f64,
}

/// Three boosted models (low, high, range) over one feature contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    config: TreeEnsembleConfig,
    low: GbtModel,
    high: GbtModel,
    range: GbtModel,
    schema_len: usize,
}

impl TreeEnsemble {
    pub fn new(config: TreeEnsembleConfig) -> Self {
        Self {
            low: GbtModel::new(config.low.clone()),
            high: GbtModel::new(config.high.clone()),
            range: GbtModel::new(config.range.clone()),
            config,
            schema_len: 0,
        }
    }

    pub fn config(&self) -> &TreeEnsembleConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.low.is_trained() && self.high.is_trained() && self.range.is_trained()
    }

    pub fn low_model(&self) -> &GbtModel {
        &self.low
    }

    pub fn high_model(&self) -> &GbtModel {
        &self.high
    }

    pub fn range_model(&self) -> &GbtModel {
        &self.range
    }

    /// Train all three targets; state is replaced only when every fit
    /// succeeds.
    pub fn fit(&mut self, samples: &SampleSet) -> Result<(), PredictorError> {
        let n = samples.len();
        if n < MIN_TRAIN_SAMPLES {
            return Err(PredictorError::InsufficientData {
                needed: MIN_TRAIN_SAMPLES,
                got: n,
            });
        }

        let ranges: Vec<f64> = samples
            .target_high
            .iter()
            .zip(samples.target_low.iter())
            .map(|(h, l)| h - l)
            .collect();

        let mut low = GbtModel::new(self.config.low.clone());
        let mut high = GbtModel::new(self.config.high.clone());
        let mut range = GbtModel::new(self.config.range.clone());
        low.fit(&samples.features, &samples.target_low)?;
        high.fit(&samples.features, &samples.target_high)?;
        range.fit(&samples.features, &ranges)?;

        self.low = low;
        self.high = high;
        self.range = range;
        self.schema_len = samples.num_features();
        Ok(())
    }

    pub fn predict(&self, features: &[f64]) -> Result<TreePrediction, PredictorError> {
        Ok(TreePrediction {
            low: self.low.predict(features)?,
            high: self.high.predict(features)?,
            range: self.range.predict(features)?,
        })
    }

    /// Snapshot the trained state as JSON. Persistence stays an external
    /// concern; this only makes the in-memory state portable.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn monotone_data(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let features: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![i as f64, (i as f64 * 0.5).sin()])
            .collect();
        let targets: Vec<f64> = (0..n).map(|i| 2.0 * i as f64 + 5.0).collect();
        (features, targets)
    }

    #[test]
    fn rejects_tiny_training_sets() {
        let (x, y) = monotone_data(5);
        let mut model = GbtModel::new(GbtParams::default());
        let err = model.fit(&x, &y).unwrap_err();
        assert!(matches!(err, PredictorError::InsufficientData { needed: 10, got: 5 }));
    }

    #[test]
    fn predict_before_fit_fails() {
        let model = GbtModel::new(GbtParams::default());
        assert!(matches!(model.predict(&[1.0, 2.0]), Err(PredictorError::NotTrained)));
    }

    #[test]
    fn learns_a_monotone_function() {
        let (x, y) = monotone_data(120);
        let mut model = GbtModel::new(GbtParams {
            early_stopping_rounds: 0,
            ..GbtParams::default()
        });
        model.fit(&x, &y).unwrap();

        let lo = model.predict(&x[10]).unwrap();
        let hi = model.predict(&x[100]).unwrap();
        assert!(hi > lo, "expected increasing predictions, got {lo} vs {hi}");
        let err = (model.predict(&x[60]).unwrap() - y[60]).abs();
        assert!(err < 15.0, "error too large: {err}");
    }

    #[test]
    fn same_seed_is_bit_identical() {
        let (x, y) = monotone_data(100);
        let params = GbtParams {
            max_features: Some(1),
            ..GbtParams::default()
        };
        let mut a = GbtModel::new(params.clone());
        let mut b = GbtModel::new(params);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        let pa = a.predict(&x[33]).unwrap();
        let pb = b.predict(&x[33]).unwrap();
        assert_eq!(pa.to_bits(), pb.to_bits());
    }

    #[test]
    fn wrong_feature_count_is_a_schema_error() {
        let (x, y) = monotone_data(50);
        let mut model = GbtModel::new(GbtParams::default());
        model.fit(&x, &y).unwrap();
        assert!(matches!(
            model.predict(&[1.0]),
            Err(PredictorError::SchemaMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn importance_is_normalized() {
        let (x, y) = monotone_data(100);
        let mut model = GbtModel::new(GbtParams::default());
        model.fit(&x, &y).unwrap();
        let sum: f64 = model.feature_importance().iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        // The monotone feature should dominate.
        assert!(model.feature_importance()[0] > 0.5);
    }

    #[test]
    fn ensemble_predicts_all_three_targets() {
        let mut samples = SampleSet::new(vec!["a".into(), "b".into()]);
        for i in 0..80 {
            let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i);
            let mid = 100.0 + i as f64 * 0.2;
            samples.push(date, vec![i as f64, (i as f64 * 0.3).cos()], mid - 1.0, mid + 1.5);
        }
        let mut ensemble = TreeEnsemble::new(TreeEnsembleConfig::default());
        ensemble.fit(&samples).unwrap();

        let pred = ensemble.predict(&samples.features[40]).unwrap();
        assert!(pred.high > pred.low);
        assert!(pred.range > 0.0);
        assert!((pred.range - 2.5).abs() < 2.0);
    }

    #[test]
    fn json_snapshot_round_trips() {
        let mut samples = SampleSet::new(vec!["a".into(), "b".into()]);
        for i in 0..40 {
            let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap() + chrono::Duration::days(i);
            samples.push(date, vec![i as f64, -(i as f64)], 10.0 + i as f64, 12.0 + i as f64);
        }
        let mut ensemble = TreeEnsemble::new(TreeEnsembleConfig::default());
        ensemble.fit(&samples).unwrap();

        let json = ensemble.to_json().unwrap();
        let restored = TreeEnsemble::from_json(&json).unwrap();
        let a = ensemble.predict(&samples.features[20]).unwrap();
        let b = restored.predict(&samples.features[20]).unwrap();
        assert_eq!(a.low.to_bits(), b.low.to_bits());
        assert_eq!(a.high.to_bits(), b.high.to_bits());
    }
}
