//! Regime-weighted ensemble combiner.
//!
//! Produces one reconciled (low, high) pair per sample with full provenance:
//! raw base-model outputs, the weight snapshot used, the detected regime and
//! a confidence score derived from the Bayesian spread. Keeps a rolling
//! prediction history that drives the performance-triggered weight update.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::SampleSet;
use crate::ensemble::regime::{Regime, RegimeDetector, RegimeSignals, RegimeThresholds};
use crate::ensemble::weights::{EnsembleWeights, WeightBounds, WeightSnapshot};
use crate::error::PredictorError;
use crate::models::bayesian::{BayesianRegressor, RangePrediction};
use crate::models::gbt::{TreeEnsemble, TreePrediction};

const EPS: f64 = 1e-8;

/// Combiner policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Band every individual weight must stay inside
    pub bounds: WeightBounds,
    /// Regime thresholds for the detector
    pub thresholds: RegimeThresholds,
    /// Reconciliation trigger: blended range may deviate from the predicted
    /// range by at most this fraction of the predicted range
    pub range_trigger: f64,
    /// Interpolation coefficient toward the predicted range
    pub range_adjustment: f64,
    /// Minimal half-gap forced when reconciled bounds collapse
    pub min_gap: f64,
    /// Fraction of the training set used for weight initialization (the
    /// trailing remainder is the evaluation slice)
    pub init_train_fraction: f64,
    /// Apply a performance update every this many recorded outcomes
    pub update_interval: usize,
    /// Minimum recorded outcomes before updates start
    pub min_history: usize,
    /// Trailing outcomes considered by a performance update
    pub performance_window: usize,
    /// Retained share of the old weight during an update
    pub retain_factor: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            bounds: WeightBounds::default(),
            thresholds: RegimeThresholds::default(),
            range_trigger: 0.2,
            range_adjustment: 0.5,
            min_gap: 0.01,
            init_train_fraction: 0.8,
            update_interval: 5,
            min_history: 20,
            performance_window: 20,
            retain_factor: 0.95,
        }
    }
}

/// One blended prediction with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub date: NaiveDate,
    pub bayesian_low: f64,
    pub bayesian_high: f64,
    pub tree_low: f64,
    pub tree_high: f64,
    pub tree_range: f64,
    pub final_low: f64,
    pub final_high: f64,
    pub weights: WeightSnapshot,
    /// 1/(1 + bayes_range/bayes_midpoint), clamped to [0.1, 1.0]
    pub confidence: f64,
    pub regime: Regime,
    pub range_reconciled: bool,
}

/// History entry pairing a prediction with its realized outcome once known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub result: PredictionResult,
    pub actual_low: Option<f64>,
    pub actual_high: Option<f64>,
}

/// Pull blended bounds toward an independently predicted range.
///
/// Triggers when the absolute difference between the blended and predicted
/// range exceeds `trigger` times the predicted range; the new half-range
/// interpolates between the two, weighted by `coefficient`. A collapsed pair
/// is forced back open to ±`min_gap` around the midpoint.
pub(crate) fn reconcile_range(
    low: f64,
    high: f64,
    predicted_range: f64,
    trigger: f64,
    coefficient: f64,
    min_gap: f64,
) -> (f64, f64, bool) {
    let mut low = low;
    let mut high = high;
    let mut reconciled = false;

    if predicted_range > EPS {
        let blended_range = high - low;
        if (blended_range - predicted_range).abs() > trigger * predicted_range {
            let mid = (low + high) / 2.0;
            let half = coefficient * predicted_range / 2.0
                + (1.0 - coefficient) * blended_range / 2.0;
            low = mid - half;
            high = mid + half;
            reconciled = true;
        }
    }

    if high <= low {
        let mid = (low + high) / 2.0;
        warn!(low, high, "reconciled bounds collapsed, forcing minimal gap");
        low = mid - min_gap;
        high = mid + min_gap;
    }

    (low, high, reconciled)
}

/// Regime-conditioned multiplicative nudges: (bayesian, tree).
fn regime_nudge(regime: Regime) -> (f64, f64) {
    match regime {
        Regime::HighVolatility => (1.2, 0.9),
        Regime::BullTrend | Regime::BearTrend => (0.9, 1.2),
        Regime::HighVolumeSideways | Regime::Normal => (1.0, 1.0),
    }
}

/// Regime-weighted blender with rolling performance tracking.
#[derive(Debug, Clone)]
pub struct EnsembleCombiner {
    config: EnsembleConfig,
    detector: RegimeDetector,
    weights: EnsembleWeights,
    history: Vec<PredictionRecord>,
    outcomes_recorded: usize,
}

impl EnsembleCombiner {
    pub fn new(config: EnsembleConfig) -> Self {
        let weights = EnsembleWeights::balanced(config.range_adjustment);
        let detector = RegimeDetector::new(config.thresholds.clone());
        Self {
            config,
            detector,
            weights,
            history: Vec::new(),
            outcomes_recorded: 0,
        }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn weights(&self) -> &EnsembleWeights {
        &self.weights
    }

    pub fn history(&self) -> &[PredictionRecord] {
        &self.history
    }

    /// Initialize weights from inverse evaluation error on a temporal 80/20
    /// split of the training set.
    ///
    /// Per-sample evaluation failures are skipped; zero usable samples is an
    /// error. Each model's score is the mean of its low and high percent
    /// errors.
    pub fn initialize_weights(
        &mut self,
        bayesian: &BayesianRegressor,
        trees: &TreeEnsemble,
        samples: &SampleSet,
    ) -> Result<(), PredictorError> {
        let split = (samples.len() as f64 * self.config.init_train_fraction).round() as usize;
        let eval = samples.slice(split.min(samples.len())..samples.len());

        let mut bayes_err = 0.0;
        let mut tree_err = 0.0;
        let mut used = 0usize;

        for i in 0..eval.len() {
            let actual_low = eval.target_low[i];
            let actual_high = eval.target_high[i];
            if actual_low.abs() < EPS || actual_high.abs() < EPS {
                continue;
            }
            let (b, t) = match (
                bayesian.predict(&eval.features[i], false),
                trees.predict(&eval.features[i]),
            ) {
                (Ok(b), Ok(t)) => (b, t),
                _ => continue,
            };
            bayes_err += pct_error(actual_low, b.low, actual_high, b.high);
            tree_err += pct_error(actual_low, t.low, actual_high, t.high);
            used += 1;
        }

        if used == 0 {
            return Err(PredictorError::InsufficientValidSamples);
        }

        bayes_err /= used as f64;
        tree_err /= used as f64;

        let bayes_w = inverse_error_weight(bayes_err, tree_err);
        let (bayesian_w, tree_w) = self.config.bounds.normalize_pair(bayes_w, 1.0 - bayes_w);
        self.weights.bayesian = bayesian_w;
        self.weights.tree_low = tree_w;
        self.weights.tree_high = tree_w;

        debug!(
            samples = used,
            bayes_err,
            tree_err,
            bayesian = bayesian_w,
            tree = tree_w,
            "ensemble weights initialized"
        );
        Ok(())
    }

    /// Produce the blended, reconciled prediction for one sample.
    pub fn combine(
        &mut self,
        date: NaiveDate,
        signals: &RegimeSignals,
        bayes: &RangePrediction,
        tree: &TreePrediction,
    ) -> PredictionResult {
        let regime = self.detector.classify(signals);
        let (bayes_mult, tree_mult) = regime_nudge(regime);

        let (bayes_low_w, tree_low_w) = self.config.bounds.normalize_pair(
            self.weights.bayesian * bayes_mult,
            self.weights.tree_low * tree_mult,
        );
        let (bayes_high_w, tree_high_w) = self.config.bounds.normalize_pair(
            self.weights.bayesian * bayes_mult,
            self.weights.tree_high * tree_mult,
        );

        let blended_low = bayes.low * bayes_low_w + tree.low * tree_low_w;
        let blended_high = bayes.high * bayes_high_w + tree.high * tree_high_w;

        let (final_low, final_high, range_reconciled) = reconcile_range(
            blended_low,
            blended_high,
            tree.range,
            self.config.range_trigger,
            self.weights.range_adjustment,
            self.config.min_gap,
        );

        let result = PredictionResult {
            date,
            bayesian_low: bayes.low,
            bayesian_high: bayes.high,
            tree_low: tree.low,
            tree_high: tree.high,
            tree_range: tree.range,
            final_low,
            final_high,
            weights: WeightSnapshot {
                bayesian_low: bayes_low_w,
                tree_low: tree_low_w,
                bayesian_high: bayes_high_w,
                tree_high: tree_high_w,
            },
            confidence: confidence_from_spread(bayes),
            regime,
            range_reconciled,
        };

        self.history.push(PredictionRecord {
            result: result.clone(),
            actual_low: None,
            actual_high: None,
        });
        result
    }

    /// Record a realized outcome and, on the configured cadence, shift
    /// weights toward the recently better-performing base model.
    ///
    /// The shift retains `retain_factor` of the old weight and moves the
    /// remainder toward the inverse trailing-MAPE target.
    pub fn update_performance(&mut self, date: NaiveDate, actual_low: f64, actual_high: f64) {
        let Some(record) = self
            .history
            .iter_mut()
            .rev()
            .find(|r| r.result.date == date)
        else {
            debug!(%date, "no prediction recorded for outcome date");
            return;
        };
        record.actual_low = Some(actual_low);
        record.actual_high = Some(actual_high);
        self.outcomes_recorded += 1;

        if self.outcomes_recorded < self.config.min_history
            || self.outcomes_recorded % self.config.update_interval != 0
        {
            return;
        }

        let mut bayes_err = 0.0;
        let mut tree_err = 0.0;
        let mut used = 0usize;
        for record in self
            .history
            .iter()
            .rev()
            .filter(|r| r.actual_low.is_some())
            .take(self.config.performance_window)
        {
            let (Some(al), Some(ah)) = (record.actual_low, record.actual_high) else {
                continue;
            };
            if al.abs() < EPS || ah.abs() < EPS {
                continue;
            }
            let r = &record.result;
            bayes_err += pct_error(al, r.bayesian_low, ah, r.bayesian_high);
            tree_err += pct_error(al, r.tree_low, ah, r.tree_high);
            used += 1;
        }
        if used == 0 {
            return;
        }

        bayes_err /= used as f64;
        tree_err /= used as f64;
        let target = inverse_error_weight(bayes_err, tree_err);
        let retain = self.config.retain_factor;

        let new_bayes = retain * self.weights.bayesian + (1.0 - retain) * target;
        let new_tree = retain * self.weights.tree_low + (1.0 - retain) * (1.0 - target);
        let (bayesian, tree) = self.config.bounds.normalize_pair(new_bayes, new_tree);

        self.weights.bayesian = bayesian;
        self.weights.tree_low = tree;
        self.weights.tree_high = tree;
        self.weights.update_count += 1;
        self.weights.last_update = Some(date);
        debug!(bayesian, tree, window = used, "performance-triggered weight update");
    }
}

/// Mean of low and high percent errors for one sample.
fn pct_error(actual_low: f64, pred_low: f64, actual_high: f64, pred_high: f64) -> f64 {
    let low = ((actual_low - pred_low) / actual_low).abs();
    let high = ((actual_high - pred_high) / actual_high).abs();
    (low + high) / 2.0
}

/// Inverse-error weight for model A given both error scores.
fn inverse_error_weight(err_a: f64, err_b: f64) -> f64 {
    let inv_a = 1.0 / err_a.max(EPS);
    let inv_b = 1.0 / err_b.max(EPS);
    inv_a / (inv_a + inv_b)
}

/// Confidence from the Bayesian spread relative to its midpoint; smaller
/// relative spread means higher confidence. Reported, never used to alter
/// the blend.
fn confidence_from_spread(bayes: &RangePrediction) -> f64 {
    let mid = (bayes.low + bayes.high) / 2.0;
    if mid.abs() < EPS {
        return 0.1;
    }
    let rel = (bayes.high - bayes.low) / mid;
    (1.0 / (1.0 + rel)).clamp(0.1, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bayes_pred(low: f64, high: f64) -> RangePrediction {
        RangePrediction {
            low,
            high,
            low_variance: 1.0,
            high_variance: 1.0,
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn neutral_signals() -> RegimeSignals {
        RegimeSignals {
            volatility: 0.01,
            momentum: 0.0,
            volume_ratio: 1.0,
        }
    }

    #[test]
    fn reconciliation_triggers_on_large_deviation() {
        // Blended 100/110 (range 10) vs predicted 15: |10-15| = 5 > 20%·15 = 3.
        let (low, high, reconciled) = reconcile_range(100.0, 110.0, 15.0, 0.2, 0.5, 0.01);
        assert!(reconciled);
        assert!(low < 100.0 && high > 110.0);
        assert_relative_eq!(high - low, 12.5, epsilon = 1e-9);
        assert_relative_eq!((low + high) / 2.0, 105.0, epsilon = 1e-9);
    }

    #[test]
    fn reconciliation_skips_small_deviation() {
        // Blended 14.5 vs predicted 15: |14.5-15| = 0.5 < 3.
        let (low, high, reconciled) = reconcile_range(100.0, 114.5, 15.0, 0.2, 0.5, 0.01);
        assert!(!reconciled);
        assert_eq!(low, 100.0);
        assert_eq!(high, 114.5);
    }

    #[test]
    fn collapsed_bounds_get_a_minimal_gap() {
        let (low, high, _) = reconcile_range(100.0, 100.0, 0.0, 0.2, 0.5, 0.01);
        assert!(high > low);
        assert_relative_eq!(high - low, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn blend_restores_ordering_against_adversarial_trees() {
        let mut combiner = EnsembleCombiner::new(EnsembleConfig::default());
        // Tree model emits an inverted pair and a nonsense range.
        let tree = TreePrediction {
            low: 120.0,
            high: 90.0,
            range: -5.0,
        };
        let result = combiner.combine(date(1), &neutral_signals(), &bayes_pred(100.0, 101.0), &tree);
        assert!(result.final_high > result.final_low);
    }

    #[test]
    fn weight_snapshot_is_normalized_per_target() {
        let mut combiner = EnsembleCombiner::new(EnsembleConfig::default());
        let signals = RegimeSignals {
            volatility: 0.05, // High Volatility nudge
            momentum: 0.0,
            volume_ratio: 1.0,
        };
        let result = combiner.combine(
            date(2),
            &signals,
            &bayes_pred(100.0, 102.0),
            &TreePrediction { low: 99.0, high: 103.0, range: 4.0 },
        );
        assert_eq!(result.regime, Regime::HighVolatility);
        let w = result.weights;
        assert!((w.bayesian_low + w.tree_low - 1.0).abs() < 1e-9);
        assert!((w.bayesian_high + w.tree_high - 1.0).abs() < 1e-9);
        for v in [w.bayesian_low, w.tree_low, w.bayesian_high, w.tree_high] {
            assert!((0.1..=0.8).contains(&v));
        }
        // The nudge favors the uncertainty-aware model.
        assert!(w.bayesian_low > 0.5);
    }

    #[test]
    fn confidence_shrinks_with_relative_spread() {
        let tight = confidence_from_spread(&bayes_pred(100.0, 100.5));
        let wide = confidence_from_spread(&bayes_pred(100.0, 120.0));
        assert!(tight > wide);
        assert!((0.1..=1.0).contains(&tight));
        assert!((0.1..=1.0).contains(&wide));
    }

    #[test]
    fn performance_update_fires_on_cadence_and_normalizes() {
        let mut combiner = EnsembleCombiner::new(EnsembleConfig {
            min_history: 10,
            update_interval: 5,
            ..EnsembleConfig::default()
        });

        for day in 1..=20 {
            // Bayesian consistently closer to the realized bounds.
            combiner.combine(
                date(day),
                &neutral_signals(),
                &bayes_pred(99.5, 101.5),
                &TreePrediction { low: 95.0, high: 107.0, range: 12.0 },
            );
            combiner.update_performance(date(day), 100.0, 101.0);
        }

        let w = combiner.weights();
        assert!(w.update_count >= 1);
        assert!(w.last_update.is_some());
        assert!((w.bayesian + w.tree_low - 1.0).abs() < 1e-9);
        // Weight drifted toward the better performer.
        assert!(w.bayesian > 0.5);
    }

    #[test]
    fn history_records_actuals() {
        let mut combiner = EnsembleCombiner::new(EnsembleConfig::default());
        combiner.combine(
            date(5),
            &neutral_signals(),
            &bayes_pred(10.0, 11.0),
            &TreePrediction { low: 10.0, high: 11.0, range: 1.0 },
        );
        combiner.update_performance(date(5), 10.2, 10.9);
        let record = &combiner.history()[0];
        assert_eq!(record.actual_low, Some(10.2));
        assert_eq!(record.actual_high, Some(10.9));
    }
}
