//! Bayesian linear regression with variational inference.
//!
//! Fits `target ≈ bias + Σ w_i · feature_i` with a full posterior over
//! weights, bias and noise precision, independently for the low and high
//! targets. A trailing hold-out slice (never shuffled) is reserved for an
//! additive bias correction that can be toggled at inference time.

use std::cell::Cell;

use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::SampleSet;
use crate::error::PredictorError;

/// Minimum training rows accepted by `fit`.
pub const MIN_TRAIN_SAMPLES: usize = 10;

/// Configuration for the Bayesian regressor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BayesianConfig {
    /// Fraction of the training set reserved as the trailing hold-out
    pub holdout_fraction: f64,
    /// Minimum hold-out size in samples
    pub min_holdout: usize,
    /// Clip bound for standardized features, in standard deviations
    pub clip_sigma: f64,
    /// Prior variance of the bias term
    pub bias_prior_variance: f64,
    /// Gamma prior shape over noise precision
    pub noise_prior_shape: f64,
    /// Gamma prior rate over noise precision
    pub noise_prior_rate: f64,
    /// Iteration cap for the variational updates
    pub max_iterations: usize,
    /// Relative convergence tolerance on the expected noise precision
    pub tolerance: f64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            holdout_fraction: 0.2,
            min_holdout: 5,
            clip_sigma: 3.0,
            bias_prior_variance: 1.0,
            noise_prior_shape: 1e-3,
            noise_prior_rate: 1e-3,
            max_iterations: 50,
            tolerance: 1e-6,
        }
    }
}

/// Prior variance for weight coefficients, shrinking as the feature space
/// grows to keep larger schemas regularized.
fn weight_prior_variance(n_features: usize) -> f64 {
    if n_features <= 16 {
        0.01
    } else if n_features < 62 {
        0.002
    } else {
        0.0005
    }
}

/// Per-feature standardization statistics from the fit slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standardizer {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Standardizer {
    fn fit(rows: &[Vec<f64>]) -> Self {
        let n = rows.len() as f64;
        let d = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut mean = vec![0.0; d];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.iter()) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }
        let mut std = vec![0.0; d];
        for row in rows {
            for j in 0..d {
                std[j] += (row[j] - mean[j]).powi(2);
            }
        }
        for s in &mut std {
            *s = (*s / n).sqrt();
            if *s < 1e-12 {
                *s = 1.0; // constant feature standardizes to 0
            }
        }
        Self { mean, std }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn apply(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.mean.iter().zip(self.std.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn invert(&self, standardized: &[f64]) -> Vec<f64> {
        standardized
            .iter()
            .zip(self.mean.iter().zip(self.std.iter()))
            .map(|(z, (m, s))| z * s + m)
            .collect()
    }
}

/// Scalar standardization for a target column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TargetScaler {
    mean: f64,
    std: f64,
}

impl TargetScaler {
    fn fit(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt().max(1e-12);
        Self { mean, std }
    }
}

/// Variational posterior over one target's linear model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posterior {
    pub weight_mean: Vec<f64>,
    pub weight_variance: Vec<f64>,
    pub bias_mean: f64,
    pub bias_variance: f64,
    /// Gamma posterior shape over noise precision
    pub noise_shape: f64,
    /// Gamma posterior rate over noise precision
    pub noise_rate: f64,
}

impl Posterior {
    pub fn expected_noise_precision(&self) -> f64 {
        self.noise_shape / self.noise_rate
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TargetModel {
    scaler: TargetScaler,
    posterior: Posterior,
    /// Hold-out mean signed residual, added when calibration is on
    bias_correction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainedState {
    stats: Standardizer,
    low: TargetModel,
    high: TargetModel,
    holdout_len: usize,
}

/// Prediction with posterior-derived uncertainty per bound.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RangePrediction {
    pub low: f64,
    pub high: f64,
    pub low_variance: f64,
    pub high_variance: f64,
}

impl RangePrediction {
    /// Symmetric credible intervals at `z` standard deviations.
    pub fn credible_intervals(&self, z: f64) -> ((f64, f64), (f64, f64)) {
        let ls = self.low_variance.max(0.0).sqrt();
        let hs = self.high_variance.max(0.0).sqrt();
        (
            (self.low - z * ls, self.low + z * ls),
            (self.high - z * hs, self.high + z * hs),
        )
    }
}

/// Bayesian linear regressor for the low/high target pair.
#[derive(Debug)]
pub struct BayesianRegressor {
    config: BayesianConfig,
    state: Option<TrainedState>,
    ordering_repairs: Cell<u64>,
}

impl BayesianRegressor {
    pub fn new(config: BayesianConfig) -> Self {
        Self {
            config,
            state: None,
            ordering_repairs: Cell::new(0),
        }
    }

    pub fn config(&self) -> &BayesianConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    /// Times a prediction required a low/high swap. A non-trivial rate
    /// indicates a modeling problem, not normal operation.
    pub fn ordering_repairs(&self) -> u64 {
        self.ordering_repairs.get()
    }

    /// Fit both targets, then derive the hold-out bias corrections.
    ///
    /// The hold-out is the most recent `holdout_fraction` of the training
    /// window (at least `min_holdout` rows) and is never fitted on;
    /// standardization statistics come from the leading slice only. State is
    /// replaced atomically once everything succeeds.
    pub fn fit(&mut self, samples: &SampleSet) -> Result<(), PredictorError> {
        let n = samples.len();
        if n < MIN_TRAIN_SAMPLES {
            return Err(PredictorError::InsufficientData {
                needed: MIN_TRAIN_SAMPLES,
                got: n,
            });
        }

        let holdout = ((n as f64 * self.config.holdout_fraction).round() as usize)
            .max(self.config.min_holdout)
            .min(n / 2);
        let fit_len = n - holdout;

        let stats = Standardizer::fit(&samples.features[..fit_len]);
        let z_rows: Vec<Vec<f64>> = samples.features[..fit_len]
            .iter()
            .map(|row| self.standardize(&stats, row))
            .collect();

        let low = self.fit_target(&z_rows, &samples.target_low[..fit_len])?;
        let high = self.fit_target(&z_rows, &samples.target_high[..fit_len])?;

        let mut state = TrainedState {
            stats,
            low,
            high,
            holdout_len: holdout,
        };

        // Hold-out calibration: mean signed error of uncalibrated inference.
        let mut low_resid = 0.0;
        let mut high_resid = 0.0;
        for i in fit_len..n {
            let pred = Self::predict_with_state(&self.config, &state, &samples.features[i]);
            low_resid += samples.target_low[i] - pred.low;
            high_resid += samples.target_high[i] - pred.high;
        }
        state.low.bias_correction = low_resid / holdout as f64;
        state.high.bias_correction = high_resid / holdout as f64;

        debug!(
            fit = fit_len,
            holdout,
            low_correction = state.low.bias_correction,
            high_correction = state.high.bias_correction,
            "bayesian regressor fitted"
        );

        self.state = Some(state);
        Ok(())
    }

    fn standardize(&self, stats: &Standardizer, features: &[f64]) -> Vec<f64> {
        let clip = self.config.clip_sigma;
        stats
            .apply(features)
            .into_iter()
            .map(|z| z.clamp(-clip, clip))
            .collect()
    }

    fn fit_target(
        &self,
        z_rows: &[Vec<f64>],
        targets: &[f64],
    ) -> Result<TargetModel, PredictorError> {
        let scaler = TargetScaler::fit(targets);
        let y: Vec<f64> = targets.iter().map(|t| (t - scaler.mean) / scaler.std).collect();
        let posterior = self.variational_fit(z_rows, &y)?;
        Ok(TargetModel {
            scaler,
            posterior,
            bias_correction: 0.0,
        })
    }

    /// Mean-field variational updates alternating a Gaussian posterior over
    /// (bias, weights) with a Gamma posterior over noise precision.
    fn variational_fit(
        &self,
        z_rows: &[Vec<f64>],
        y: &[f64],
    ) -> Result<Posterior, PredictorError> {
        let n = z_rows.len();
        let p = z_rows.first().map(|r| r.len()).unwrap_or(0);
        let d = p + 1; // bias column first

        let x = DMatrix::from_fn(n, d, |r, c| if c == 0 { 1.0 } else { z_rows[r][c - 1] });
        let yv = DVector::from_column_slice(y);
        let xtx = x.transpose() * &x;
        let xty = x.transpose() * &yv;

        let w_var = weight_prior_variance(p);
        let mut prior_precision = DMatrix::zeros(d, d);
        prior_precision[(0, 0)] = 1.0 / self.config.bias_prior_variance;
        for j in 1..d {
            prior_precision[(j, j)] = 1.0 / w_var;
        }

        let a0 = self.config.noise_prior_shape;
        let b0 = self.config.noise_prior_rate;
        let mut e_tau = a0 / b0;
        let mut mean = DVector::zeros(d);
        let mut cov = DMatrix::zeros(d, d);
        let mut a_n = a0;
        let mut b_n = b0;

        for _ in 0..self.config.max_iterations {
            let precision = &prior_precision + &xtx * e_tau;
            let chol = Cholesky::new(precision)
                .ok_or(PredictorError::Numerical("posterior precision not positive definite"))?;
            cov = chol.inverse();
            mean = &cov * (&xty * e_tau);

            let resid = &yv - &x * &mean;
            let sse = resid.dot(&resid);
            let xs = &x * &cov;
            let trace = xs.component_mul(&x).sum();
            a_n = a0 + n as f64 / 2.0;
            b_n = b0 + 0.5 * (sse + trace);

            let next = a_n / b_n;
            let converged = (next - e_tau).abs() <= self.config.tolerance * e_tau.abs().max(1.0);
            e_tau = next;
            if converged {
                break;
            }
        }

        Ok(Posterior {
            weight_mean: (1..d).map(|j| mean[j]).collect(),
            weight_variance: (1..d).map(|j| cov[(j, j)]).collect(),
            bias_mean: mean[0],
            bias_variance: cov[(0, 0)],
            noise_shape: a_n,
            noise_rate: b_n,
        })
    }

    fn predict_with_state(
        config: &BayesianConfig,
        state: &TrainedState,
        features: &[f64],
    ) -> RangePrediction {
        let clip = config.clip_sigma;
        let z: Vec<f64> = state
            .stats
            .apply(features)
            .into_iter()
            .map(|v| v.clamp(-clip, clip))
            .collect();

        let (low, low_variance) = Self::evaluate_target(&state.low, &z);
        let (high, high_variance) = Self::evaluate_target(&state.high, &z);
        RangePrediction {
            low,
            high,
            low_variance,
            high_variance,
        }
    }

    fn evaluate_target(model: &TargetModel, z: &[f64]) -> (f64, f64) {
        let post = &model.posterior;
        let mut pred = post.bias_mean;
        let mut var = post.bias_variance;
        for ((w, wv), zi) in post
            .weight_mean
            .iter()
            .zip(post.weight_variance.iter())
            .zip(z.iter())
        {
            pred += w * zi;
            var += wv * zi * zi;
        }
        var += 1.0 / post.expected_noise_precision().max(1e-12);
        (
            pred * model.scaler.std + model.scaler.mean,
            var * model.scaler.std * model.scaler.std,
        )
    }

    /// Predict the low/high pair for one feature vector.
    ///
    /// Standardization reuses the training statistics; `calibrated` toggles
    /// the stored hold-out corrections without retraining. An inverted pair
    /// is swapped, counted and logged; frequent repairs indicate a modeling
    /// problem upstream.
    pub fn predict(
        &self,
        features: &[f64],
        calibrated: bool,
    ) -> Result<RangePrediction, PredictorError> {
        let state = self.state.as_ref().ok_or(PredictorError::NotTrained)?;
        if features.len() != state.stats.len() {
            return Err(PredictorError::SchemaMismatch {
                expected: state.stats.len(),
                actual: features.len(),
            });
        }

        let mut pred = Self::predict_with_state(&self.config, state, features);
        if calibrated {
            pred.low += state.low.bias_correction;
            pred.high += state.high.bias_correction;
        }

        if pred.high < pred.low {
            self.ordering_repairs.set(self.ordering_repairs.get() + 1);
            warn!(low = pred.low, high = pred.high, "bayesian bounds inverted, swapping");
            std::mem::swap(&mut pred.low, &mut pred.high);
            std::mem::swap(&mut pred.low_variance, &mut pred.high_variance);
        }

        Ok(pred)
    }

    /// Size of the hold-out slice used by the last fit.
    pub fn holdout_len(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.holdout_len)
    }
}
