//! Walk-forward validation: expanding training window, fixed validation
//! window, fresh models per step, calibrated vs. uncalibrated comparison.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::SampleSet;
use crate::error::PredictorError;
use crate::predictor::{EnsemblePredictor, PredictorConfig};
use crate::validation::metrics::{joint_directional_accuracy, directional_accuracy, mae, mape};

/// Window geometry for the walk-forward loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    /// Training rows in the first step
    pub initial_train_size: usize,
    /// Validation rows per step
    pub validation_window: usize,
    /// Training-window growth per step
    pub step_size: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            initial_train_size: 120,
            validation_window: 20,
            step_size: 20,
        }
    }
}

/// Metrics for one fold under one calibration setting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub mape_low: f64,
    pub mape_high: f64,
    pub mae_low: f64,
    pub mae_high: f64,
    pub dir_low: f64,
    pub dir_high: f64,
    /// Both targets' change directions must match to count
    pub dir_joint: f64,
    pub n_samples: usize,
}

impl FoldMetrics {
    /// Combined MAPE over both targets.
    pub fn mape(&self) -> f64 {
        (self.mape_low + self.mape_high) / 2.0
    }
}

/// One walk-forward step's report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldReport {
    pub step: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub val_start: usize,
    pub val_end: usize,
    pub train_samples: usize,
    pub val_samples: usize,
    pub uncalibrated: FoldMetrics,
    pub calibrated: FoldMetrics,
}

/// Full validator output: ordered folds plus aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardSummary {
    pub folds: Vec<FoldReport>,
    pub mean_uncalibrated: FoldMetrics,
    pub mean_calibrated: FoldMetrics,
    /// Standard deviation of combined calibrated MAPE across folds
    pub calibrated_mape_std: f64,
    /// Fraction of folds where calibration reduced combined MAPE
    pub calibration_success_rate: f64,
}

/// Rolling-origin backtest harness over an engineered sample set.
#[derive(Debug, Clone)]
pub struct WalkForwardValidator {
    config: WalkForwardConfig,
    predictor_config: PredictorConfig,
}

impl WalkForwardValidator {
    pub fn new(config: WalkForwardConfig, predictor_config: PredictorConfig) -> Self {
        Self {
            config,
            predictor_config,
        }
    }

    /// Run the walk-forward loop.
    ///
    /// Each step trains a fresh predictor (no warm start) on the expanding
    /// window and evaluates the trailing validation window twice, with
    /// calibration off and on. Steps whose window cannot train are skipped
    /// with a warning.
    pub fn run(&self, samples: &SampleSet) -> Result<WalkForwardSummary, PredictorError> {
        let n = samples.len();
        let mut folds = Vec::new();

        for step in 0.. {
            let train_end = self.config.initial_train_size + step * self.config.step_size;
            if train_end >= n {
                break;
            }
            let val_end = (train_end + self.config.validation_window).min(n);
            if val_end == train_end {
                break;
            }

            let train = samples.slice(0..train_end);
            let val = samples.slice(train_end..val_end);

            let mut predictor = EnsemblePredictor::new(self.predictor_config.clone());
            if let Err(e) = predictor.train_on_samples(&train) {
                match e {
                    PredictorError::InsufficientData { .. }
                    | PredictorError::InsufficientValidSamples => {
                        warn!(step, error = %e, "skipping walk-forward step");
                        continue;
                    }
                    other => return Err(other),
                }
            }

            let uncalibrated = self.evaluate(&mut predictor, &val, false)?;
            let calibrated = self.evaluate(&mut predictor, &val, true)?;

            info!(
                step,
                train = train.len(),
                val = val.len(),
                mape_off = uncalibrated.mape(),
                mape_on = calibrated.mape(),
                "walk-forward fold complete"
            );

            folds.push(FoldReport {
                step,
                train_start: 0,
                train_end,
                val_start: train_end,
                val_end,
                train_samples: train.len(),
                val_samples: val.len(),
                uncalibrated,
                calibrated,
            });
        }

        if folds.is_empty() {
            return Err(PredictorError::InsufficientValidSamples);
        }

        Ok(summarize(folds))
    }

    fn evaluate(
        &self,
        predictor: &mut EnsemblePredictor,
        val: &SampleSet,
        calibrated: bool,
    ) -> Result<FoldMetrics, PredictorError> {
        let mut pred_low = Vec::with_capacity(val.len());
        let mut pred_high = Vec::with_capacity(val.len());
        for i in 0..val.len() {
            let result = predictor.predict_sample(val.dates[i], &val.features[i], calibrated)?;
            pred_low.push(result.final_low);
            pred_high.push(result.final_high);
        }

        Ok(FoldMetrics {
            mape_low: mape(&val.target_low, &pred_low),
            mape_high: mape(&val.target_high, &pred_high),
            mae_low: mae(&val.target_low, &pred_low),
            mae_high: mae(&val.target_high, &pred_high),
            dir_low: directional_accuracy(&val.target_low, &pred_low),
            dir_high: directional_accuracy(&val.target_high, &pred_high),
            dir_joint: joint_directional_accuracy(
                &val.target_low,
                &pred_low,
                &val.target_high,
                &pred_high,
            ),
            n_samples: val.len(),
        })
    }
}

fn summarize(folds: Vec<FoldReport>) -> WalkForwardSummary {
    let n = folds.len() as f64;

    let mean = |pick: &dyn Fn(&FoldReport) -> FoldMetrics| {
        let mut out = FoldMetrics::default();
        for fold in &folds {
            let m = pick(fold);
            out.mape_low += m.mape_low;
            out.mape_high += m.mape_high;
            out.mae_low += m.mae_low;
            out.mae_high += m.mae_high;
            out.dir_low += m.dir_low;
            out.dir_high += m.dir_high;
            out.dir_joint += m.dir_joint;
            out.n_samples += m.n_samples;
        }
        out.mape_low /= n;
        out.mape_high /= n;
        out.mae_low /= n;
        out.mae_high /= n;
        out.dir_low /= n;
        out.dir_high /= n;
        out.dir_joint /= n;
        out
    };

    let mean_uncalibrated = mean(&|f: &FoldReport| f.uncalibrated);
    let mean_calibrated = mean(&|f: &FoldReport| f.calibrated);

    let mape_mean = folds.iter().map(|f| f.calibrated.mape()).sum::<f64>() / n;
    let calibrated_mape_std = (folds
        .iter()
        .map(|f| (f.calibrated.mape() - mape_mean).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();

    let successes = folds
        .iter()
        .filter(|f| f.calibrated.mape() < f.uncalibrated.mape())
        .count();
    let calibration_success_rate = successes as f64 / n;

    WalkForwardSummary {
        folds,
        mean_uncalibrated,
        mean_calibrated,
        calibrated_mape_std,
        calibration_success_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{align_series, DailyBar};
    use crate::features::FeatureEngineer;
    use chrono::{Duration, NaiveDate};

    fn bars(n: usize, scale: f64, phase: f64) -> Vec<DailyBar> {
        let start: NaiveDate = "2023-01-02".parse().unwrap();
        (0..n)
            .map(|i| {
                let date = start + Duration::days(i as i64);
                let base = scale * (100.0 + (i as f64 * 0.18 + phase).sin() * 3.0 + i as f64 * 0.03);
                DailyBar {
                    date,
                    open: base - 0.3,
                    high: base + 1.1,
                    low: base - 1.0,
                    close: base,
                    volume: 900_000.0 * scale,
                }
            })
            .collect()
    }

    fn engineered_samples(n: usize) -> SampleSet {
        let aligned = align_series(&bars(n, 1.0, 0.0), &bars(n, 0.5, 0.9), &bars(n, 4.0, 2.1)).unwrap();
        FeatureEngineer::default().build_samples(&aligned).unwrap()
    }

    #[test]
    fn windows_expand_and_never_overlap_validation() {
        let samples = engineered_samples(240);
        let validator = WalkForwardValidator::new(
            WalkForwardConfig {
                initial_train_size: 100,
                validation_window: 20,
                step_size: 25,
            },
            PredictorConfig::default(),
        );
        let summary = validator.run(&samples).unwrap();
        assert!(summary.folds.len() >= 2);

        for pair in summary.folds.windows(2) {
            // Expanding-window property: the next fold's training window
            // strictly contains the previous fold's.
            assert!(pair[1].train_end > pair[0].train_end);
            assert_eq!(pair[0].train_start, 0);
        }
        for fold in &summary.folds {
            assert_eq!(fold.val_start, fold.train_end);
            assert!(fold.val_end > fold.val_start);
        }
    }

    #[test]
    fn summary_aggregates_are_bounded() {
        let samples = engineered_samples(200);
        let validator =
            WalkForwardValidator::new(WalkForwardConfig::default(), PredictorConfig::default());
        let summary = validator.run(&samples).unwrap();

        assert!((0.0..=1.0).contains(&summary.calibration_success_rate));
        assert!(summary.calibrated_mape_std >= 0.0);
        assert!(summary.mean_calibrated.mape_low >= 0.0);
        for fold in &summary.folds {
            assert!((0.0..=1.0).contains(&fold.calibrated.dir_joint));
            assert_eq!(fold.uncalibrated.n_samples, fold.val_samples);
        }
    }

    #[test]
    fn too_short_series_yields_no_folds() {
        let samples = engineered_samples(60);
        let validator = WalkForwardValidator::new(
            WalkForwardConfig {
                initial_train_size: 100,
                validation_window: 20,
                step_size: 20,
            },
            PredictorConfig::default(),
        );
        assert!(matches!(
            validator.run(&samples),
            Err(PredictorError::InsufficientValidSamples)
        ));
    }
}
