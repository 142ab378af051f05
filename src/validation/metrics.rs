//! Evaluation metrics over prediction/actual pairs.
//!
//! Pure functions; empty input yields an explicit zeroed report, never NaN.

use serde::{Deserialize, Serialize};

/// Summary statistics for one target column.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RegressionReport {
    pub mae: f64,
    pub rmse: f64,
    /// Mean absolute percent error, as a fraction
    pub mape: f64,
    /// Median absolute percent error
    pub median_ape: f64,
    /// 90th percentile absolute percent error
    pub p90_ape: f64,
    pub r2: f64,
    /// Sign agreement of consecutive changes
    pub directional_accuracy: f64,
    pub n_samples: usize,
}

/// Build the full report for one target.
pub fn regression_report(actual: &[f64], predicted: &[f64]) -> RegressionReport {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return RegressionReport::default();
    }

    let mut abs_errors = Vec::with_capacity(n);
    let mut apes = Vec::with_capacity(n);
    let mut sq_sum = 0.0;
    for i in 0..n {
        let err = actual[i] - predicted[i];
        abs_errors.push(err.abs());
        sq_sum += err * err;
        if actual[i].abs() > 1e-12 {
            apes.push((err / actual[i]).abs());
        }
    }

    let mae = abs_errors.iter().sum::<f64>() / n as f64;
    let rmse = (sq_sum / n as f64).sqrt();
    let mape = if apes.is_empty() {
        0.0
    } else {
        apes.iter().sum::<f64>() / apes.len() as f64
    };

    let mean_actual = actual[..n].iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = actual[..n].iter().map(|a| (a - mean_actual).powi(2)).sum();
    let r2 = if ss_tot > 0.0 { 1.0 - sq_sum / ss_tot } else { 0.0 };

    RegressionReport {
        mae,
        rmse,
        mape,
        median_ape: percentile(&mut apes.clone(), 0.5),
        p90_ape: percentile(&mut apes.clone(), 0.9),
        r2,
        directional_accuracy: directional_accuracy(&actual[..n], &predicted[..n]),
        n_samples: n,
    }
}

/// Mean absolute error.
pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    actual[..n]
        .iter()
        .zip(predicted[..n].iter())
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / n as f64
}

/// Mean absolute percent error as a fraction; samples with a near-zero
/// actual are skipped.
pub fn mape(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    let mut sum = 0.0;
    let mut used = 0usize;
    for i in 0..n {
        if actual[i].abs() > 1e-12 {
            sum += ((actual[i] - predicted[i]) / actual[i]).abs();
            used += 1;
        }
    }
    if used == 0 {
        0.0
    } else {
        sum / used as f64
    }
}

/// Fraction of consecutive pairs where the sign of the actual change matches
/// the sign of the predicted change.
pub fn directional_accuracy(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n < 2 {
        return 0.0;
    }
    let mut hits = 0usize;
    for i in 1..n {
        let da = actual[i] - actual[i - 1];
        let dp = predicted[i] - predicted[i - 1];
        if da.signum() == dp.signum() {
            hits += 1;
        }
    }
    hits as f64 / (n - 1) as f64
}

/// Joint directional accuracy: both the low and high change directions must
/// match for a pair to count.
pub fn joint_directional_accuracy(
    actual_low: &[f64],
    predicted_low: &[f64],
    actual_high: &[f64],
    predicted_high: &[f64],
) -> f64 {
    let n = actual_low
        .len()
        .min(predicted_low.len())
        .min(actual_high.len())
        .min(predicted_high.len());
    if n < 2 {
        return 0.0;
    }
    let mut hits = 0usize;
    for i in 1..n {
        let low_hit = (actual_low[i] - actual_low[i - 1]).signum()
            == (predicted_low[i] - predicted_low[i - 1]).signum();
        let high_hit = (actual_high[i] - actual_high[i - 1]).signum()
            == (predicted_high[i] - predicted_high[i - 1]).signum();
        if low_hit && high_hit {
            hits += 1;
        }
    }
    hits as f64 / (n - 1) as f64
}

fn percentile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((values.len() - 1) as f64 * q).round() as usize;
    values[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn report_on_known_values() {
        let actual = vec![100.0, 102.0, 101.0, 103.0];
        let predicted = vec![101.0, 101.0, 102.0, 104.0];
        let report = regression_report(&actual, &predicted);
        assert_relative_eq!(report.mae, 1.0, epsilon = 1e-12);
        assert_relative_eq!(report.rmse, 1.0, epsilon = 1e-12);
        assert!(report.mape > 0.009 && report.mape < 0.011);
        assert_eq!(report.n_samples, 4);
    }

    #[test]
    fn empty_input_is_safe() {
        let report = regression_report(&[], &[]);
        assert_eq!(report.mae, 0.0);
        assert_eq!(report.n_samples, 0);
        assert_eq!(mape(&[], &[]), 0.0);
        assert_eq!(directional_accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn directional_accuracy_counts_sign_matches() {
        let actual = vec![1.0, 2.0, 1.5, 2.5];
        let predicted = vec![1.0, 1.8, 1.9, 2.6]; // up, up(≠down), up
        assert_relative_eq!(directional_accuracy(&actual, &predicted), 2.0 / 3.0);
    }

    #[test]
    fn joint_direction_requires_both_targets() {
        let al = vec![1.0, 2.0, 3.0];
        let pl = vec![1.0, 2.0, 3.0]; // both up: hits
        let ah = vec![2.0, 3.0, 2.0];
        let ph = vec![2.0, 3.5, 4.0]; // second pair diverges
        assert_relative_eq!(joint_directional_accuracy(&al, &pl, &ah, &ph), 0.5);
    }

    #[test]
    fn mape_skips_zero_actuals() {
        let actual = vec![0.0, 100.0];
        let predicted = vec![5.0, 110.0];
        assert_relative_eq!(mape(&actual, &predicted), 0.1, epsilon = 1e-12);
    }
}
