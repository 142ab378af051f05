//! Ensemble weight state and its clamp/renormalize invariant.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Allowed band for any single weight, preventing degenerate
/// all-or-nothing blends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for WeightBounds {
    fn default() -> Self {
        Self { min: 0.1, max: 0.8 }
    }
}

impl WeightBounds {
    /// Clamp `a` so that both `a` and its complement `1 - a` stay inside the
    /// band, then return the normalized pair.
    pub fn normalize_pair(&self, a: f64, b: f64) -> (f64, f64) {
        let a = a.clamp(self.min, self.max);
        let b = b.clamp(self.min, self.max);
        let sum = a + b;
        let mut a = if sum > 0.0 { a / sum } else { 0.5 };
        // b = 1 - a must also respect the band.
        let lo = self.min.max(1.0 - self.max);
        let hi = self.max.min(1.0 - self.min);
        a = a.clamp(lo, hi);
        (a, 1.0 - a)
    }
}

/// Blend weights for the two base models, plus the range-reconciliation
/// coefficient and update bookkeeping.
///
/// Tree weights for low and high are tracked separately even though the
/// update paths keep them equal in practice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleWeights {
    /// Bayesian model weight (shared across targets before per-target
    /// normalization)
    pub bayesian: f64,
    /// Tree model weight for the low target
    pub tree_low: f64,
    /// Tree model weight for the high target
    pub tree_high: f64,
    /// Interpolation coefficient used by range reconciliation
    pub range_adjustment: f64,
    /// Date of the last performance-triggered update
    pub last_update: Option<NaiveDate>,
    /// Number of performance-triggered updates applied
    pub update_count: u64,
}

impl EnsembleWeights {
    /// Even split, used before evaluation-based initialization.
    pub fn balanced(range_adjustment: f64) -> Self {
        Self {
            bayesian: 0.5,
            tree_low: 0.5,
            tree_high: 0.5,
            range_adjustment,
            last_update: None,
            update_count: 0,
        }
    }
}

/// Per-target weight pairs actually used for one blend, each pair summing
/// to 1 within the bounds band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub bayesian_low: f64,
    pub tree_low: f64,
    pub bayesian_high: f64,
    pub tree_high: f64,
}
