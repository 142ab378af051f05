//! Ensemble combination: regime detection, dynamic weighting, blending,
//! range reconciliation and the k-fold stacking alternate.

pub mod combiner;
pub mod regime;
pub mod stacking;
pub mod weights;

pub use combiner::{EnsembleCombiner, EnsembleConfig, PredictionRecord, PredictionResult};
pub use regime::{Regime, RegimeDetector, RegimeSignals, RegimeThresholds};
pub use stacking::{MetaModel, StackingCombiner, StackingConfig};
pub use weights::{EnsembleWeights, WeightBounds, WeightSnapshot};
