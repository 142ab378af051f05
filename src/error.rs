//! Error taxonomy shared across the crate.

use thiserror::Error;

/// Errors surfaced by training, prediction and validation routines.
///
/// Numeric degeneracy inside indicator formulas is never an error: those
/// paths substitute documented defaults locally. Everything that reaches a
/// caller is listed here.
#[derive(Debug, Error)]
pub enum PredictorError {
    /// A required input series is missing or empty.
    #[error("missing required series: {0}")]
    MissingSeries(&'static str),

    /// A feature vector's length disagrees with the declared schema.
    #[error("feature schema mismatch: expected {expected} values, got {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    /// Training was invoked with fewer samples than the component minimum.
    #[error("insufficient data: need at least {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Prediction was requested before the model was trained.
    #[error("model has not been trained")]
    NotTrained,

    /// An evaluation loop skipped every sample and has nothing to work with.
    #[error("no usable samples survived evaluation")]
    InsufficientValidSamples,

    /// A linear solve failed mid-training.
    #[error("numerical failure: {0}")]
    Numerical(&'static str),
}
