//! Walk-forward validation harness and evaluation metrics.

pub mod metrics;
pub mod walk_forward;

pub use metrics::{regression_report, RegressionReport};
pub use walk_forward::{
    FoldMetrics, FoldReport, WalkForwardConfig, WalkForwardSummary, WalkForwardValidator,
};
