//! Core data structures: daily bars, aligned multi-asset series and the
//! column-oriented sample set consumed by every model.

pub mod types;

pub use types::{align_series, AlignedSeries, DailyBar, SampleSet};
