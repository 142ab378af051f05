//! Feature vector provider: technical indicators, calendar features and the
//! schema-checked assembly that feeds both base models.

pub mod calendar;
pub mod engineering;
pub mod technical;

pub use engineering::{sanitize, FeatureConfig, FeatureEngineer, FeatureSchema};
