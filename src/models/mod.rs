//! Base regression models: the Bayesian linear regressor and the
//! gradient-boosted tree ensemble.

pub mod bayesian;
pub mod gbt;

pub use bayesian::{BayesianConfig, BayesianRegressor, Posterior, RangePrediction};
pub use gbt::{GbtModel, GbtParams, TreeEnsemble, TreeEnsembleConfig, TreePrediction};
