//! Training utilities for models.
//!
//! This module provides training functionality including:
//! - Loss functions (MSE, binary and categorical cross entropy, L2, weighted sums)
//! - Solvers wrapping Burn's Adam and SGD optimizers
//! - Batching and training data generators
//! - Fit configuration, callbacks and the training loop

pub mod batching;
pub mod callbacks;
mod config;
pub mod generator;
pub mod loss;
mod progress;
mod solver;
mod trainer;

pub use batching::{Remainder, split_batches};
pub use callbacks::{
    BatchMetric, CallbackAction, CsvMetricsLogger, EpochCallback, EpochMetric, Metrics, SaveParams,
    SaveParamsEvery, TrainingCallback,
};
pub use config::FitConfig;
pub use generator::{Batch, SyntheticDataGenerator, TensorDataGenerator, TrainingDataGenerator};
pub use loss::{LossContext, LossFn, LossOutput};
pub use progress::ProgressBar;
pub use solver::{Solver, adam, sgd};
