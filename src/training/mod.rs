//! Training module.
//!
//! [`trainer::Trainer`] runs the online loop: it owns the environment, the
//! completion client and the trajectory buffer, chooses between random
//! exploration and the two agents, and reports evaluation regret.

pub mod trainer;

pub use trainer::{confidence_probability, EvaluationRecord, Trainer, TrainingSummary};
