//! Core functionalities.
mod batch;
mod env;
mod estimator;
mod generator;
mod policy;
mod transition_store;
pub use batch::TransitionBatch;
pub use env::{VecEnv, VecStep};
pub use estimator::Estimator;
pub use generator::{GenPolicy, Generator};
pub use policy::Policy;
pub use transition_store::TransitionStore;
use ndarray::Array2;

/// A batch of observations, one row per environment slot or per transition.
pub type ObsBatch = Array2<f32>;

/// A batch of actions, one row per environment slot or per transition.
pub type ActBatch = Array2<f32>;
