//! Estimator.
use super::{Policy, TransitionBatch};
use crate::record::Record;
use anyhow::Result;
use std::path::Path;

/// A trainable policy together with the value functions it learns from.
pub trait Estimator: Policy {
    /// Set the policy to training mode.
    fn train(&mut self);

    /// Set the policy to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Performs one optimization step on the given batch and returns losses.
    fn update(&mut self, batch: TransitionBatch) -> Result<Record>;

    /// Saves parameters in directory `path`.
    ///
    /// File names are built from `fmt` by replacing `{}` with the role of
    /// each network. The policy is always saved; value functions only when
    /// `only_actor` is `false`.
    fn save_params(&self, path: &Path, fmt: &str, only_actor: bool) -> Result<()>;

    /// Saves the policy network to the file `path`.
    fn save_policy(&self, path: &Path) -> Result<()>;

    /// Loads parameters saved with [`Estimator::save_params`].
    fn load_params(&mut self, path: &Path, fmt: &str) -> Result<()>;
}
