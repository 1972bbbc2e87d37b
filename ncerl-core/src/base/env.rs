//! Vectorized environment.
use super::{ActBatch, ObsBatch};
use crate::record::Record;
use anyhow::Result;

/// Output of [`VecEnv::step`], one entry per environment slot.
///
/// Slots whose episode ended are reset by the environment before returning,
/// so the corresponding row of `obs` is the first observation of the next
/// episode. The true terminal observation is then found in the slot's info
/// under [`TERMINAL_OBS_KEY`](crate::TERMINAL_OBS_KEY).
#[derive(Debug, Clone)]
pub struct VecStep {
    /// Next observations.
    pub obs: ObsBatch,

    /// Rewards returned by the environment.
    ///
    /// The trainer ignores them and reconstructs rewards from `info` at the
    /// end of each episode.
    pub reward: Vec<f32>,

    /// Flags denoting the end of an episode.
    pub is_done: Vec<bool>,

    /// Information of each slot.
    pub info: Vec<Record>,
}

impl VecStep {
    /// Constructs a [`VecStep`].
    pub fn new(obs: ObsBatch, reward: Vec<f32>, is_done: Vec<bool>, info: Vec<Record>) -> Self {
        Self {
            obs,
            reward,
            is_done,
            info,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.is_done.len()
    }

    /// Returns `true` if the step holds no slot.
    pub fn is_empty(&self) -> bool {
        self.is_done.is_empty()
    }
}

/// A batch of environment instances stepped together.
///
/// Stepping may run the instances in parallel internally; for the trainer it
/// is a single blocking call.
pub trait VecEnv {
    /// Configurations.
    type Config: Clone;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: u64) -> Result<Self>
    where
        Self: Sized;

    /// The number of environment instances.
    fn num_envs(&self) -> usize;

    /// Length of the history of segments an observation is made of.
    fn hist_len(&self) -> usize;

    /// Length of an episode.
    fn eplen(&self) -> usize;

    /// Resets all instances and returns their observations.
    fn reset(&mut self) -> Result<ObsBatch>;

    /// Applies one action per instance, resetting instances whose episode ends.
    fn step(&mut self, act: &ActBatch) -> Result<VecStep>;
}
