#![warn(missing_docs)]
//! Training core of off-policy, maximum-entropy level generators.
//!
//! The crate defines the collaborators a soft actor-critic trainer talks to
//! ([`VecEnv`], [`TransitionStore`], [`Estimator`], [`Generator`]) and the
//! machinery that binds them: the [`RolloutAggregator`], which turns the
//! step-by-step output of a vectorized environment into whole-episode
//! transition batches, and the [`Trainer`], which drives the
//! interaction/update/checkpoint/generation cadence over a step budget.
pub mod error;
pub mod record;
pub mod replay_mem;
pub mod dummy;

mod base;
pub use base::{
    ActBatch, Estimator, GenPolicy, Generator, ObsBatch, Policy, TransitionBatch,
    TransitionStore, VecEnv, VecStep,
};

mod rollout;
pub use rollout::{RolloutAggregator, REWARD_LIST_KEY, TERMINAL_OBS_KEY};

mod checkpoint;
pub use checkpoint::CheckpointSchedule;

mod trainer;
pub use trainer::{Trainer, TrainerConfig};
