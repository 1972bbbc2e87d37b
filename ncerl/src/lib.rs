//! Trains a soft actor-critic level generator on a latent-segment
//! environment.
//!
//! The crate wires the pieces of `ncerl-core`, `ncerl-candle-agent` and
//! `ncerl-tensorboard` together:
//!
//! * [`ToyLevelEnv`] is a vectorized environment where an action is the
//!   latent vector of the next level segment and the observation is the
//!   history of the last `hist_len` segments. Rewards are only known once an
//!   episode is over, so they are reported as per-step lists in the info map.
//! * [`JsonLevelGenerator`] rolls a policy from random histories and writes
//!   the generated latent sequences as JSON.
//!
//! The `train_egsac` binary runs the whole training loop.
mod generator;
mod toy_env;
pub use generator::{GeneratedLevels, JsonLevelGenerator};
pub use toy_env::{ToyLevelEnv, ToyLevelEnvConfig, DIVERSITY_REWARD_KEY, FIDELITY_REWARD_KEY};
