//! Policy.
use super::{ActBatch, ObsBatch};
use anyhow::Result;

/// A policy on a vectorized environment.
///
/// Policy is a mapping from a batch of observations to a batch of actions,
/// one row each. Selecting actions has no effect on any trainable state.
pub trait Policy {
    /// Returns actions given observations.
    fn act(&self, obs: &ObsBatch) -> Result<ActBatch>;
}
