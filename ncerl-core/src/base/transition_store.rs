//! Transition store interface.
use super::TransitionBatch;
use anyhow::Result;

/// Storage of experience, filled one whole episode at a time.
pub trait TransitionStore {
    /// Configuration of the store.
    type Config: Clone;

    /// Builds a new store from the given configuration.
    fn build(config: &Self::Config) -> Self;

    /// Appends the transitions of one episode.
    fn add_batched(&mut self, batch: TransitionBatch) -> Result<()>;

    /// Samples `size` transitions uniformly at random.
    ///
    /// Fails if fewer than `size` transitions are stored.
    fn sample(&mut self, size: usize) -> Result<TransitionBatch>;

    /// Returns the number of stored transitions.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
