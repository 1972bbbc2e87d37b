//! Generation of artifacts with the policy under training.
use super::{ActBatch, ObsBatch, Policy};
use anyhow::Result;
use std::path::Path;

/// Read-only view of a policy handed to a [`Generator`].
pub struct GenPolicy<'a, P: Policy + ?Sized> {
    policy: &'a P,
    hist_len: usize,
}

impl<'a, P: Policy + ?Sized> GenPolicy<'a, P> {
    /// Wraps `policy`, whose observations are `hist_len` segments long.
    pub fn new(policy: &'a P, hist_len: usize) -> Self {
        Self { policy, hist_len }
    }

    /// Length of the history the policy observes.
    pub fn hist_len(&self) -> usize {
        self.hist_len
    }
}

impl<P: Policy + ?Sized> Policy for GenPolicy<'_, P> {
    fn act(&self, obs: &ObsBatch) -> Result<ActBatch> {
        self.policy.act(obs)
    }
}

/// Produces artifacts with a policy, e.g. levels rendered from generated segments.
pub trait Generator {
    /// Generates `n` artifacts of `eplen` segments each into `out_dir`,
    /// tagged with `tag`.
    fn generate<P: Policy + ?Sized>(
        &mut self,
        policy: &GenPolicy<'_, P>,
        out_dir: &Path,
        tag: &str,
        n: usize,
        eplen: usize,
    ) -> Result<()>;
}
