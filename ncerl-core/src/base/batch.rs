//! Batch of transitions.
use super::{ActBatch, ObsBatch};
use crate::error::NcerlError;
use anyhow::Result;

/// Transitions `(o_t, a_t, r_t, o_t+1, is_terminated_t)` stored row-wise.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionBatch {
    /// Observations.
    pub obs: ObsBatch,

    /// Actions.
    pub act: ActBatch,

    /// Rewards.
    pub reward: Vec<f32>,

    /// Next observations.
    pub next_obs: ObsBatch,

    /// Terminal flags.
    pub is_terminated: Vec<bool>,
}

impl TransitionBatch {
    /// Constructs a batch, checking that all fields have the same length.
    pub fn new(
        obs: ObsBatch,
        act: ActBatch,
        reward: Vec<f32>,
        next_obs: ObsBatch,
        is_terminated: Vec<bool>,
    ) -> Result<Self> {
        let n = reward.len();
        for (what, len) in [
            ("obs", obs.nrows()),
            ("act", act.nrows()),
            ("next_obs", next_obs.nrows()),
            ("is_terminated", is_terminated.len()),
        ] {
            if len != n {
                return Err(NcerlError::ShapeMismatch {
                    what: what.to_string(),
                    expected: n,
                    actual: len,
                }
                .into());
            }
        }
        Ok(Self {
            obs,
            act,
            reward,
            next_obs,
            is_terminated,
        })
    }

    /// Unpack the data `(o_t, a_t, r_t, o_t+1, is_terminated_t)`.
    pub fn unpack(self) -> (ObsBatch, ActBatch, Vec<f32>, ObsBatch, Vec<bool>) {
        (
            self.obs,
            self.act,
            self.reward,
            self.next_obs,
            self.is_terminated,
        )
    }

    /// Returns the number of transitions.
    pub fn len(&self) -> usize {
        self.reward.len()
    }

    /// Returns `true` if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.reward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_new_rejects_ragged_fields() {
        let res = TransitionBatch::new(
            Array2::zeros((3, 2)),
            Array2::zeros((2, 1)),
            vec![0.0; 3],
            Array2::zeros((3, 2)),
            vec![false; 3],
        );
        let err = res.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NcerlError>(),
            Some(NcerlError::ShapeMismatch { expected: 3, actual: 2, .. })
        ));
    }
}
