use crate::util::array2_to_tensor;
use anyhow::Result;
use candle_core::{Device, Tensor};
use ncerl_core::TransitionBatch;

/// A [`TransitionBatch`] moved to a device.
///
/// `obs`, `act` and `next_obs` have shape `[batch_size, dim]`, while `reward`
/// and `is_terminated` have shape `[batch_size]`.
#[derive(Clone, Debug)]
pub struct TensorBatch {
    /// Observations.
    pub obs: Tensor,

    /// Actions.
    pub act: Tensor,

    /// Rewards.
    pub reward: Tensor,

    /// Next observations.
    pub next_obs: Tensor,

    /// Terminal flags as `0.0` or `1.0`.
    pub is_terminated: Tensor,
}

impl TensorBatch {
    /// Converts a batch of transitions into tensors on `device`.
    pub fn from_transitions(batch: TransitionBatch, device: &Device) -> Result<Self> {
        let batch_size = batch.len();
        let (obs, act, reward, next_obs, is_terminated) = batch.unpack();
        let is_terminated = is_terminated
            .iter()
            .map(|e| *e as u8 as f32)
            .collect::<Vec<_>>();

        Ok(Self {
            obs: array2_to_tensor(&obs, device)?,
            act: array2_to_tensor(&act, device)?,
            reward: Tensor::from_vec(reward, (batch_size,), device)?,
            next_obs: array2_to_tensor(&next_obs, device)?,
            is_terminated: Tensor::from_vec(is_terminated, (batch_size,), device)?,
        })
    }

    /// Returns the number of transitions.
    pub fn len(&self) -> usize {
        self.reward.dims()[0]
    }

    /// Returns `true` if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
