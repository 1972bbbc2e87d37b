//! Configuration of SAC agent.
use super::{ActorConfig, CriticConfig};
use crate::{
    model::{SubModel1, SubModel2},
    util::OutDim,
    Device,
};
use anyhow::Result;
use candle_core::Tensor;
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt::Debug,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Sac`](super::Sac).
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct SacConfig<Q, P>
where
    Q: SubModel2<Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P: SubModel1<Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Configuration of the actor.
    pub actor_config: ActorConfig<P::Config>,

    /// Configuration of the critics.
    pub critic_config: CriticConfig<Q::Config>,

    /// Discount factor.
    pub gamma: f64,

    /// Soft update rate of the target critics.
    pub tau: f64,

    /// Target entropy. Defaults to the negative of the action dimension.
    pub target_entropy: Option<f64>,

    /// Initial value of the log of the entropy coefficient.
    pub init_log_alpha: f64,

    /// Learning rate of the entropy coefficient.
    pub lr_alpha: f64,

    /// Lower bound of the log standard deviation of the policy.
    pub min_lstd: f64,

    /// Upper bound of the log standard deviation of the policy.
    pub max_lstd: f64,

    /// Small constant in the log-probability correction of `tanh`.
    pub epsilon: f64,

    /// Device for actor/critic models.
    pub device: Option<Device>,
}

impl<Q, P> Clone for SacConfig<Q, P>
where
    Q: SubModel2<Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P: SubModel1<Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    fn clone(&self) -> Self {
        Self {
            actor_config: self.actor_config.clone(),
            critic_config: self.critic_config.clone(),
            gamma: self.gamma,
            tau: self.tau,
            target_entropy: self.target_entropy,
            init_log_alpha: self.init_log_alpha,
            lr_alpha: self.lr_alpha,
            min_lstd: self.min_lstd,
            max_lstd: self.max_lstd,
            epsilon: self.epsilon,
            device: self.device,
        }
    }
}

impl<Q, P> Default for SacConfig<Q, P>
where
    Q: SubModel2<Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P: SubModel1<Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    fn default() -> Self {
        Self {
            actor_config: Default::default(),
            critic_config: Default::default(),
            gamma: 0.99,
            tau: 0.005,
            target_entropy: None,
            init_log_alpha: 1.0,
            lr_alpha: 3e-4,
            min_lstd: -20.0,
            max_lstd: 2.0,
            epsilon: 1e-6,
            device: None,
        }
    }
}

impl<Q, P> SacConfig<Q, P>
where
    Q: SubModel2<Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P: SubModel1<Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Configuration of actor.
    pub fn actor_config(mut self, actor_config: ActorConfig<P::Config>) -> Self {
        self.actor_config = actor_config;
        self
    }

    /// Configuration of critic.
    pub fn critic_config(mut self, critic_config: CriticConfig<Q::Config>) -> Self {
        self.critic_config = critic_config;
        self
    }

    /// Discount factor.
    pub fn discount_factor(mut self, v: f64) -> Self {
        self.gamma = v;
        self
    }

    /// Soft update rate of the target critics.
    pub fn tau(mut self, v: f64) -> Self {
        self.tau = v;
        self
    }

    /// Target entropy.
    pub fn target_entropy(mut self, v: f64) -> Self {
        self.target_entropy = Some(v);
        self
    }

    /// Initial value of the log of the entropy coefficient.
    pub fn init_log_alpha(mut self, v: f64) -> Self {
        self.init_log_alpha = v;
        self
    }

    /// Learning rate of the entropy coefficient.
    pub fn lr_alpha(mut self, v: f64) -> Self {
        self.lr_alpha = v;
        self
    }

    /// Device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Constructs [`SacConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of SAC agent from {:?}", path_);
        Ok(b)
    }

    /// Saves [`SacConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of SAC agent into {:?}", path_);
        Ok(())
    }
}
