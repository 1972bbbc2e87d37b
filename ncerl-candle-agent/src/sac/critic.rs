//! Critic of SAC agent.
use crate::{
    model::SubModel2,
    opt::{Optimizer, OptimizerConfig},
    util::track,
};
use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Critic`].
pub struct CriticConfig<Q> {
    /// Configuration of the action-value function.
    pub q_config: Option<Q>,

    /// Configuration of the optimizer.
    pub opt_config: OptimizerConfig,
}

impl<Q> Default for CriticConfig<Q> {
    fn default() -> Self {
        Self {
            q_config: None,
            opt_config: OptimizerConfig::default(),
        }
    }
}

impl<Q> CriticConfig<Q>
where
    Q: DeserializeOwned + Serialize,
{
    /// Sets configurations for action-value function.
    pub fn q_config(mut self, v: Q) -> Self {
        self.q_config = Some(v);
        self
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Constructs [CriticConfig] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [CriticConfig].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Represents soft critic for SAC agents.
///
/// It takes observations and actions as inputs and outputs action values.
pub struct Critic<Q>
where
    Q: SubModel2<Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize,
{
    device: Device,
    varmap: VarMap,

    /// Action-value function
    q: Q,
    q_config: Q::Config,

    /// `None` for target critics, which only move by [`track`].
    opt: Option<Optimizer>,
}

impl<Q> Critic<Q>
where
    Q: SubModel2<Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    /// Constructs [`Critic`].
    pub fn build(config: CriticConfig<Q::Config>, device: Device) -> Result<Critic<Q>> {
        let q_config = config.q_config.context("q_config is not set.")?;
        Self::_build(device, Some(config.opt_config), q_config)
    }

    fn _build(
        device: Device,
        opt_config: Option<OptimizerConfig>,
        q_config: Q::Config,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let q = {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            Q::build(vb, q_config.clone())?
        };
        let opt = match opt_config {
            Some(opt_config) => Some(opt_config.build(varmap.all_vars())?),
            None => None,
        };

        Ok(Self {
            device,
            varmap,
            q,
            q_config,
            opt,
        })
    }

    /// Constructs a target critic with its own variables, initialized to the
    /// values of this critic.
    ///
    /// The target critic has no optimizer.
    pub fn build_target(&self) -> Result<Self> {
        let tgt = Self::_build(self.device.clone(), None, self.q_config.clone())?;
        track(tgt.get_varmap(), self.get_varmap(), 1.0)?;
        Ok(tgt)
    }

    /// Outputs the action-value given observations and actions.
    pub fn forward(&self, obs: &Q::Input1, act: &Q::Input2) -> Result<Tensor> {
        self.q.forward(obs, act)
    }

    /// Updates the critic parameters given a loss.
    ///
    /// Fails for a target critic.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match &mut self.opt {
            Some(opt) => opt.backward_step(loss),
            None => Err(anyhow!("A target critic is not trained by gradient steps")),
        }
    }

    /// Returns `true` if the critic has an optimizer.
    pub fn is_trainable(&self) -> bool {
        self.opt.is_some()
    }

    /// Returns the variables of the critic.
    pub fn get_varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Saves the parameters in a safetensors file.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.varmap.save(&path)?;
        info!("Save critic to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads the parameters from a safetensors file.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.varmap.load(&path)?;
        info!("Load critic from {:?}", path.as_ref());
        Ok(())
    }
}
