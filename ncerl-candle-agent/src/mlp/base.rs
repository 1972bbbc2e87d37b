use super::{create_linear_layers, mlp_forward, MlpConfig};
use crate::model::{SubModel1, SubModel2};
use anyhow::Result;
use candle_core::{Device, Module, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};

/// Multilayer perceptron with ReLU activation function.
///
/// As a [`SubModel2`] it takes the concatenation of its two inputs, which
/// makes it a Q-function of observations and actions.
pub struct Mlp {
    config: MlpConfig,
    device: Device,
    layers: Vec<Linear>,
    head: Linear,
}

impl Mlp {
    fn _build(vs: VarBuilder, config: MlpConfig) -> Result<Self> {
        let device = vs.device().clone();
        let layers = create_linear_layers("mlp", vs.clone(), &config)?;
        let in_dim = config.units.last().copied().unwrap_or(config.in_dim);
        let head = linear(in_dim, config.out_dim, vs.pp("mlp").pp("head"))?;

        Ok(Self {
            config,
            device,
            layers,
            head,
        })
    }

    fn _forward(&self, xs: Tensor) -> Result<Tensor> {
        let xs = mlp_forward(xs, &self.layers)?;
        let xs = self.head.forward(&xs)?;

        match self.config.activation_out {
            false => Ok(xs),
            true => Ok(xs.relu()?),
        }
    }
}

impl SubModel1 for Mlp {
    type Config = MlpConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn forward(&self, xs: &Self::Input) -> Result<Tensor> {
        self._forward(xs.to_device(&self.device)?)
    }

    fn build(vs: VarBuilder, config: Self::Config) -> Result<Self> {
        Self::_build(vs, config)
    }
}

impl SubModel2 for Mlp {
    type Config = MlpConfig;
    type Input1 = Tensor;
    type Input2 = Tensor;
    type Output = Tensor;

    fn forward(&self, input1: &Self::Input1, input2: &Self::Input2) -> Result<Tensor> {
        let input1 = input1.to_device(&self.device)?;
        let input2 = input2.to_device(&self.device)?;
        let input = Tensor::cat(&[input1, input2], D::Minus1)?;
        self._forward(input)
    }

    fn build(vs: VarBuilder, config: Self::Config) -> Result<Self> {
        Self::_build(vs, config)
    }
}
