//! Entropy coefficient of SAC.
use crate::opt::{Optimizer, OptimizerConfig};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{init::Init, VarBuilder, VarMap};

/// The entropy coefficient of SAC, tuned towards a target entropy.
///
/// The coefficient is optimized in log space.
pub struct EntCoef {
    log_alpha: Tensor,
    target_entropy: f64,
    opt: Optimizer,
}

impl EntCoef {
    /// Constructs an instance of `EntCoef`.
    pub fn new(
        init_log_alpha: f64,
        target_entropy: f64,
        learning_rate: f64,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let log_alpha = vb.get_with_hints(1, "log_alpha", Init::Const(init_log_alpha))?;
        let opt = OptimizerConfig::Adam { lr: learning_rate }.build(varmap.all_vars())?;

        Ok(Self {
            log_alpha,
            target_entropy,
            opt,
        })
    }

    /// Returns the entropy coefficient, detached from the graph.
    pub fn alpha(&self) -> Result<Tensor> {
        Ok(self.log_alpha.detach().exp()?)
    }

    /// Returns the entropy coefficient as a scalar.
    pub fn alpha_scalar(&self) -> Result<f32> {
        Ok(self.alpha()?.squeeze(0)?.to_scalar::<f32>()?)
    }

    /// The target entropy.
    pub fn target_entropy(&self) -> f64 {
        self.target_entropy
    }

    /// Returns the loss of the coefficient given log probabilities of actions.
    ///
    /// The log probabilities are treated as constants.
    pub fn loss(&self, logp: &Tensor) -> Result<Tensor> {
        let tmp = (logp.detach() + self.target_entropy)?;
        Ok((self.log_alpha.broadcast_mul(&tmp)? * -1f64)?.mean_all()?)
    }

    /// Does an optimization step given a loss.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        self.opt.backward_step(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ent_coef_moves_towards_target_entropy() -> Result<()> {
        let device = Device::Cpu;
        let mut ent_coef = EntCoef::new(1.0, -2.0, 0.1, &device)?;
        assert!((ent_coef.alpha_scalar()? - 1f32.exp()).abs() < 1e-5);

        // Entropy above the target (logp + target < 0) lowers alpha
        let logp = Tensor::from_slice(&[1.0f32, 1.5, 0.5], (3,), &device)?;
        let loss = ent_coef.loss(&logp)?;
        assert!((loss.to_scalar::<f32>()? - 1.0).abs() < 1e-5);
        ent_coef.backward_step(&loss)?;
        assert!(ent_coef.alpha_scalar()? < 1f32.exp());
        Ok(())
    }
}
