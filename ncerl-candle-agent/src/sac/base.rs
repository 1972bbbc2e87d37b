use super::{Actor, Critic, EntCoef, SacConfig};
use crate::{
    model::{SubModel1, SubModel2},
    util::{array2_to_tensor, tensor_to_array2, track, OutDim},
    TensorBatch,
};
use anyhow::{Context, Result};
use candle_core::{Device, Tensor, D};
use candle_nn::loss::mse;
use log::{info, trace};
use ncerl_core::{
    error::NcerlError,
    record::{Record, RecordValue},
    ActBatch, Estimator, ObsBatch, Policy, TransitionBatch,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
};

type ActionValue = Tensor;
type ActMean = Tensor;
type ActLstd = Tensor;

fn normal_logp(x: &Tensor) -> Result<Tensor> {
    let tmp: Tensor =
        ((-0.5 * (2.0 * std::f32::consts::PI).ln() as f64) - (0.5 * x.powf(2.0)?)?)?;
    Ok(tmp.sum(D::Minus1)?)
}

/// Returns the value of a scalar loss, failing if it is NaN or infinite.
fn finite(name: &str, loss: &Tensor) -> Result<f32> {
    let v = loss.to_scalar::<f32>()?;
    if !v.is_finite() {
        return Err(NcerlError::NonFiniteLoss {
            name: name.to_string(),
        }
        .into());
    }
    Ok(v)
}

fn artifact(path: &Path, fmt: &str, role: &str) -> PathBuf {
    path.join(format!("{}.safetensors", fmt.replace("{}", role)))
}

/// Soft actor critic (SAC) with twin critics and automatic entropy tuning.
///
/// Target critics are updated only by polyak averaging. The bootstrapped value
/// of the next observation is never masked by the terminal flag: episodes end
/// at a fixed horizon, not at absorbing states.
pub struct Sac<Q, P>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = ActionValue>,
    P: SubModel1<Input = Tensor, Output = (ActMean, ActLstd)>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    pub(super) critic1: Critic<Q>,
    pub(super) critic2: Critic<Q>,
    pub(super) tar_critic1: Critic<Q>,
    pub(super) tar_critic2: Critic<Q>,
    pub(super) pi: Actor<P>,
    pub(super) gamma: f64,
    pub(super) tau: f64,
    pub(super) ent_coef: EntCoef,
    pub(super) epsilon: f64,
    pub(super) min_lstd: f64,
    pub(super) max_lstd: f64,
    pub(super) train: bool,
    pub(super) n_opts: usize,
    pub(super) device: Device,
}

impl<Q, P> Sac<Q, P>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = ActionValue>,
    P: SubModel1<Input = Tensor, Output = (ActMean, ActLstd)>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Constructs [`Sac`].
    ///
    /// Target critics start as exact copies of the critics.
    pub fn build(config: SacConfig<Q, P>) -> Result<Self> {
        let device: Device = config.device.unwrap_or_default().try_into()?;
        let act_dim = config
            .actor_config
            .get_out_dim()
            .context("pi_config is not set.")?;
        let target_entropy = config.target_entropy.unwrap_or(-(act_dim as f64));
        let pi = Actor::build(config.actor_config, device.clone())?;
        let critic1 = Critic::build(config.critic_config.clone(), device.clone())?;
        let critic2 = Critic::build(config.critic_config, device.clone())?;
        let tar_critic1 = critic1.build_target()?;
        let tar_critic2 = critic2.build_target()?;
        let ent_coef = EntCoef::new(
            config.init_log_alpha,
            target_entropy,
            config.lr_alpha,
            &device,
        )?;
        info!(
            "Build SAC with action dim {} and target entropy {}",
            act_dim, target_entropy
        );

        Ok(Self {
            critic1,
            critic2,
            tar_critic1,
            tar_critic2,
            pi,
            gamma: config.gamma,
            tau: config.tau,
            ent_coef,
            epsilon: config.epsilon,
            min_lstd: config.min_lstd,
            max_lstd: config.max_lstd,
            train: true,
            n_opts: 0,
            device,
        })
    }

    /// Returns action and its log probability under the squashed Gaussian.
    fn action_logp(&self, o: &Tensor) -> Result<(Tensor, Tensor)> {
        let (mean, lstd) = self.pi.forward(o)?;
        let lstd = lstd.clamp(self.min_lstd, self.max_lstd)?;
        let std = lstd.exp()?;
        let z = Tensor::randn(0f32, 1f32, mean.dims(), &self.device)?;
        let a = ((&std * &z)? + &mean)?.tanh()?;
        let log_det = ((1f64 - a.powf(2.0)?)? + self.epsilon)?
            .log()?
            .sum(D::Minus1)?;
        let log_p = ((normal_logp(&z)? - lstd.sum(D::Minus1)?)? - log_det)?;

        debug_assert_eq!(log_p.dims(), [a.dims()[0]]);

        Ok((a, log_p))
    }

    /// Returns the element-wise minimum of the values of two critics.
    fn qvals_min(q1: &Critic<Q>, q2: &Critic<Q>, obs: &Tensor, act: &Tensor) -> Result<Tensor> {
        let q1 = q1.forward(obs, act)?.squeeze(D::Minus1)?;
        let q2 = q2.forward(obs, act)?.squeeze(D::Minus1)?;
        Ok(q1.minimum(&q2)?)
    }

    /// Regression target of the critics given next actions sampled from the policy.
    ///
    /// `batch.is_terminated` does not take part in the target.
    fn target_given(
        &self,
        batch: &TensorBatch,
        next_a: &Tensor,
        next_log_p: &Tensor,
    ) -> Result<Tensor> {
        let next_q = Self::qvals_min(&self.tar_critic1, &self.tar_critic2, &batch.next_obs, next_a)?;
        let next_v = (next_q - self.ent_coef.alpha()?.broadcast_mul(next_log_p)?)?;
        Ok(((next_v * self.gamma)? + &batch.reward)?.detach())
    }

    fn target(&self, batch: &TensorBatch) -> Result<Tensor> {
        let (next_a, next_log_p) = self.action_logp(&batch.next_obs)?;
        self.target_given(batch, &next_a.detach(), &next_log_p.detach())
    }

    fn update_critic(&mut self, batch: &TensorBatch, tgt: &Tensor) -> Result<(f32, f32)> {
        let mut losses = [0f32; 2];
        let critics = [
            (&mut self.critic1, "loss_critic1"),
            (&mut self.critic2, "loss_critic2"),
        ];
        for (i, (critic, name)) in critics.into_iter().enumerate() {
            let pred = critic.forward(&batch.obs, &batch.act)?.squeeze(D::Minus1)?;
            let loss = mse(&pred, tgt)?;
            losses[i] = finite(name, &loss)?;
            critic.backward_step(&loss)?;
        }
        Ok((losses[0], losses[1]))
    }

    fn update_actor(&mut self, obs: &Tensor) -> Result<f32> {
        let loss = {
            let (a, log_p) = self.action_logp(obs)?;
            let qval = Self::qvals_min(&self.critic1, &self.critic2, obs, &a)?;
            ((self.ent_coef.alpha()?.broadcast_mul(&log_p))? - &qval)?.mean_all()?
        };
        let v = finite("loss_actor", &loss)?;
        self.pi.backward_step(&loss)?;
        Ok(v)
    }

    fn update_alpha(&mut self, obs: &Tensor) -> Result<f32> {
        let (_, log_p) = self.action_logp(obs)?;
        let loss = self.ent_coef.loss(&log_p.detach())?;
        let v = finite("loss_alpha", &loss)?;
        self.ent_coef.backward_step(&loss)?;
        Ok(v)
    }

    fn soft_update(&mut self) -> Result<()> {
        track(self.tar_critic1.get_varmap(), self.critic1.get_varmap(), self.tau)?;
        track(self.tar_critic2.get_varmap(), self.critic2.get_varmap(), self.tau)?;
        Ok(())
    }

    /// Number of optimization steps done so far.
    pub fn n_opts(&self) -> usize {
        self.n_opts
    }

    /// Current entropy coefficient.
    pub fn alpha(&self) -> Result<f32> {
        self.ent_coef.alpha_scalar()
    }
}

impl<Q, P> Policy for Sac<Q, P>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = ActionValue>,
    P: SubModel1<Input = Tensor, Output = (ActMean, ActLstd)>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Samples actions in training mode, takes the squashed mean otherwise.
    fn act(&self, obs: &ObsBatch) -> Result<ActBatch> {
        let obs = array2_to_tensor(obs, &self.device)?;
        let (mean, lstd) = self.pi.forward(&obs)?;
        let act = if self.train {
            let std = lstd.clamp(self.min_lstd, self.max_lstd)?.exp()?;
            ((std * mean.randn_like(0., 1.)?)? + &mean)?
        } else {
            mean
        };
        tensor_to_array2(&act.tanh()?.detach())
    }
}

impl<Q, P> Estimator for Sac<Q, P>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = ActionValue>,
    P: SubModel1<Input = Tensor, Output = (ActMean, ActLstd)>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn update(&mut self, batch: TransitionBatch) -> Result<Record> {
        let batch = TensorBatch::from_transitions(batch, &self.device)?;

        trace!("target()");
        let tgt = self.target(&batch)?;

        trace!("update_critic()");
        let (loss_critic1, loss_critic2) = self.update_critic(&batch, &tgt)?;

        trace!("update_actor()");
        let loss_actor = self.update_actor(&batch.obs)?;

        trace!("update_alpha()");
        let loss_alpha = self.update_alpha(&batch.obs)?;

        trace!("soft_update()");
        self.soft_update()?;

        self.n_opts += 1;

        Ok(Record::from_slice(&[
            ("loss_critic1", RecordValue::Scalar(loss_critic1)),
            ("loss_critic2", RecordValue::Scalar(loss_critic2)),
            ("loss_actor", RecordValue::Scalar(loss_actor)),
            ("loss_alpha", RecordValue::Scalar(loss_alpha)),
            ("alpha", RecordValue::Scalar(self.ent_coef.alpha_scalar()?)),
        ]))
    }

    fn save_params(&self, path: &Path, fmt: &str, only_actor: bool) -> Result<()> {
        fs::create_dir_all(path)?;
        self.pi.save(artifact(path, fmt, "actor"))?;
        if !only_actor {
            self.critic1.save(artifact(path, fmt, "critic1"))?;
            self.critic2.save(artifact(path, fmt, "critic2"))?;
            self.tar_critic1.save(artifact(path, fmt, "tar_critic1"))?;
            self.tar_critic2.save(artifact(path, fmt, "tar_critic2"))?;
        }
        Ok(())
    }

    fn save_policy(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        self.pi.save(path)
    }

    fn load_params(&mut self, path: &Path, fmt: &str) -> Result<()> {
        self.pi.load(artifact(path, fmt, "actor"))?;
        let critics = [
            (&mut self.critic1, "critic1"),
            (&mut self.critic2, "critic2"),
            (&mut self.tar_critic1, "tar_critic1"),
            (&mut self.tar_critic2, "tar_critic2"),
        ];
        for (critic, role) in critics {
            let file = artifact(path, fmt, role);
            if file.exists() {
                critic.load(file)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mlp::{Mlp, Mlp2, MlpConfig},
        sac::{ActorConfig, CriticConfig},
    };
    use candle_nn::VarMap;
    use ndarray::Array2;
    use tempdir::TempDir;

    const OBS_DIM: usize = 3;
    const ACT_DIM: usize = 2;

    fn create_sac() -> Result<Sac<Mlp, Mlp2>> {
        let config = SacConfig::<Mlp, Mlp2>::default()
            .actor_config(ActorConfig::default().pi_config(MlpConfig::new(
                OBS_DIM,
                vec![16, 16],
                ACT_DIM,
                false,
            )))
            .critic_config(CriticConfig::default().q_config(MlpConfig::new(
                OBS_DIM + ACT_DIM,
                vec![16, 16],
                1,
                false,
            )))
            .device(crate::Device::Cpu);
        Sac::build(config)
    }

    fn transitions(n: usize, reward: f32, is_terminated: bool) -> Result<TransitionBatch> {
        TransitionBatch::new(
            Array2::from_shape_fn((n, OBS_DIM), |(i, j)| (i + j) as f32 * 0.1),
            Array2::from_shape_fn((n, ACT_DIM), |(i, j)| ((i * j) as f32 * 0.1).tanh()),
            vec![reward; n],
            Array2::from_shape_fn((n, OBS_DIM), |(i, j)| (i + j + 1) as f32 * 0.1),
            vec![is_terminated; n],
        )
    }

    fn max_abs_diff(x: &Tensor, y: &Tensor) -> Result<f32> {
        Ok((x - y)?.abs()?.max_all()?.to_scalar::<f32>()?)
    }

    /// Values of all variables, sorted by name.
    fn snapshot(vm: &VarMap) -> Result<Vec<(String, Vec<f32>)>> {
        let data = vm.data().lock().unwrap();
        let mut vars = data
            .iter()
            .map(|(k, v)| -> Result<(String, Vec<f32>)> {
                Ok((k.clone(), v.as_tensor().flatten_all()?.to_vec1()?))
            })
            .collect::<Result<Vec<_>>>()?;
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    /// Snapshots of the policy, critics and target critics, in this order.
    fn snapshots(sac: &Sac<Mlp, Mlp2>) -> Result<[Vec<(String, Vec<f32>)>; 5]> {
        Ok([
            snapshot(sac.pi.get_varmap())?,
            snapshot(sac.critic1.get_varmap())?,
            snapshot(sac.critic2.get_varmap())?,
            snapshot(sac.tar_critic1.get_varmap())?,
            snapshot(sac.tar_critic2.get_varmap())?,
        ])
    }

    #[test]
    fn test_act() -> Result<()> {
        let mut sac = create_sac()?;
        let obs = Array2::from_shape_fn((4, OBS_DIM), |(i, j)| (i * j) as f32);

        let act = sac.act(&obs)?;
        assert_eq!(act.dim(), (4, ACT_DIM));
        assert!(act.iter().all(|a| (-1.0..=1.0).contains(a)));

        sac.eval();
        assert!(!sac.is_train());
        assert_eq!(sac.act(&obs)?, sac.act(&obs)?);
        Ok(())
    }

    #[test]
    fn test_targets_start_as_copies() -> Result<()> {
        let sac = create_sac()?;
        let batch = TensorBatch::from_transitions(transitions(5, 0.0, false)?, &Device::Cpu)?;
        let q = sac.critic1.forward(&batch.obs, &batch.act)?;
        let q_tgt = sac.tar_critic1.forward(&batch.obs, &batch.act)?;
        assert!(max_abs_diff(&q, &q_tgt)? < 1e-6);
        Ok(())
    }

    #[test]
    fn test_target_ignores_terminal_flag() -> Result<()> {
        let sac = create_sac()?;
        let running = TensorBatch::from_transitions(transitions(8, 1.0, false)?, &Device::Cpu)?;
        let finished = TensorBatch::from_transitions(transitions(8, 1.0, true)?, &Device::Cpu)?;

        let (next_a, next_log_p) = sac.action_logp(&running.next_obs)?;
        let y1 = sac.target_given(&running, &next_a, &next_log_p)?;
        let y2 = sac.target_given(&finished, &next_a, &next_log_p)?;
        assert_eq!(y1.dims(), [8]);
        assert!(max_abs_diff(&y1, &y2)? < 1e-6);
        Ok(())
    }

    #[test]
    fn test_target_value() -> Result<()> {
        let sac = create_sac()?;
        let batch = TensorBatch::from_transitions(transitions(6, 0.5, false)?, &Device::Cpu)?;
        let (next_a, next_log_p) = sac.action_logp(&batch.next_obs)?;
        let y = sac.target_given(&batch, &next_a, &next_log_p)?;

        let q1 = sac.tar_critic1.forward(&batch.next_obs, &next_a)?.squeeze(D::Minus1)?;
        let q2 = sac.tar_critic2.forward(&batch.next_obs, &next_a)?.squeeze(D::Minus1)?;
        let alpha = sac.alpha()? as f64;
        let expected = (((q1.minimum(&q2)? - (next_log_p * alpha)?)? * sac.gamma)? + 0.5)?;
        assert!(max_abs_diff(&y, &expected)? < 1e-5);
        Ok(())
    }

    #[test]
    fn test_updates_touch_only_their_own_variables() -> Result<()> {
        let mut sac = create_sac()?;
        let batch = TensorBatch::from_transitions(transitions(16, 1.0, false)?, &Device::Cpu)?;
        let obs = Array2::from_shape_fn((4, OBS_DIM), |(i, j)| (i + j) as f32);

        // Selecting actions changes nothing
        let s0 = snapshots(&sac)?;
        let alpha = sac.alpha()?;
        sac.act(&obs)?;
        assert_eq!(snapshots(&sac)?, s0);
        assert_eq!(sac.alpha()?, alpha);

        // A critic loss moves its own critic only
        let pred = sac.critic1.forward(&batch.obs, &batch.act)?.squeeze(D::Minus1)?;
        let loss = mse(&pred, &batch.reward)?;
        sac.critic1.backward_step(&loss)?;
        let s1 = snapshots(&sac)?;
        assert_ne!(s1[1], s0[1]);
        assert_eq!(s1[0], s0[0]);
        assert_eq!(s1[2..], s0[2..]);

        // Both critics move, the policy and the targets do not
        let tgt = sac.target(&batch)?;
        sac.update_critic(&batch, &tgt)?;
        let s2 = snapshots(&sac)?;
        assert_ne!(s2[1], s1[1]);
        assert_ne!(s2[2], s1[2]);
        assert_eq!(s2[0], s1[0]);
        assert_eq!(s2[3..], s1[3..]);

        // The actor step leaves every critic frozen
        sac.update_actor(&batch.obs)?;
        let s3 = snapshots(&sac)?;
        assert_ne!(s3[0], s2[0]);
        assert_eq!(s3[1..], s2[1..]);

        // The temperature step moves alpha only
        sac.update_alpha(&batch.obs)?;
        assert_eq!(snapshots(&sac)?, s3);
        assert_ne!(sac.alpha()?, alpha);
        Ok(())
    }

    #[test]
    fn test_target_critics_have_no_optimizer() -> Result<()> {
        let mut sac = create_sac()?;
        assert!(sac.critic1.is_trainable());
        assert!(!sac.tar_critic1.is_trainable());
        assert!(!sac.tar_critic2.is_trainable());

        let batch = TensorBatch::from_transitions(transitions(4, 1.0, false)?, &Device::Cpu)?;
        let pred = sac.tar_critic1.forward(&batch.obs, &batch.act)?.squeeze(D::Minus1)?;
        let loss = mse(&pred, &batch.reward)?;
        assert!(sac.tar_critic1.backward_step(&loss).is_err());
        Ok(())
    }

    #[test]
    fn test_update() -> Result<()> {
        let mut sac = create_sac()?;
        let alpha = sac.alpha()?;
        assert!((alpha - 1f32.exp()).abs() < 1e-5);

        let record = sac.update(transitions(16, 1.0, false)?)?;
        for key in [
            "loss_critic1",
            "loss_critic2",
            "loss_actor",
            "loss_alpha",
            "alpha",
        ] {
            assert!(record.get_scalar(key)?.is_finite());
        }
        assert_eq!(sac.n_opts(), 1);
        assert_ne!(sac.alpha()?, alpha);

        // Target critics moved only by a fraction towards the critics
        let batch = TensorBatch::from_transitions(transitions(5, 0.0, false)?, &Device::Cpu)?;
        let q = sac.critic1.forward(&batch.obs, &batch.act)?;
        let q_tgt = sac.tar_critic1.forward(&batch.obs, &batch.act)?;
        assert!(max_abs_diff(&q, &q_tgt)? > 0.0);
        Ok(())
    }

    #[test]
    fn test_non_finite_loss() -> Result<()> {
        let mut sac = create_sac()?;
        let err = sac.update(transitions(4, f32::NAN, false)?).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NcerlError>(),
            Some(NcerlError::NonFiniteLoss { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = TempDir::new("sac")?;
        let mut sac = create_sac()?;
        sac.eval();
        let obs = Array2::from_shape_fn((3, OBS_DIM), |(i, j)| (i + j) as f32);

        sac.save_params(dir.path(), "{}", true)?;
        assert!(dir.path().join("actor.safetensors").exists());
        assert!(!dir.path().join("critic1.safetensors").exists());

        sac.save_params(&dir.path().join("all"), "sac_{}", false)?;
        for role in ["actor", "critic1", "critic2", "tar_critic1", "tar_critic2"] {
            let file = dir.path().join("all").join(format!("sac_{}.safetensors", role));
            assert!(file.exists());
        }

        let mut sac_ = create_sac()?;
        sac_.eval();
        sac_.load_params(&dir.path().join("all"), "sac_{}")?;
        assert_eq!(sac.act(&obs)?, sac_.act(&obs)?);

        sac.save_policy(&dir.path().join("final").join("policy.safetensors"))?;
        assert!(dir.path().join("final").join("policy.safetensors").exists());
        Ok(())
    }
}
