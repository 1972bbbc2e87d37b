//! Collaborators used in tests.
use crate::{
    record::{Record, RecordValue},
    ActBatch, Estimator, GenPolicy, Generator, ObsBatch, Policy, TransitionBatch, VecEnv,
    VecStep, REWARD_LIST_KEY, TERMINAL_OBS_KEY,
};
use anyhow::Result;
use ndarray::Array2;
use std::{
    cell::{Cell, RefCell},
    fs,
    path::{Path, PathBuf},
};

/// Configuration of [`FixedHorizonVecEnv`].
#[derive(Clone, Debug)]
pub struct FixedHorizonVecEnvConfig {
    /// Number of parallel environments.
    pub num_envs: usize,

    /// Dimension of observations.
    pub obs_dim: usize,

    /// Length of episodes.
    pub eplen: usize,

    /// Length of the observed history.
    pub hist_len: usize,

    /// Reward components reported at the end of episodes, as
    /// `(name, per-step value)`.
    pub reward_components: Vec<(String, f32)>,

    /// If `true`, slot `i` starts its first episode `i` steps in, so that
    /// slots finish at different steps.
    pub stagger: bool,
}

impl Default for FixedHorizonVecEnvConfig {
    fn default() -> Self {
        Self {
            num_envs: 2,
            obs_dim: 2,
            eplen: 5,
            hist_len: 1,
            reward_components: vec![
                (format!("fidelity_{}", REWARD_LIST_KEY), 1.0),
                (format!("diversity_{}", REWARD_LIST_KEY), 0.5),
            ],
            stagger: false,
        }
    }
}

/// A vectorized environment whose episodes all last `eplen` steps.
///
/// The observation of a slot is filled with the number of steps taken in the
/// current episode.
pub struct FixedHorizonVecEnv {
    config: FixedHorizonVecEnvConfig,

    /// Position within the horizon of each slot.
    t: Vec<usize>,

    /// Steps taken since the last reset of each slot.
    len: Vec<usize>,
}

impl FixedHorizonVecEnv {
    fn obs_row(&self, t: usize) -> Vec<f32> {
        vec![t as f32; self.config.obs_dim]
    }

    fn observe(&self) -> ObsBatch {
        let n = self.config.num_envs;
        let d = self.config.obs_dim;
        Array2::from_shape_fn((n, d), |(i, _)| self.t[i] as f32)
    }
}

impl VecEnv for FixedHorizonVecEnv {
    type Config = FixedHorizonVecEnvConfig;

    fn build(config: &Self::Config, _seed: u64) -> Result<Self> {
        Ok(Self {
            t: vec![0; config.num_envs],
            len: vec![0; config.num_envs],
            config: config.clone(),
        })
    }

    fn num_envs(&self) -> usize {
        self.config.num_envs
    }

    fn hist_len(&self) -> usize {
        self.config.hist_len
    }

    fn eplen(&self) -> usize {
        self.config.eplen
    }

    fn reset(&mut self) -> Result<ObsBatch> {
        let eplen = self.config.eplen;
        let stagger = self.config.stagger;
        for (i, t) in self.t.iter_mut().enumerate() {
            *t = if stagger { i % eplen } else { 0 };
        }
        self.len.iter_mut().for_each(|l| *l = 0);
        Ok(self.observe())
    }

    fn step(&mut self, act: &ActBatch) -> Result<VecStep> {
        let n = self.config.num_envs;
        let mut is_done = vec![false; n];
        let mut info = vec![Record::empty(); n];

        for i in 0..n.min(act.nrows()) {
            self.t[i] += 1;
            self.len[i] += 1;
            if self.t[i] >= self.config.eplen {
                is_done[i] = true;
                let len = self.len[i];
                for (name, r) in self.config.reward_components.iter() {
                    info[i].insert(name.as_str(), RecordValue::Array1(vec![*r; len]));
                }
                info[i].insert(TERMINAL_OBS_KEY, RecordValue::Array1(self.obs_row(self.t[i])));
                self.t[i] = 0;
                self.len[i] = 0;
            }
        }

        Ok(VecStep::new(self.observe(), vec![0.0; n], is_done, info))
    }
}

/// A generator recording its calls without producing anything.
#[derive(Default)]
pub struct CountingGenerator {
    /// `(tag, n, eplen, hist_len)` of each call.
    pub calls: Vec<(String, usize, usize, usize)>,
}

impl Generator for CountingGenerator {
    fn generate<P: Policy + ?Sized>(
        &mut self,
        policy: &GenPolicy<'_, P>,
        _out_dir: &Path,
        tag: &str,
        n: usize,
        eplen: usize,
    ) -> Result<()> {
        self.calls
            .push((tag.to_string(), n, eplen, policy.hist_len()));
        Ok(())
    }
}

/// An estimator returning a constant action and counting its updates.
///
/// Saved files are empty.
pub struct ConstEstimator {
    act_dim: usize,
    value: f32,
    is_train: bool,
    n_updates: usize,
    n_policy_saves: Cell<usize>,
    saved_dirs: RefCell<Vec<PathBuf>>,
}

impl ConstEstimator {
    /// Creates an estimator returning actions filled with `value`.
    pub fn new(act_dim: usize, value: f32) -> Self {
        Self {
            act_dim,
            value,
            is_train: true,
            n_updates: 0,
            n_policy_saves: Cell::new(0),
            saved_dirs: RefCell::new(vec![]),
        }
    }

    /// Number of calls to [`Estimator::update`].
    pub fn n_updates(&self) -> usize {
        self.n_updates
    }

    /// Number of calls to [`Estimator::save_policy`].
    pub fn n_policy_saves(&self) -> usize {
        self.n_policy_saves.get()
    }

    /// Directories given to [`Estimator::save_params`], in call order.
    pub fn saved_dirs(&self) -> Vec<PathBuf> {
        self.saved_dirs.borrow().clone()
    }
}

impl Policy for ConstEstimator {
    fn act(&self, obs: &ObsBatch) -> Result<ActBatch> {
        Ok(Array2::from_elem((obs.nrows(), self.act_dim), self.value))
    }
}

impl Estimator for ConstEstimator {
    fn train(&mut self) {
        self.is_train = true;
    }

    fn eval(&mut self) {
        self.is_train = false;
    }

    fn is_train(&self) -> bool {
        self.is_train
    }

    fn update(&mut self, batch: TransitionBatch) -> Result<Record> {
        self.n_updates += 1;
        Ok(Record::from_scalar("batch_size", batch.len() as f32))
    }

    fn save_params(&self, path: &Path, fmt: &str, only_actor: bool) -> Result<()> {
        let roles: &[&str] = match only_actor {
            true => &["actor"],
            false => &["actor", "critic1", "critic2", "tar_critic1", "tar_critic2"],
        };
        for role in roles {
            fs::write(path.join(fmt.replace("{}", role)), b"")?;
        }
        self.saved_dirs.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn save_policy(&self, path: &Path) -> Result<()> {
        fs::write(path, b"")?;
        self.n_policy_saves.set(self.n_policy_saves.get() + 1);
        Ok(())
    }

    fn load_params(&mut self, path: &Path, fmt: &str) -> Result<()> {
        fs::metadata(path.join(fmt.replace("{}", "actor")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_horizon() -> Result<()> {
        let config = FixedHorizonVecEnvConfig {
            num_envs: 2,
            eplen: 3,
            stagger: true,
            ..Default::default()
        };
        let mut env = FixedHorizonVecEnv::build(&config, 0)?;
        let obs = env.reset()?;
        assert_eq!(obs.row(1).to_vec(), vec![1.0, 1.0]);

        let act = Array2::zeros((2, 1));
        env.step(&act)?;
        let step = env.step(&act)?;
        assert_eq!(step.is_done, vec![false, true]);
        // Slot 1 started one step in, so its first episode is two steps long
        let info = &step.info[1];
        assert_eq!(info.get_array1("fidelity_reward_list")?, vec![1.0, 1.0]);
        assert_eq!(info.get_array1(TERMINAL_OBS_KEY)?, vec![3.0, 3.0]);
        assert_eq!(step.obs.row(1).to_vec(), vec![0.0, 0.0]);
        Ok(())
    }
}
