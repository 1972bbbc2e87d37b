//! Latent-segment level environment.
use anyhow::Result;
use ncerl_core::{
    error::NcerlError,
    record::{Record, RecordValue},
    ActBatch, ObsBatch, VecEnv, VecStep, TERMINAL_OBS_KEY,
};
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Key of the per-step fidelity rewards in the info map.
pub const FIDELITY_REWARD_KEY: &str = "fidelity_reward_list";

/// Key of the per-step diversity rewards in the info map.
pub const DIVERSITY_REWARD_KEY: &str = "diversity_reward_list";

/// Configuration of [`ToyLevelEnv`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ToyLevelEnvConfig {
    /// Number of parallel environments.
    pub num_envs: usize,

    /// Dimension of the latent vector of a segment.
    pub nz: usize,

    /// Number of past segments in an observation.
    pub hist_len: usize,

    /// Number of segments generated in an episode.
    pub eplen: usize,
}

impl Default for ToyLevelEnvConfig {
    fn default() -> Self {
        Self {
            num_envs: 5,
            nz: 20,
            hist_len: 5,
            eplen: 50,
        }
    }
}

impl ToyLevelEnvConfig {
    /// Sets the number of parallel environments.
    pub fn num_envs(mut self, v: usize) -> Self {
        self.num_envs = v;
        self
    }

    /// Sets the dimension of latent vectors.
    pub fn nz(mut self, v: usize) -> Self {
        self.nz = v;
        self
    }

    /// Sets the length of the observed history.
    pub fn hist_len(mut self, v: usize) -> Self {
        self.hist_len = v;
        self
    }

    /// Sets the length of episodes.
    pub fn eplen(mut self, v: usize) -> Self {
        self.eplen = v;
        self
    }

    /// Dimension of observations.
    pub fn obs_dim(&self) -> usize {
        self.hist_len * self.nz
    }

    fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("num_envs", self.num_envs),
            ("nz", self.nz),
            ("hist_len", self.hist_len),
            ("eplen", self.eplen),
        ] {
            if v == 0 {
                return Err(NcerlError::InvalidConfig(format!("{} must be positive", name)).into());
            }
        }
        Ok(())
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// A vectorized environment generating levels segment by segment.
///
/// Each slot keeps the trace of its current episode: `hist_len` random
/// latent vectors followed by the (clipped) actions taken so far. The
/// observation is the flattened tail of the trace. When `eplen` segments are
/// generated, two reward lists are reported in the info map of the slot:
///
/// * fidelity, `1 - mean((a_t - a_{t-1})^2) / 4`, rewarding smooth
///   transitions between consecutive segments;
/// * diversity, the mean euclidean distance from `a_t` to the `hist_len`
///   segments before it, divided by `2 * sqrt(nz)`.
///
/// The slot is then reset with a fresh random history.
pub struct ToyLevelEnv {
    config: ToyLevelEnvConfig,
    rng: StdRng,
    traces: Vec<Vec<Vec<f32>>>,
}

impl ToyLevelEnv {
    fn random_latent(rng: &mut StdRng, nz: usize) -> Vec<f32> {
        (0..nz).map(|_| rng.gen_range(-1.0f32..=1.0)).collect()
    }

    fn reset_slot(&mut self, i: usize) {
        let nz = self.config.nz;
        let trace = (0..self.config.hist_len)
            .map(|_| Self::random_latent(&mut self.rng, nz))
            .collect();
        self.traces[i] = trace;
    }

    fn obs_row(&self, i: usize) -> Vec<f32> {
        let trace = &self.traces[i];
        trace[trace.len() - self.config.hist_len..]
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    fn observe(&self) -> ObsBatch {
        let nz = self.config.nz;
        let hist_len = self.config.hist_len;
        Array2::from_shape_fn((self.config.num_envs, hist_len * nz), |(i, j)| {
            let trace = &self.traces[i];
            trace[trace.len() - hist_len + j / nz][j % nz]
        })
    }

    /// Per-step rewards of the finished episode in slot `i`.
    fn rewards(&self, i: usize) -> (Vec<f32>, Vec<f32>) {
        let trace = &self.traces[i];
        let hist_len = self.config.hist_len;
        let scale = 2.0 * (self.config.nz as f32).sqrt();

        (hist_len..trace.len())
            .map(|t| {
                let a = &trace[t];
                let fidelity = 1.0 - mean_sq_diff(a, &trace[t - 1]) / 4.0;
                let diversity = trace[t - hist_len..t]
                    .iter()
                    .map(|w| distance(a, w))
                    .sum::<f32>()
                    / (hist_len as f32 * scale);
                (fidelity, diversity)
            })
            .unzip()
    }
}

fn sq_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn mean_sq_diff(a: &[f32], b: &[f32]) -> f32 {
    sq_diff(a, b) / a.len() as f32
}

fn distance(a: &[f32], b: &[f32]) -> f32 {
    sq_diff(a, b).sqrt()
}

impl VecEnv for ToyLevelEnv {
    type Config = ToyLevelEnvConfig;

    fn build(config: &Self::Config, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut env = Self {
            config: config.clone(),
            rng: StdRng::seed_from_u64(seed),
            traces: vec![vec![]; config.num_envs],
        };
        for i in 0..config.num_envs {
            env.reset_slot(i);
        }
        Ok(env)
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
        for i in 0..self.config.num_envs {
            self.reset_slot(i);
        }
        Ok(self.observe())
    }

    fn step(&mut self, act: &ActBatch) -> Result<VecStep> {
        let n = self.config.num_envs;
        if act.dim() != (n, self.config.nz) {
            let (what, expected, actual) = if act.nrows() != n {
                ("rows of actions", n, act.nrows())
            } else {
                ("latent dimension of actions", self.config.nz, act.ncols())
            };
            return Err(NcerlError::ShapeMismatch {
                what: what.to_string(),
                expected,
                actual,
            }
            .into());
        }

        let mut reward = vec![0.0; n];
        let mut is_done = vec![false; n];
        let mut info = vec![Record::empty(); n];

        for (i, row) in act.outer_iter().enumerate() {
            let segment = row.iter().map(|&v| v.clamp(-1.0, 1.0)).collect();
            self.traces[i].push(segment);

            if self.traces[i].len() - self.config.hist_len >= self.config.eplen {
                let (fidelity, diversity) = self.rewards(i);
                reward[i] = fidelity.iter().chain(diversity.iter()).sum();
                is_done[i] = true;
                info[i].insert(FIDELITY_REWARD_KEY, RecordValue::Array1(fidelity));
                info[i].insert(DIVERSITY_REWARD_KEY, RecordValue::Array1(diversity));
                info[i].insert(TERMINAL_OBS_KEY, RecordValue::Array1(self.obs_row(i)));
                self.reset_slot(i);
            }
        }

        Ok(VecStep::new(self.observe(), reward, is_done, info))
    }
}
