//! Ring-buffer replay memory.
use super::ReplayMemConfig;
use crate::{error::NcerlError, TransitionBatch, TransitionStore};
use anyhow::Result;
use ndarray::{Array2, Axis};
use rand::{rngs::StdRng, seq::index, SeedableRng};

/// Row storage allocated at the first insertion, when the width is known.
struct Rows {
    capacity: usize,
    buf: Option<Array2<f32>>,
}

impl Rows {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: None,
        }
    }

    fn check(&self, what: &str, data: &Array2<f32>) -> Result<()> {
        match &self.buf {
            Some(buf) if buf.ncols() != data.ncols() => Err(NcerlError::ShapeMismatch {
                what: what.to_string(),
                expected: buf.ncols(),
                actual: data.ncols(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Writes `data` from row `i` on. The width must have been checked.
    fn push(&mut self, i: usize, data: &Array2<f32>) {
        let capacity = self.capacity;
        let buf = self
            .buf
            .get_or_insert_with(|| Array2::zeros((capacity, data.ncols())));
        for (k, row) in data.axis_iter(Axis(0)).enumerate() {
            buf.row_mut((i + k) % capacity).assign(&row);
        }
    }

    fn sample(&self, ixs: &[usize]) -> Array2<f32> {
        match &self.buf {
            Some(buf) => buf.select(Axis(0), ixs),
            None => Array2::zeros((0, 0)),
        }
    }
}

/// Replay memory holding at most `capacity` transitions.
pub struct ReplayMem {
    capacity: usize,

    /// Insertion index.
    i: usize,

    /// Number of stored transitions.
    size: usize,

    obs: Rows,
    act: Rows,
    next_obs: Rows,
    reward: Vec<f32>,
    is_terminated: Vec<bool>,
    rng: StdRng,
}

impl ReplayMem {
    /// Returns the capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of terminal transitions in the memory.
    pub fn num_terminated_flags(&self) -> usize {
        self.is_terminated[..self.size]
            .iter()
            .filter(|&&d| d)
            .count()
    }

    /// Returns the sum of all rewards in the memory.
    pub fn sum_rewards(&self) -> f32 {
        self.reward[..self.size].iter().sum()
    }
}

impl TransitionStore for ReplayMem {
    type Config = ReplayMemConfig;

    fn build(config: &Self::Config) -> Self {
        let capacity = config.capacity;
        Self {
            capacity,
            i: 0,
            size: 0,
            obs: Rows::new(capacity),
            act: Rows::new(capacity),
            next_obs: Rows::new(capacity),
            reward: vec![0.; capacity],
            is_terminated: vec![false; capacity],
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    fn add_batched(&mut self, batch: TransitionBatch) -> Result<()> {
        if self.capacity == 0 {
            return Err(NcerlError::InvalidConfig("capacity must be positive".to_string()).into());
        }
        let len = batch.len();
        let (obs, act, reward, next_obs, is_terminated) = batch.unpack();
        self.obs.check("obs", &obs)?;
        self.act.check("act", &act)?;
        self.next_obs.check("next_obs", &next_obs)?;
        if obs.ncols() != next_obs.ncols() {
            return Err(NcerlError::ShapeMismatch {
                what: "next_obs".to_string(),
                expected: obs.ncols(),
                actual: next_obs.ncols(),
            }
            .into());
        }

        self.obs.push(self.i, &obs);
        self.act.push(self.i, &act);
        self.next_obs.push(self.i, &next_obs);
        for (k, (r, d)) in reward.into_iter().zip(is_terminated).enumerate() {
            let j = (self.i + k) % self.capacity;
            self.reward[j] = r;
            self.is_terminated[j] = d;
        }

        self.i = (self.i + len) % self.capacity;
        self.size = (self.size + len).min(self.capacity);

        Ok(())
    }

    fn sample(&mut self, size: usize) -> Result<TransitionBatch> {
        if size > self.size {
            return Err(NcerlError::InsufficientTransitions {
                requested: size,
                available: self.size,
            }
            .into());
        }
        let ixs = index::sample(&mut self.rng, self.size, size).into_vec();

        TransitionBatch::new(
            self.obs.sample(&ixs),
            self.act.sample(&ixs),
            ixs.iter().map(|&ix| self.reward[ix]).collect(),
            self.next_obs.sample(&ixs),
            ixs.iter().map(|&ix| self.is_terminated[ix]).collect(),
        )
    }

    fn len(&self) -> usize {
        self.size
    }
}
