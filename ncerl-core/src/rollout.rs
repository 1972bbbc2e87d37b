//! Aggregation of vectorized steps into whole-episode transition batches.
use crate::{
    error::NcerlError, record::Record, ActBatch, ObsBatch, TransitionBatch, TransitionStore,
    VecStep,
};
use anyhow::Result;
use log::trace;
use ndarray::{Array2, ArrayView1};

/// Info keys containing this substring hold a per-step reward-component list.
pub const REWARD_LIST_KEY: &str = "reward_list";

/// Info key of the true terminal observation of a finished episode.
pub const TERMINAL_OBS_KEY: &str = "terminal_observation";

/// Pending `(o_t, a_t, o_t+1)` triples of the running episode of one slot.
///
/// Rows are kept flat and the buffers are cleared in place after a flush, so
/// their allocation is reused by the next episode.
#[derive(Default)]
struct EpisodeBuffer {
    obs: Vec<f32>,
    act: Vec<f32>,
    next_obs: Vec<f32>,
    len: usize,
}

impl EpisodeBuffer {
    fn push(&mut self, obs: ArrayView1<f32>, act: ArrayView1<f32>, next_obs: &[f32]) {
        self.obs.extend(obs.iter());
        self.act.extend(act.iter());
        self.next_obs.extend_from_slice(next_obs);
        self.len += 1;
    }

    fn clear(&mut self) {
        self.obs.clear();
        self.act.clear();
        self.next_obs.clear();
        self.len = 0;
    }
}

/// Sums all reward-component lists of `info` element-wise.
fn episode_rewards(info: &Record, slot: usize, len: usize) -> Result<Vec<f32>> {
    let mut keys = info
        .keys()
        .filter(|k| k.contains(REWARD_LIST_KEY))
        .collect::<Vec<_>>();
    if keys.is_empty() {
        return Err(NcerlError::MissingRewardComponents { slot }.into());
    }
    keys.sort();

    let mut rewards = vec![0f32; len];
    for key in keys {
        let component = info.get_array1(key)?;
        if component.len() != len {
            return Err(NcerlError::ShapeMismatch {
                what: key.clone(),
                expected: len,
                actual: component.len(),
            }
            .into());
        }
        for (r, c) in rewards.iter_mut().zip(component) {
            *r += c;
        }
    }
    Ok(rewards)
}

fn check_len(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(NcerlError::ShapeMismatch {
            what: what.to_string(),
            expected,
            actual,
        }
        .into());
    }
    Ok(())
}

/// Bridges per-step vectorized interaction and per-episode transition batches.
///
/// Each environment slot accumulates its `(o_t, a_t, o_t+1)` triples. When
/// the slot's episode ends, rewards are rebuilt from the reward-component
/// lists of the slot's info and the whole episode is pushed to a
/// [`TransitionStore`] in one batch. Only the last transition of an episode
/// is flagged terminal.
pub struct RolloutAggregator {
    slots: Vec<EpisodeBuffer>,
    obs_dim: usize,
    act_dim: usize,
}

impl RolloutAggregator {
    /// Creates an aggregator for `n_slots` parallel environments.
    ///
    /// Observation and action dimensions are fixed by the first consumed step.
    pub fn new(n_slots: usize) -> Self {
        Self {
            slots: (0..n_slots).map(|_| EpisodeBuffer::default()).collect(),
            obs_dim: 0,
            act_dim: 0,
        }
    }

    /// The number of environment slots.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Number of steps accumulated in `slot` since its last episode ended.
    pub fn pending(&self, slot: usize) -> usize {
        self.slots[slot].len
    }

    /// Number of rows held in each of the observation, action and
    /// next-observation buffers of `slot`.
    pub fn pending_rows(&self, slot: usize) -> (usize, usize, usize) {
        let buf = &self.slots[slot];
        (
            buf.obs.len() / self.obs_dim.max(1),
            buf.act.len() / self.act_dim.max(1),
            buf.next_obs.len() / self.obs_dim.max(1),
        )
    }

    /// Consumes one vectorized step taken with `act` from `obs`.
    ///
    /// Returns the number of transitions pushed to `store`, i.e. the summed
    /// length of the episodes that ended at this step.
    pub fn consume<S: TransitionStore>(
        &mut self,
        obs: &ObsBatch,
        act: &ActBatch,
        step: &VecStep,
        store: &mut S,
    ) -> Result<usize> {
        let n = self.slots.len();
        check_len("obs rows", n, obs.nrows())?;
        check_len("act rows", n, act.nrows())?;
        check_len("next obs rows", n, step.obs.nrows())?;
        check_len("done flags", n, step.is_done.len())?;
        check_len("infos", n, step.info.len())?;
        if self.obs_dim == 0 {
            self.obs_dim = obs.ncols();
            self.act_dim = act.ncols();
        }
        check_len("obs dim", self.obs_dim, obs.ncols())?;
        check_len("act dim", self.act_dim, act.ncols())?;
        check_len("next obs dim", self.obs_dim, step.obs.ncols())?;

        // The environment has already reset finished slots, so their next
        // observation is taken from the info instead.
        let mut next_obs = Vec::with_capacity(n);
        for i in 0..n {
            if step.is_done[i] {
                let o = step.info[i]
                    .get_array1(TERMINAL_OBS_KEY)
                    .map_err(|_| NcerlError::MissingTerminalObservation { slot: i })?;
                check_len("terminal obs dim", self.obs_dim, o.len())?;
                next_obs.push(o);
            } else {
                next_obs.push(step.obs.row(i).to_vec());
            }
        }

        for (i, buf) in self.slots.iter_mut().enumerate() {
            buf.push(obs.row(i), act.row(i), &next_obs[i]);
        }

        let mut n_transitions = 0;
        for i in (0..n).filter(|&i| step.is_done[i]) {
            n_transitions += self.flush(i, &step.info[i], store)?;
        }

        Ok(n_transitions)
    }

    /// Pushes the finished episode of `slot` to `store` and clears the slot.
    fn flush<S: TransitionStore>(
        &mut self,
        slot: usize,
        info: &Record,
        store: &mut S,
    ) -> Result<usize> {
        let (obs_dim, act_dim) = (self.obs_dim, self.act_dim);
        let buf = &mut self.slots[slot];
        let len = buf.len;
        let reward = episode_rewards(info, slot, len)?;
        let mut is_terminated = vec![false; len];
        if let Some(last) = is_terminated.last_mut() {
            *last = true;
        }

        let batch = TransitionBatch::new(
            Array2::from_shape_vec((len, obs_dim), buf.obs.clone())?,
            Array2::from_shape_vec((len, act_dim), buf.act.clone())?,
            reward,
            Array2::from_shape_vec((len, obs_dim), buf.next_obs.clone())?,
            is_terminated,
        )?;
        store.add_batched(batch)?;
        buf.clear();
        trace!("Flushed {} transitions of slot {}", len, slot);

        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordValue;
    use crate::replay_mem::{ReplayMem, ReplayMemConfig};
    use ndarray::array;

    /// A store keeping every batch it receives.
    #[derive(Default)]
    struct VecStore(Vec<TransitionBatch>);

    impl TransitionStore for VecStore {
        type Config = ();

        fn build(_config: &Self::Config) -> Self {
            Self::default()
        }

        fn add_batched(&mut self, batch: TransitionBatch) -> Result<()> {
            self.0.push(batch);
            Ok(())
        }

        fn sample(&mut self, _size: usize) -> Result<TransitionBatch> {
            unimplemented!();
        }

        fn len(&self) -> usize {
            self.0.iter().map(|b| b.len()).sum()
        }
    }

    fn running() -> Record {
        Record::empty()
    }

    fn finished(terminal_obs: Vec<f32>, rewards: &[(&str, Vec<f32>)]) -> Record {
        let mut info = Record::empty();
        info.insert(TERMINAL_OBS_KEY, RecordValue::Array1(terminal_obs));
        for (k, v) in rewards {
            info.insert(*k, RecordValue::Array1(v.clone()));
        }
        info
    }

    #[test]
    fn test_episode_is_flushed_with_summed_rewards() -> Result<()> {
        let mut agg = RolloutAggregator::new(1);
        let mut store = VecStore::default();

        for t in 0..2 {
            let step = VecStep::new(
                array![[t as f32 + 1.0]],
                vec![0.0],
                vec![false],
                vec![running()],
            );
            let n = agg.consume(&array![[t as f32]], &array![[0.5]], &step, &mut store)?;
            assert_eq!(n, 0);
            assert_eq!(agg.pending(0), t + 1);
        }

        let info = finished(
            vec![3.0],
            &[
                ("fun_reward_list", vec![1.0, 2.0, 3.0]),
                ("playability_reward_list", vec![0.0, 1.0, 1.0]),
                ("unrelated", vec![100.0, 100.0, 100.0]),
            ],
        );
        // The row returned for the finished slot is the first obs of the next episode
        let step = VecStep::new(array![[-1.0]], vec![0.0], vec![true], vec![info]);
        let n = agg.consume(&array![[2.0]], &array![[0.5]], &step, &mut store)?;

        assert_eq!(n, 3);
        assert_eq!(agg.pending(0), 0);
        assert_eq!(agg.pending_rows(0), (0, 0, 0));
        assert_eq!(store.0.len(), 1);
        let batch = &store.0[0];
        assert_eq!(batch.reward, vec![1.0, 3.0, 4.0]);
        assert_eq!(batch.is_terminated, vec![false, false, true]);
        assert_eq!(batch.obs, array![[0.0], [1.0], [2.0]]);
        assert_eq!(batch.next_obs, array![[1.0], [2.0], [3.0]]);
        Ok(())
    }

    #[test]
    fn test_slots_finish_independently() -> Result<()> {
        let mut agg = RolloutAggregator::new(2);
        let mut store = ReplayMem::build(&ReplayMemConfig::default().capacity(100));
        let obs = array![[0.0, 0.0], [1.0, 1.0]];
        let act = array![[0.1], [0.2]];

        let step = VecStep::new(obs.clone(), vec![0.0; 2], vec![false; 2], vec![running(); 2]);
        agg.consume(&obs, &act, &step, &mut store)?;

        let step = VecStep::new(
            obs.clone(),
            vec![0.0; 2],
            vec![true, false],
            vec![finished(vec![9.0, 9.0], &[("r_reward_list", vec![1.0, 1.0])]), running()],
        );
        let n = agg.consume(&obs, &act, &step, &mut store)?;
        assert_eq!(n, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(agg.pending(0), 0);
        assert_eq!(agg.pending(1), 2);
        assert_eq!(agg.pending_rows(1), (2, 2, 2));
        Ok(())
    }

    #[test]
    fn test_missing_reward_list() {
        let mut agg = RolloutAggregator::new(1);
        let mut store = VecStore::default();
        let step = VecStep::new(
            array![[0.0]],
            vec![0.0],
            vec![true],
            vec![finished(vec![1.0], &[])],
        );
        let err = agg
            .consume(&array![[0.0]], &array![[0.0]], &step, &mut store)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NcerlError>(),
            Some(NcerlError::MissingRewardComponents { slot: 0 })
        ));
    }

    #[test]
    fn test_missing_terminal_observation() {
        let mut agg = RolloutAggregator::new(1);
        let mut store = VecStore::default();
        let mut info = Record::empty();
        info.insert("r_reward_list", RecordValue::Array1(vec![1.0]));
        let step = VecStep::new(array![[0.0]], vec![0.0], vec![true], vec![info]);
        let err = agg
            .consume(&array![[0.0]], &array![[0.0]], &step, &mut store)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NcerlError>(),
            Some(NcerlError::MissingTerminalObservation { slot: 0 })
        ));
        // Nothing was appended, the buffers stay aligned
        assert_eq!(agg.pending_rows(0), (0, 0, 0));
    }

    #[test]
    fn test_reward_list_length_mismatch() {
        let mut agg = RolloutAggregator::new(1);
        let mut store = VecStore::default();
        let step = VecStep::new(
            array![[0.0]],
            vec![0.0],
            vec![true],
            vec![finished(vec![1.0], &[("r_reward_list", vec![1.0, 2.0])])],
        );
        assert!(agg
            .consume(&array![[0.0]], &array![[0.0]], &step, &mut store)
            .is_err());
    }
}
