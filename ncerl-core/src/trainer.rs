//! Train [`Estimator`] on a [`VecEnv`].
mod config;
use crate::{
    error::NcerlError,
    record::{AggregateRecorder, Record, RecordValue::Scalar},
    CheckpointSchedule, Estimator, GenPolicy, Generator, RolloutAggregator, TransitionStore,
    VecEnv,
};
use anyhow::Result;
pub use config::TrainerConfig;
use log::{debug, info};
use std::{fs, path::Path};

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Manages the training loop and the transition store.
///
/// # Training loop
///
/// 0. Given a [`VecEnv`], an [`Estimator`], a [`Generator`] and an
///    [`AggregateRecorder`], reset the environment step counter `env_steps = 0`,
///    the counter of new transitions `new_transitions = 0` and the generation
///    cursor `gen_horizon = 0`.
/// 1. While `env_steps < step_budget`:
///     1. Select actions with the estimator and step the environment.
///     2. Feed the step to the [`RolloutAggregator`], which pushes finished
///        episodes into the store. Add the number of pushed transitions to
///        `new_transitions`.
///     3. If `new_transitions > update_freq` and the store holds at least
///        `batch_size` transitions, do `new_transitions / update_freq`
///        optimization steps, each on a freshly sampled batch, and keep the
///        remainder in `new_transitions`.
///     4. If the smallest remaining checkpoint threshold is reached, save the
///        policy in `(save_path)/model_at_(env_steps)` and drop the threshold.
///     5. If `env_steps >= gen_horizon`, generate `gen_num` artifacts in
///        `(save_path)/gen_log` and advance `gen_horizon` by `gen_period`.
///     6. `env_steps += num_envs`
/// 2. Save the policy in `(save_path)/policy.safetensors`.
///
/// # Interaction of objects
///
/// ```mermaid
/// graph LR
///     A[Estimator]-->|ActBatch|B[VecEnv]
///     B -->|VecStep|C[RolloutAggregator]
///     C -->|TransitionBatch|D[TransitionStore]
///     D -->|TransitionBatch|A
///     A -->|GenPolicy|E[Generator]
/// ```
pub struct Trainer<S: TransitionStore> {
    config: TrainerConfig,

    /// Experience gathered so far.
    store: S,

    /// Remaining checkpoint thresholds.
    check_points: CheckpointSchedule,

    /// Environment steps, summed over parallel environments.
    env_steps: usize,

    /// Transitions pushed to the store since the last optimization steps.
    new_transitions: usize,

    /// Total number of optimization steps.
    n_updates: usize,
}

impl<S: TransitionStore> Trainer<S> {
    /// Constructs a trainer with an empty transition store.
    pub fn build(config: TrainerConfig, store_config: &S::Config) -> Result<Self> {
        config.validate()?;
        let check_points = CheckpointSchedule::new(config.check_points.clone())?;
        Ok(Self {
            store: S::build(store_config),
            check_points,
            config,
            env_steps: 0,
            new_transitions: 0,
            n_updates: 0,
        })
    }

    /// Environment steps taken in the current or last run.
    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    /// Total number of optimization steps.
    pub fn n_updates(&self) -> usize {
        self.n_updates
    }

    /// Checkpoint thresholds not reached yet, in descending order.
    pub fn check_points(&self) -> Vec<usize> {
        self.check_points.remaining()
    }

    /// The transition store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Does optimization steps if enough new transitions were gathered.
    ///
    /// Returns the number of optimization steps performed.
    fn learn<M: Estimator>(
        &mut self,
        model: &mut M,
        recorder: &mut dyn AggregateRecorder,
    ) -> Result<usize> {
        let update_freq = self.config.update_freq;
        if self.new_transitions <= update_freq || self.store.len() < self.config.batch_size {
            return Ok(0);
        }

        let n = self.new_transitions / update_freq;
        for _ in 0..n {
            let batch = self.store.sample(self.config.batch_size)?;
            recorder.store(model.update(batch)?);
        }
        self.new_transitions -= update_freq * n;
        self.n_updates += n;
        debug!(
            "{} optimization steps at env step {}, {} transitions carried over",
            n, self.env_steps, self.new_transitions
        );

        let mut record = Record::empty();
        record.insert("env_steps", Scalar(self.env_steps as _));
        record.insert("n_transitions", Scalar(self.store.len() as _));
        record.insert("n_updates", Scalar(self.n_updates as _));
        recorder.store(record);
        recorder.flush(self.env_steps as _);

        Ok(n)
    }

    fn save_checkpoint<M: Estimator>(&self, model: &M, steps: usize) -> Result<()> {
        let path = Path::new(&self.config.save_path).join(format!("model_at_{}", steps));
        fs::create_dir_all(&path)?;
        model.save_params(&path, "{}", true)?;
        info!("Saved the policy in {:?}", &path);
        Ok(())
    }

    /// Runs the training loop until the step budget is exhausted.
    pub fn train<E, M, G>(
        &mut self,
        env: &mut E,
        model: &mut M,
        generator: &mut G,
        recorder: &mut dyn AggregateRecorder,
    ) -> Result<()>
    where
        E: VecEnv,
        M: Estimator,
        G: Generator,
    {
        let save_path = Path::new(&self.config.save_path).to_path_buf();
        let num_envs = env.num_envs();
        if num_envs == 0 {
            return Err(NcerlError::InvalidConfig("num_envs must be positive".to_string()).into());
        }
        let mut aggregator = RolloutAggregator::new(num_envs);
        let mut obs = env.reset()?;
        let mut gen_horizon = 0;
        self.env_steps = 0;
        self.new_transitions = 0;
        model.train();
        info!("Start to train SAC");

        while self.env_steps < self.config.step_budget {
            let act = model.act(&obs)?;
            let step = env.step(&act)?;
            self.new_transitions += aggregator.consume(&obs, &act, &step, &mut self.store)?;
            obs = step.obs;

            self.learn(model, recorder)?;

            if let Some(t) = self.check_points.pop_due(self.env_steps) {
                debug!("Checkpoint threshold {} reached", t);
                self.save_checkpoint(model, self.env_steps)?;
            }

            if self.env_steps >= gen_horizon {
                let policy = GenPolicy::new(&*model, env.hist_len());
                let tag = format!("step{}", self.env_steps);
                info!("Generate {} artifacts tagged {}", self.config.gen_num, &tag);
                generator.generate(
                    &policy,
                    &save_path.join("gen_log"),
                    &tag,
                    self.config.gen_num,
                    env.eplen(),
                )?;
                gen_horizon += self.config.gen_period;
            }

            self.env_steps += num_envs;
        }

        fs::create_dir_all(&save_path)?;
        let path = save_path.join("policy.safetensors");
        model.save_policy(&path)?;
        info!("Saved the final policy in {:?}", &path);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dummy::ConstEstimator,
        record::BufferedRecorder,
        replay_mem::{ReplayMem, ReplayMemConfig},
        TransitionBatch,
    };
    use ndarray::Array2;

    fn trainer_with(n_stored: usize, config: TrainerConfig) -> Result<Trainer<ReplayMem>> {
        let mut trainer =
            Trainer::<ReplayMem>::build(config, &ReplayMemConfig::default().capacity(100))?;
        trainer.store.add_batched(TransitionBatch::new(
            Array2::zeros((n_stored, 2)),
            Array2::zeros((n_stored, 1)),
            vec![0.0; n_stored],
            Array2::zeros((n_stored, 2)),
            vec![false; n_stored],
        )?)?;
        Ok(trainer)
    }

    #[test]
    fn test_update_accounting() -> Result<()> {
        let config = TrainerConfig::default().update_freq(10).batch_size(4);
        let mut trainer = trainer_with(30, config)?;
        let mut model = ConstEstimator::new(1, 0.0);
        let mut recorder = BufferedRecorder::new();

        trainer.new_transitions = 23;
        assert_eq!(trainer.learn(&mut model, &mut recorder)?, 2);
        assert_eq!(model.n_updates(), 2);
        assert_eq!(trainer.new_transitions, 3);
        assert_eq!(trainer.n_updates(), 2);

        // One flush per learning cycle
        assert_eq!(recorder.len(), 1);
        let record = recorder.iter().next().unwrap();
        assert_eq!(record.get_scalar("n_updates")?, 2.0);
        assert_eq!(record.get_scalar("n_transitions")?, 30.0);
        Ok(())
    }

    #[test]
    fn test_no_update_at_threshold() -> Result<()> {
        let config = TrainerConfig::default().update_freq(10).batch_size(4);
        let mut trainer = trainer_with(30, config)?;
        let mut model = ConstEstimator::new(1, 0.0);
        let mut recorder = BufferedRecorder::new();

        trainer.new_transitions = 10;
        assert_eq!(trainer.learn(&mut model, &mut recorder)?, 0);
        assert_eq!(trainer.new_transitions, 10);
        assert!(recorder.is_empty());
        Ok(())
    }

    #[test]
    fn test_no_update_with_small_store() -> Result<()> {
        let config = TrainerConfig::default().update_freq(10).batch_size(31);
        let mut trainer = trainer_with(30, config)?;
        let mut model = ConstEstimator::new(1, 0.0);
        let mut recorder = BufferedRecorder::new();

        trainer.new_transitions = 25;
        assert_eq!(trainer.learn(&mut model, &mut recorder)?, 0);
        assert_eq!(model.n_updates(), 0);
        assert_eq!(trainer.new_transitions, 25);
        Ok(())
    }

    #[test]
    fn test_build_rejects_duplicated_check_points() {
        let config = TrainerConfig::default().check_points(vec![100, 100]);
        assert!(Trainer::<ReplayMem>::build(config, &ReplayMemConfig::default()).is_err());
    }
}
