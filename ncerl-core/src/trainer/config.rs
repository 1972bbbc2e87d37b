//! Configuration of [`Trainer`](super::Trainer).
use crate::error::NcerlError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Trainer`](super::Trainer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TrainerConfig {
    /// Number of environment steps, summed over parallel environments.
    pub step_budget: usize,

    /// Number of new transitions per optimization step.
    pub update_freq: usize,

    /// Batch size of optimization steps.
    pub batch_size: usize,

    /// Environment steps at which the policy is saved, in any order.
    pub check_points: Vec<usize>,

    /// Directory of checkpoints, generated artifacts and the final policy.
    pub save_path: String,

    /// Interval of artifact generation in environment steps.
    pub gen_period: usize,

    /// Number of artifacts generated each time.
    pub gen_num: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            step_budget: 1_000_000,
            update_freq: 10,
            batch_size: 384,
            check_points: vec![],
            save_path: ".".to_string(),
            gen_period: 100_000,
            gen_num: 100,
        }
    }
}

impl TrainerConfig {
    /// Sets the step budget.
    pub fn step_budget(mut self, v: usize) -> Self {
        self.step_budget = v;
        self
    }

    /// Sets the number of new transitions per optimization step.
    pub fn update_freq(mut self, v: usize) -> Self {
        self.update_freq = v;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets checkpoint thresholds in environment steps.
    pub fn check_points(mut self, v: Vec<usize>) -> Self {
        self.check_points = v;
        self
    }

    /// Sets the output directory.
    pub fn save_path(mut self, v: impl Into<String>) -> Self {
        self.save_path = v.into();
        self
    }

    /// Sets the interval of artifact generation.
    pub fn gen_period(mut self, v: usize) -> Self {
        self.gen_period = v;
        self
    }

    /// Sets the number of artifacts generated each time.
    pub fn gen_num(mut self, v: usize) -> Self {
        self.gen_num = v;
        self
    }

    /// Checks the values of the configuration.
    pub fn validate(&self) -> Result<()> {
        let invalid =
            |msg: &str| -> Result<()> { Err(NcerlError::InvalidConfig(msg.to_string()).into()) };
        if self.update_freq == 0 {
            return invalid("update_freq must be positive");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.gen_period == 0 {
            return invalid("gen_period must be positive");
        }
        Ok(())
    }

    /// Constructs [`TrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_trainer_config() -> Result<()> {
        let config = TrainerConfig::default()
            .step_budget(1000)
            .check_points(vec![100, 50, 200])
            .save_path("some/directory");

        let dir = TempDir::new("trainer_config")?;
        let path = dir.path().join("trainer_config.yaml");
        config.save(&path)?;
        let config_ = TrainerConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }

    #[test]
    fn test_validate() {
        assert!(TrainerConfig::default().validate().is_ok());
        assert!(TrainerConfig::default().update_freq(0).validate().is_err());
        assert!(TrainerConfig::default().batch_size(0).validate().is_err());
        assert!(TrainerConfig::default().gen_period(0).validate().is_err());

        // Thresholds are checked by the schedule built from them
        assert!(TrainerConfig::default()
            .check_points(vec![5, 10, 5])
            .validate()
            .is_ok());
    }
}
