//! Configuration of [`ReplayMem`](super::ReplayMem).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`ReplayMem`](super::ReplayMem).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayMemConfig {
    /// Maximum number of transitions. Older transitions are overwritten.
    pub capacity: usize,

    /// Random seed used for sampling.
    pub seed: u64,
}

impl Default for ReplayMemConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            seed: 42,
        }
    }
}

impl ReplayMemConfig {
    /// Sets the capacity of the replay memory.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the random seed for sampling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_replay_mem_config() -> Result<()> {
        let config = ReplayMemConfig::default().capacity(100).seed(7);
        let dir = TempDir::new("replay_mem_config")?;
        let path = dir.path().join("replay_mem_config.yaml");
        config.save(&path)?;
        assert_eq!(ReplayMemConfig::load(&path)?, config);
        Ok(())
    }
}
