//! Writes latent sequences generated by a policy as JSON.
use anyhow::Result;
use log::info;
use ncerl_core::{error::NcerlError, GenPolicy, Generator, Policy};
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{fs, fs::File, io::BufWriter, path::Path};

/// Content of a file written by [`JsonLevelGenerator`].
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct GeneratedLevels {
    /// Tag of the generation, e.g. `step100000`.
    pub tag: String,

    /// One latent sequence per level, `eplen` segments of `nz` values each.
    pub levels: Vec<Vec<Vec<f32>>>,
}

/// A [`Generator`] rolling a policy from random histories.
///
/// All levels of a call are generated together: the policy sees a batch with
/// one row per level.
pub struct JsonLevelGenerator {
    nz: usize,
    rng: StdRng,
}

impl JsonLevelGenerator {
    /// Creates a generator of latent vectors of dimension `nz`.
    pub fn new(nz: usize, seed: u64) -> Self {
        Self {
            nz,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Loads the levels written for `tag` in `dir`.
    pub fn load(dir: impl AsRef<Path>, tag: &str) -> Result<GeneratedLevels> {
        let file = File::open(dir.as_ref().join(format!("{}.json", tag)))?;
        Ok(serde_json::from_reader(file)?)
    }
}

impl Generator for JsonLevelGenerator {
    fn generate<P: Policy + ?Sized>(
        &mut self,
        policy: &GenPolicy<'_, P>,
        out_dir: &Path,
        tag: &str,
        n: usize,
        eplen: usize,
    ) -> Result<()> {
        let nz = self.nz;
        let hist_len = policy.hist_len();
        if hist_len == 0 {
            return Err(NcerlError::InvalidConfig("hist_len must be positive".to_string()).into());
        }
        let rng = &mut self.rng;
        let mut obs = Array2::from_shape_fn((n, hist_len * nz), |_| rng.gen_range(-1.0f32..=1.0));
        let mut levels = vec![Vec::with_capacity(eplen); n];

        for _ in 0..eplen {
            let act = policy.act(&obs)?;
            if act.dim() != (n, nz) {
                return Err(NcerlError::ShapeMismatch {
                    what: "generated segments".to_string(),
                    expected: n * nz,
                    actual: act.len(),
                }
                .into());
            }

            // drop the oldest segment of each history and append the new one
            let shift = (hist_len - 1) * nz;
            let prev = obs.clone();
            for (i, level) in levels.iter_mut().enumerate() {
                let segment = act.row(i).to_vec();
                for j in 0..shift {
                    obs[[i, j]] = prev[[i, j + nz]];
                }
                for (j, v) in segment.iter().enumerate() {
                    obs[[i, shift + j]] = *v;
                }
                level.push(segment);
            }
        }

        fs::create_dir_all(out_dir)?;
        let path = out_dir.join(format!("{}.json", tag));
        let wtr = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(
            wtr,
            &GeneratedLevels {
                tag: tag.to_string(),
                levels,
            },
        )?;
        info!("Wrote {} levels into {:?}", n, path);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncerl_core::{ActBatch, ObsBatch};
    use tempdir::TempDir;

    /// Returns the mean of the observed history as the next segment.
    struct MeanPolicy {
        nz: usize,
    }

    impl Policy for MeanPolicy {
        fn act(&self, obs: &ObsBatch) -> Result<ActBatch> {
            let hist_len = obs.ncols() / self.nz;
            Ok(Array2::from_shape_fn((obs.nrows(), self.nz), |(i, j)| {
                (0..hist_len).map(|k| obs[[i, k * self.nz + j]]).sum::<f32>() / hist_len as f32
            }))
        }
    }

    #[test]
    fn test_generate() -> Result<()> {
        let dir = TempDir::new("json_level_generator")?;
        let out_dir = dir.path().join("gen_log");
        let policy = MeanPolicy { nz: 3 };
        let mut generator = JsonLevelGenerator::new(3, 42);

        generator.generate(&GenPolicy::new(&policy, 1), &out_dir, "step0", 4, 6)?;
        let levels = JsonLevelGenerator::load(&out_dir, "step0")?;
        assert_eq!(levels.tag, "step0");
        assert_eq!(levels.levels.len(), 4);
        for level in levels.levels.iter() {
            assert_eq!(level.len(), 6);
            assert!(level.iter().all(|s| s.len() == 3));
            // with a history of one, the mean policy repeats the last segment
            assert!(level.windows(2).all(|w| w[0] == w[1]));
        }
        Ok(())
    }

    #[test]
    fn test_history_is_shifted() -> Result<()> {
        let dir = TempDir::new("json_level_generator")?;
        let policy = MeanPolicy { nz: 2 };
        let mut generator = JsonLevelGenerator::new(2, 0);
        generator.generate(&GenPolicy::new(&policy, 3), dir.path(), "t", 1, 3)?;
        let levels = JsonLevelGenerator::load(dir.path(), "t")?.levels;

        // the third segment averages one random segment and the two generated before it
        assert_eq!(levels[0].len(), 3);
        let s = &levels[0];
        let expected_tail = (s[0][0] + s[1][0]) / 3.0;
        assert!(s[2][0] - expected_tail > -1.0 / 3.0 - 1e-6);
        assert!(s[2][0] - expected_tail < 1.0 / 3.0 + 1e-6);
        Ok(())
    }

    #[test]
    fn test_wrong_policy_output() -> Result<()> {
        let dir = TempDir::new("json_level_generator")?;
        let policy = MeanPolicy { nz: 2 };
        let mut generator = JsonLevelGenerator::new(3, 0);
        assert!(generator
            .generate(&GenPolicy::new(&policy, 1), dir.path(), "t", 2, 2)
            .is_err());
        Ok(())
    }
}
