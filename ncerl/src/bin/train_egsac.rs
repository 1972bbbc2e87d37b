use anyhow::Result;
use clap::Parser;
use log::info;
use ncerl::{JsonLevelGenerator, ToyLevelEnv, ToyLevelEnvConfig};
use ncerl_candle_agent::{
    mlp::{Mlp, Mlp2, MlpConfig},
    opt::OptimizerConfig,
    sac::{ActorConfig, CriticConfig, Sac, SacConfig},
    Device,
};
use ncerl_core::{
    replay_mem::{ReplayMem, ReplayMemConfig},
    Estimator, GenPolicy, Generator, Trainer, TrainerConfig, VecEnv,
};
use ncerl_tensorboard::TensorboardRecorder;
use std::{fs, path::Path};

const LR_ACTOR: f64 = 3e-4;
const LR_CRITIC: f64 = 3e-4;

/// Train an episodic generative SAC agent on the latent level environment
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory of models, configurations, logs and generated levels
    #[arg(long, default_value = "training_logs/egsac")]
    save_path: String,

    /// Number of environment steps to train for
    #[arg(long, default_value_t = 1_000_000)]
    budget: usize,

    /// Number of parallel environments
    #[arg(long, default_value_t = 5)]
    n_envs: usize,

    /// Number of segments in an episode
    #[arg(long, default_value_t = 50)]
    eplen: usize,

    /// Number of past segments the policy observes
    #[arg(long, default_value_t = 5)]
    hist_len: usize,

    /// Dimension of latent vectors
    #[arg(long, default_value_t = 20)]
    nz: usize,

    /// Hidden units of the actor and the critics
    #[arg(long, value_delimiter = ',', default_value = "256,256")]
    units: Vec<usize>,

    /// Discount factor
    #[arg(long, default_value_t = 0.9)]
    gamma: f64,

    /// Soft update rate of the target critics
    #[arg(long, default_value_t = 0.02)]
    tau: f64,

    /// Capacity of the replay memory
    #[arg(long, default_value_t = 500_000)]
    mem_size: usize,

    /// Number of new transitions per update
    #[arg(long, default_value_t = 10)]
    update_freq: usize,

    /// Batch size of updates
    #[arg(long, default_value_t = 384)]
    batch_size: usize,

    /// Environment steps between generations of levels
    #[arg(long, default_value_t = 100_000)]
    gen_period: usize,

    /// Number of levels generated each time
    #[arg(long, default_value_t = 100)]
    gen_num: usize,

    /// Environment steps at which the policy is saved
    #[arg(long, value_delimiter = ',')]
    check_points: Vec<usize>,

    /// Random seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Index of the CUDA device, CPU if not given
    #[arg(long)]
    cuda: Option<usize>,

    /// Generate levels with the policy saved in this directory, not train
    #[arg(long)]
    generate: Option<String>,
}

impl Args {
    fn env_config(&self) -> ToyLevelEnvConfig {
        ToyLevelEnvConfig::default()
            .num_envs(self.n_envs)
            .nz(self.nz)
            .hist_len(self.hist_len)
            .eplen(self.eplen)
    }

    fn device(&self) -> Device {
        match self.cuda {
            Some(n) => Device::Cuda(n),
            None => Device::Cpu,
        }
    }
}

fn create_agent(args: &Args) -> Result<(Sac<Mlp, Mlp2>, SacConfig<Mlp, Mlp2>)> {
    let in_dim = args.env_config().obs_dim();
    let out_dim = args.nz;
    let actor_config = ActorConfig::default()
        .opt_config(OptimizerConfig::default().learning_rate(LR_ACTOR))
        .pi_config(MlpConfig::new(in_dim, args.units.clone(), out_dim, false));
    let critic_config = CriticConfig::default()
        .opt_config(OptimizerConfig::default().learning_rate(LR_CRITIC))
        .q_config(MlpConfig::new(in_dim + out_dim, args.units.clone(), 1, false));
    let sac_config = SacConfig::default()
        .actor_config(actor_config)
        .critic_config(critic_config)
        .discount_factor(args.gamma)
        .tau(args.tau)
        .device(args.device());
    let agent = Sac::build(sac_config.clone())?;
    Ok((agent, sac_config))
}

fn train(args: &Args) -> Result<()> {
    let save_path = Path::new(&args.save_path);
    fs::create_dir_all(save_path)?;

    let env_config = args.env_config();
    let mem_config = ReplayMemConfig::default()
        .capacity(args.mem_size)
        .seed(args.seed);
    let trainer_config = TrainerConfig::default()
        .step_budget(args.budget)
        .update_freq(args.update_freq)
        .batch_size(args.batch_size)
        .check_points(args.check_points.clone())
        .save_path(args.save_path.as_str())
        .gen_period(args.gen_period)
        .gen_num(args.gen_num);
    let (mut agent, sac_config) = create_agent(args)?;

    env_config.save(save_path.join("env.yaml"))?;
    mem_config.save(save_path.join("replay_mem.yaml"))?;
    trainer_config.save(save_path.join("trainer.yaml"))?;
    sac_config.save(save_path.join("sac.yaml"))?;

    let mut env = ToyLevelEnv::build(&env_config, args.seed)?;
    let mut trainer = Trainer::<ReplayMem>::build(trainer_config, &mem_config)?;
    let mut generator = JsonLevelGenerator::new(args.nz, args.seed);
    let mut recorder = TensorboardRecorder::new(save_path.join("logs"));

    trainer.train(&mut env, &mut agent, &mut generator, &mut recorder)?;
    info!(
        "Finished after {} environment steps and {} updates",
        trainer.env_steps(),
        trainer.n_updates()
    );

    Ok(())
}

fn generate(args: &Args, model_dir: &str) -> Result<()> {
    let agent = {
        let (mut agent, _) = create_agent(args)?;
        agent.load_params(Path::new(model_dir), "{}")?;
        agent.eval();
        agent
    };
    let mut generator = JsonLevelGenerator::new(args.nz, args.seed);
    let policy = GenPolicy::new(&agent, args.hist_len);
    generator.generate(
        &policy,
        &Path::new(model_dir).join("levels"),
        "eval",
        args.gen_num,
        args.eplen,
    )?;

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match &args.generate {
        Some(model_dir) => generate(&args, model_dir)?,
        None => train(&args)?,
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_train_egsac() -> Result<()> {
        let dir = TempDir::new("train_egsac")?;
        let save_path = dir.path().to_str().unwrap();
        let args = Args::parse_from([
            "train_egsac",
            "--save-path",
            save_path,
            "--budget",
            "40",
            "--n-envs",
            "2",
            "--eplen",
            "5",
            "--hist-len",
            "2",
            "--nz",
            "3",
            "--units",
            "16,16",
            "--update-freq",
            "4",
            "--batch-size",
            "8",
            "--gen-period",
            "20",
            "--gen-num",
            "2",
            "--check-points",
            "10,30",
        ]);
        train(&args)?;

        let path = dir.path();
        assert!(path.join("policy.safetensors").exists());
        assert!(path.join("model_at_10").join("actor.safetensors").exists());
        assert!(path.join("model_at_30").join("actor.safetensors").exists());
        for tag in ["step0", "step20"] {
            let levels = JsonLevelGenerator::load(path.join("gen_log"), tag)?;
            assert_eq!(levels.levels.len(), 2);
        }
        assert_eq!(TrainerConfig::load(path.join("trainer.yaml"))?.check_points, vec![10, 30]);

        let model_dir = path.join("model_at_30");
        generate(&args, model_dir.to_str().unwrap())?;
        let levels = JsonLevelGenerator::load(model_dir.join("levels"), "eval")?;
        assert!(levels.levels.iter().flatten().flatten().all(|v| v.abs() < 1.0));

        Ok(())
    }
}
