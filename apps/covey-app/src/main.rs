//! Covey command-line front end.
//!
//! Three subcommands:
//!
//! - `worker` — run as a worker process; launched by the coordinator with a
//!   loopback address to connect back to (not meant to be run by hand)
//! - `rollout` — spawn a vectorized run from a TOML config and drive it with
//!   random actions, reporting episode statistics
//! - `info` — list the environments this binary can host

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use covey_core::config::{EnvSpec, RunConfig};
use covey_core::key::attach_env;
use covey_core::seed::episode_seed;
use covey_core::types::{Action, ResetOptions};
use covey_ipc::channel::LaunchOptions;
use covey_test_utils::register_builtin;
use covey_vec::VecCoordinator;
use covey_worker::Registry;

#[derive(Parser)]
#[command(name = "covey", version, about = "Vectorized multi-agent environment runner")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run as a worker process (launched by the coordinator).
    Worker {
        /// Coordinator address to connect back to.
        #[arg(long)]
        connect: String,

        /// Index of this worker within the run.
        #[arg(long)]
        worker_id: usize,

        /// Environment spec as JSON, e.g. `{"name":"counter-v0"}`.
        #[arg(long)]
        spec: String,

        /// RNG seed for the hosted environment.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Drive a vectorized run with random actions.
    Rollout {
        /// TOML run configuration.
        #[arg(long)]
        config: PathBuf,

        /// Number of batched steps to take.
        #[arg(long, default_value_t = 100)]
        steps: u64,

        /// Override the config's base seed.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List the environments this binary can host.
    Info,
}

fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    register_builtin(&mut registry);
    registry
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        CliCommand::Worker {
            connect,
            worker_id,
            spec,
            seed,
        } => run_worker(&connect, worker_id, &spec, seed),
        CliCommand::Rollout {
            config,
            steps,
            seed,
        } => run_rollout(&config, steps, seed),
        CliCommand::Info => {
            for name in builtin_registry().names() {
                println!("{name}");
            }
            Ok(())
        }
    };

    if let Err(message) = result {
        eprintln!("error: {message}");
        std::process::exit(1);
    }
}

fn run_worker(connect: &str, worker_id: usize, spec: &str, seed: u64) -> Result<(), String> {
    let spec: EnvSpec =
        serde_json::from_str(spec).map_err(|e| format!("invalid --spec JSON: {e}"))?;
    let registry = builtin_registry();
    covey_worker::run(connect, worker_id, &spec, seed, &registry).map_err(|e| e.to_string())
}

/// Per-run tallies reported at the end of a rollout.
#[derive(Debug, Default)]
struct RolloutStats {
    steps: u64,
    episodes: u64,
    total_reward: f64,
}

fn run_rollout(config: &PathBuf, steps: u64, seed: Option<u64>) -> Result<(), String> {
    let mut config = RunConfig::load(config).map_err(|e| e.to_string())?;
    if let Some(seed) = seed {
        config.base_seed = seed;
    }

    let program = std::env::current_exe().map_err(|e| e.to_string())?;
    let mut options = LaunchOptions::new(program);
    options.connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    options.step_timeout = Duration::from_millis(config.step_timeout_ms);
    options.close_timeout = Duration::from_millis(config.close_timeout_ms);

    let mut coordinator =
        VecCoordinator::spawn(&config.worker_specs(), &options, config.base_seed)
            .map_err(|e| e.to_string())?;
    let result = drive(&mut coordinator, steps, config.base_seed);
    coordinator.close();

    let stats = result.map_err(|e| e.to_string())?;
    info!(
        steps = stats.steps,
        episodes = stats.episodes,
        total_reward = stats.total_reward,
        "rollout finished"
    );
    println!(
        "steps={} episodes={} total_reward={:.3}",
        stats.steps, stats.episodes, stats.total_reward
    );
    Ok(())
}

/// Step the run with uniformly sampled actions, resetting whenever every
/// agent in the batch reports done.
fn drive(
    coordinator: &mut VecCoordinator,
    steps: u64,
    base_seed: u64,
) -> Result<RolloutStats, covey_vec::CoordinatorError> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(base_seed);
    let mut stats = RolloutStats::default();

    coordinator.reset(&ResetOptions::seeded(episode_seed(base_seed, 0)))?;
    let action_spaces = coordinator.spaces().action.clone();
    let workers = coordinator.num_workers();

    for _ in 0..steps {
        let mut actions: BTreeMap<String, Action> = BTreeMap::new();
        for worker in 0..workers {
            for (agent, space) in &action_spaces {
                actions.insert(attach_env(agent, worker)?, space.sample(&mut rng));
            }
        }

        let batch = coordinator.step(&actions)?;
        stats.steps += 1;
        stats.total_reward += batch.rewards.values().map(|&r| f64::from(r)).sum::<f64>();

        if !batch.dones.is_empty() && batch.dones.values().all(|&done| done) {
            stats.episodes += 1;
            coordinator.reset(&ResetOptions::seeded(episode_seed(base_seed, stats.episodes)))?;
        }
    }
    Ok(stats)
}
