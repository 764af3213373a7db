//! End-to-end tests against the real binary.
//!
//! These spawn actual worker processes through the coordinator, so they
//! exercise the full path: process launch, loopback connect, framed
//! protocol, and bounded-wait failure detection.

use std::collections::BTreeMap;
use std::process::Command;
use std::time::{Duration, Instant};

use covey_core::config::EnvSpec;
use covey_core::types::{Action, Observation, ResetOptions};
use covey_ipc::channel::LaunchOptions;
use covey_vec::{CoordinatorError, VecCoordinator};

const BIN: &str = env!("CARGO_BIN_EXE_covey-app");

fn launch_options() -> LaunchOptions {
    let mut options = LaunchOptions::new(BIN);
    options.connect_timeout = Duration::from_secs(10);
    options.step_timeout = Duration::from_secs(5);
    options.close_timeout = Duration::from_secs(2);
    options
}

fn counter_spec(limit: u64) -> EnvSpec {
    EnvSpec::named("counter-v0").with_param("limit", limit)
}

fn counter_actions(workers: usize) -> BTreeMap<String, Action> {
    (0..workers)
        .map(|worker| (format!("counter&env={worker}"), Action::Discrete(1)))
        .collect()
}

#[test]
fn spawned_workers_step_with_suffixed_keys() {
    let specs = vec![counter_spec(10), counter_spec(10)];
    let mut coordinator = VecCoordinator::spawn(&specs, &launch_options(), 0).unwrap();

    let observations = coordinator.reset(&ResetOptions::default()).unwrap();
    assert_eq!(
        observations.keys().collect::<Vec<_>>(),
        vec!["counter&env=0", "counter&env=1"]
    );

    let batch = coordinator.step(&counter_actions(2)).unwrap();
    assert_eq!(
        batch.observations["counter&env=0"],
        Observation::flat(vec![1.0])
    );
    assert_eq!(
        batch.observations["counter&env=1"],
        Observation::flat(vec![1.0])
    );

    coordinator.close();
}

#[test]
fn attr_indices_target_a_single_process() {
    let specs = vec![counter_spec(10), counter_spec(10)];
    let mut coordinator = VecCoordinator::spawn(&specs, &launch_options(), 0).unwrap();

    coordinator
        .set_attr("limit", &serde_json::json!(42), Some(&[1]))
        .unwrap();
    let values = coordinator.get_attr("limit", None).unwrap();
    assert_eq!(values, vec![serde_json::json!(10), serde_json::json!(42)]);

    coordinator.close();
}

#[test]
fn killed_worker_process_is_detected_within_the_bound() {
    // Worker 1's environment aborts its whole process on the second step.
    let specs = vec![
        counter_spec(10),
        counter_spec(10).with_param("exit_after_steps", 2),
    ];
    let mut coordinator = VecCoordinator::spawn(&specs, &launch_options(), 0).unwrap();
    coordinator.reset(&ResetOptions::default()).unwrap();

    coordinator.step(&counter_actions(2)).unwrap();

    let started = Instant::now();
    let err = coordinator.step(&counter_actions(2)).unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::WorkerLost { worker: 1, .. }
    ));
    assert!(started.elapsed() < Duration::from_secs(5));

    coordinator.close();
}

#[test]
fn close_is_idempotent_across_processes() {
    let specs = vec![counter_spec(10)];
    let mut coordinator = VecCoordinator::spawn(&specs, &launch_options(), 0).unwrap();
    coordinator.reset(&ResetOptions::default()).unwrap();

    coordinator.close();
    coordinator.close();
    assert!(matches!(
        coordinator.step(&counter_actions(1)),
        Err(CoordinatorError::Closed)
    ));
}

#[test]
fn scripted_env_runs_across_processes() {
    let specs = vec![
        EnvSpec::named("scripted-v0").with_param("size", 6),
        EnvSpec::named("scripted-v0").with_param("size", 6),
    ];
    let mut coordinator = VecCoordinator::spawn(&specs, &launch_options(), 7).unwrap();

    let observations = coordinator.reset(&ResetOptions::default()).unwrap();
    assert_eq!(observations.len(), 4); // seeker + hider on each worker
    assert!(observations["seeker&env=0"].field("action_mask").is_some());

    let actions: BTreeMap<String, Action> = observations
        .keys()
        .map(|key| (key.clone(), Action::Discrete(0)))
        .collect();
    let batch = coordinator.step(&actions).unwrap();
    assert_eq!(batch.rewards.len(), 4);

    coordinator.close();
}

#[test]
fn info_lists_builtin_environments() {
    let output = Command::new(BIN).arg("info").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("counter-v0"));
    assert!(stdout.contains("scripted-v0"));
}

#[test]
fn rollout_runs_from_a_config_file() {
    let path = std::env::temp_dir().join(format!("covey-rollout-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "workers = 2\nbase_seed = 3\n[env]\nname = \"counter-v0\"\n[env.params]\nlimit = 3\n",
    )
    .unwrap();

    let output = Command::new(BIN)
        .args(["rollout", "--config"])
        .arg(&path)
        .args(["--steps", "7"])
        .output()
        .unwrap();
    std::fs::remove_file(&path).ok();

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("steps=7"), "stdout: {stdout}");
    assert!(stdout.contains("episodes="), "stdout: {stdout}");
}

#[test]
fn rollout_rejects_a_missing_config() {
    let output = Command::new(BIN)
        .args(["rollout", "--config", "/nonexistent/run.toml"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
