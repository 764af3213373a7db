//! Built-in scripted environments.
//!
//! Two small deterministic environments back the test suites and the demo
//! rollout command:
//!
//! - [`CounterEnv`] (`counter-v0`) — single agent, flat observations; the
//!   observation is the step count, the episode ends at a configurable limit
//! - [`ScriptedEnv`] (`scripted-v0`) — a seeker and a hider on a 1-D strip,
//!   structured observations with an `action_mask` field
//!
//! [`register_builtin`] wires both into a worker registry under those names.

use std::collections::BTreeMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use covey_core::config::EnvSpec;
use covey_core::env::{EnvStep, MultiAgentEnv};
use covey_core::error::EnvError;
use covey_core::seed::rng;
use covey_core::types::{
    Action, ActionSpace, InfoValue, Observation, ObservationSpace, ResetOptions, Spaces,
};
use covey_worker::registry::Registry;

/// Register `counter-v0` and `scripted-v0`.
pub fn register_builtin(registry: &mut Registry) {
    registry.register("counter-v0", |spec| Ok(Box::new(CounterEnv::from_spec(spec))));
    registry.register("scripted-v0", |spec| {
        Ok(Box::new(ScriptedEnv::from_spec(spec)))
    });
}

// ---------------------------------------------------------------------------
// CounterEnv
// ---------------------------------------------------------------------------

/// Single-agent counting environment.
///
/// The observation is `[count]`, the reward equals the discrete action taken,
/// and the episode ends after `limit` steps. With `exit_after_steps = n` the
/// hosting process aborts mid-step after `n` steps, which is how the process
/// failure tests produce a genuinely dead worker.
pub struct CounterEnv {
    count: u64,
    limit: u64,
    exit_after_steps: Option<u64>,
}

impl CounterEnv {
    /// Agent name used by the counter environment.
    pub const AGENT: &'static str = "counter";

    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            count: 0,
            limit,
            exit_after_steps: None,
        }
    }

    #[must_use]
    pub fn from_spec(spec: &EnvSpec) -> Self {
        let mut env = Self::new(spec.param_u64("limit", 100));
        if let Some(n) = spec.params.get("exit_after_steps").and_then(|v| v.as_u64()) {
            env.exit_after_steps = Some(n);
        }
        env
    }
}

impl MultiAgentEnv for CounterEnv {
    fn agents(&self) -> Vec<String> {
        vec![Self::AGENT.into()]
    }

    fn spaces(&self) -> Spaces {
        let mut spaces = Spaces::default();
        spaces.observation.insert(
            Self::AGENT.into(),
            ObservationSpace::Box {
                low: vec![0.0],
                high: vec![self.limit as f32],
            },
        );
        spaces
            .action
            .insert(Self::AGENT.into(), ActionSpace::Discrete { n: 3 });
        spaces
    }

    fn reset(&mut self, _options: &ResetOptions) -> Result<BTreeMap<String, Observation>, EnvError> {
        self.count = 0;
        let mut observations = BTreeMap::new();
        observations.insert(Self::AGENT.into(), Observation::flat(vec![0.0]));
        Ok(observations)
    }

    fn step(&mut self, actions: &BTreeMap<String, Action>) -> Result<EnvStep, EnvError> {
        let action = actions
            .get(Self::AGENT)
            .ok_or_else(|| EnvError::UnknownAgent(Self::AGENT.into()))?;
        let Action::Discrete(choice) = action else {
            return Err(EnvError::StepFailed("expected a discrete action".into()));
        };

        self.count += 1;
        if self.exit_after_steps.is_some_and(|n| self.count >= n) {
            // Simulated engine crash for worker failure tests.
            std::process::exit(17);
        }

        let mut step = EnvStep::default();
        step.observations.insert(
            Self::AGENT.into(),
            Observation::flat(vec![self.count as f32]),
        );
        step.rewards.insert(Self::AGENT.into(), *choice as f32);
        step.dones
            .insert(Self::AGENT.into(), self.count >= self.limit);
        step.infos
            .insert(Self::AGENT.into(), InfoValue::Scalar(self.count as f64));
        Ok(step)
    }

    fn seed(&mut self, _value: u64) {}

    fn remote_attrs(&self) -> &[&str] {
        &["limit"]
    }

    fn remote_methods(&self) -> &[&str] {
        &["ping"]
    }

    fn get_attr(&self, name: &str) -> Result<serde_json::Value, EnvError> {
        match name {
            "limit" => Ok(serde_json::json!(self.limit)),
            other => Err(EnvError::UnsupportedAttr(other.into())),
        }
    }

    fn set_attr(&mut self, name: &str, value: serde_json::Value) -> Result<(), EnvError> {
        match name {
            "limit" => {
                self.limit = value
                    .as_u64()
                    .ok_or_else(|| EnvError::Other("limit must be an integer".into()))?;
                Ok(())
            }
            other => Err(EnvError::UnsupportedAttr(other.into())),
        }
    }

    fn call_method(
        &mut self,
        name: &str,
        args: &[serde_json::Value],
        _kwargs: &BTreeMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, EnvError> {
        match name {
            "ping" => Ok(serde_json::json!({ "pong": args.len() })),
            other => Err(EnvError::UnsupportedMethod(other.into())),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedEnv
// ---------------------------------------------------------------------------

/// Two-agent pursuit on a 1-D strip of `size` cells.
///
/// The seeker wins by reaching the hider's cell; the episode also ends after
/// `max_steps`. Observations are structured: a position vector plus an
/// `action_mask` field masking moves off the strip. Actions: 0 = stay,
/// 1 = left, 2 = right. When an episode ends, each agent's info slot carries
/// `[episode_length, episode_return]`.
pub struct ScriptedEnv {
    size: u64,
    max_steps: u64,
    steps: u64,
    seeker: u64,
    hider: u64,
    returns: BTreeMap<String, f64>,
    last_seed: u64,
    rng: ChaCha8Rng,
}

impl ScriptedEnv {
    pub const SEEKER: &'static str = "seeker";
    pub const HIDER: &'static str = "hider";

    #[must_use]
    pub fn new(size: u64, max_steps: u64, seed: u64) -> Self {
        Self {
            size: size.max(2),
            max_steps,
            steps: 0,
            seeker: 0,
            hider: size.max(2) - 1,
            returns: BTreeMap::new(),
            last_seed: seed,
            rng: rng(seed),
        }
    }

    #[must_use]
    pub fn from_spec(spec: &EnvSpec) -> Self {
        Self::new(
            spec.param_u64("size", 8),
            spec.param_u64("max_steps", 50),
            spec.param_u64("seed", 0),
        )
    }

    fn observe(&self, position: u64, other: u64) -> Observation {
        let norm = (self.size - 1) as f32;
        let mask = [
            1.0,
            if position > 0 { 1.0 } else { 0.0 },
            if position + 1 < self.size { 1.0 } else { 0.0 },
        ];
        Observation::structured([
            (
                "observation",
                vec![position as f32 / norm, other as f32 / norm],
            ),
            ("action_mask", mask.to_vec()),
        ])
    }

    fn observations(&self) -> BTreeMap<String, Observation> {
        let mut observations = BTreeMap::new();
        observations.insert(Self::SEEKER.into(), self.observe(self.seeker, self.hider));
        observations.insert(Self::HIDER.into(), self.observe(self.hider, self.seeker));
        observations
    }

    fn apply(&self, position: u64, action: &Action) -> Result<u64, EnvError> {
        let Action::Discrete(choice) = action else {
            return Err(EnvError::StepFailed("expected a discrete action".into()));
        };
        Ok(match choice {
            0 => position,
            1 => position.saturating_sub(1),
            2 => (position + 1).min(self.size - 1),
            other => {
                return Err(EnvError::StepFailed(format!(
                    "action {other} out of range 0..3"
                )))
            }
        })
    }
}

impl MultiAgentEnv for ScriptedEnv {
    fn agents(&self) -> Vec<String> {
        vec![Self::HIDER.into(), Self::SEEKER.into()]
    }

    fn spaces(&self) -> Spaces {
        let observation = {
            let mut fields = BTreeMap::new();
            fields.insert(
                "observation".to_string(),
                ObservationSpace::Box {
                    low: vec![0.0; 2],
                    high: vec![1.0; 2],
                },
            );
            fields.insert(
                "action_mask".to_string(),
                ObservationSpace::MultiDiscrete {
                    nvec: vec![2, 2, 2],
                },
            );
            ObservationSpace::Dict { spaces: fields }
        };

        let mut spaces = Spaces::default();
        for agent in [Self::SEEKER, Self::HIDER] {
            spaces.observation.insert(agent.into(), observation.clone());
            spaces
                .action
                .insert(agent.into(), ActionSpace::Discrete { n: 3 });
        }
        spaces
    }

    fn reset(&mut self, options: &ResetOptions) -> Result<BTreeMap<String, Observation>, EnvError> {
        if let Some(seed) = options.seed {
            self.rng = rng(seed);
        }
        self.steps = 0;
        self.returns.clear();
        self.seeker = self.rng.gen_range(0..self.size / 2);
        self.hider = self.rng.gen_range(self.size / 2..self.size);
        Ok(self.observations())
    }

    fn step(&mut self, actions: &BTreeMap<String, Action>) -> Result<EnvStep, EnvError> {
        let seeker_action = actions
            .get(Self::SEEKER)
            .ok_or_else(|| EnvError::UnknownAgent(Self::SEEKER.into()))?;
        let hider_action = actions
            .get(Self::HIDER)
            .ok_or_else(|| EnvError::UnknownAgent(Self::HIDER.into()))?;

        self.seeker = self.apply(self.seeker, seeker_action)?;
        self.hider = self.apply(self.hider, hider_action)?;
        self.steps += 1;

        let caught = self.seeker == self.hider;
        let done = caught || self.steps >= self.max_steps;

        let mut step = EnvStep {
            observations: self.observations(),
            ..EnvStep::default()
        };
        step.rewards
            .insert(Self::SEEKER.into(), if caught { 1.0 } else { -0.01 });
        step.rewards
            .insert(Self::HIDER.into(), if caught { -1.0 } else { 0.01 });
        for agent in [Self::SEEKER, Self::HIDER] {
            step.dones.insert(agent.into(), done);
            let total = self.returns.entry(agent.into()).or_insert(0.0);
            *total += f64::from(step.rewards[agent]);
            if done {
                // Episode stats: [length, return], reported once at the end.
                step.infos
                    .insert(agent.into(), InfoValue::List(vec![self.steps as f64, *total]));
            }
        }
        Ok(step)
    }

    fn seed(&mut self, value: u64) {
        self.last_seed = value;
        self.rng = rng(value);
    }

    fn remote_attrs(&self) -> &[&str] {
        &["size", "max_steps", "last_seed"]
    }

    fn get_attr(&self, name: &str) -> Result<serde_json::Value, EnvError> {
        match name {
            "size" => Ok(serde_json::json!(self.size)),
            "max_steps" => Ok(serde_json::json!(self.max_steps)),
            "last_seed" => Ok(serde_json::json!(self.last_seed)),
            other => Err(EnvError::UnsupportedAttr(other.into())),
        }
    }

    fn set_attr(&mut self, name: &str, value: serde_json::Value) -> Result<(), EnvError> {
        match name {
            "max_steps" => {
                self.max_steps = value
                    .as_u64()
                    .ok_or_else(|| EnvError::Other("max_steps must be an integer".into()))?;
                Ok(())
            }
            "size" => Err(EnvError::Other("size is read-only".into())),
            other => Err(EnvError::UnsupportedAttr(other.into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_action(choice: u64) -> BTreeMap<String, Action> {
        let mut actions = BTreeMap::new();
        actions.insert(CounterEnv::AGENT.into(), Action::Discrete(choice));
        actions
    }

    fn scripted_actions(seeker: u64, hider: u64) -> BTreeMap<String, Action> {
        let mut actions = BTreeMap::new();
        actions.insert(ScriptedEnv::SEEKER.into(), Action::Discrete(seeker));
        actions.insert(ScriptedEnv::HIDER.into(), Action::Discrete(hider));
        actions
    }

    #[test]
    fn counter_counts_to_its_limit() {
        let mut env = CounterEnv::new(2);
        let observations = env.reset(&ResetOptions::default()).unwrap();
        assert_eq!(
            observations[CounterEnv::AGENT],
            Observation::flat(vec![0.0])
        );

        let step = env.step(&counter_action(2)).unwrap();
        assert_eq!(
            step.observations[CounterEnv::AGENT],
            Observation::flat(vec![1.0])
        );
        assert!((step.rewards[CounterEnv::AGENT] - 2.0).abs() < f32::EPSILON);
        assert!(!step.dones[CounterEnv::AGENT]);

        let step = env.step(&counter_action(0)).unwrap();
        assert!(step.dones[CounterEnv::AGENT]);
    }

    #[test]
    fn counter_limit_attr_roundtrip() {
        let mut env = CounterEnv::new(5);
        env.set_attr("limit", serde_json::json!(9)).unwrap();
        assert_eq!(env.get_attr("limit").unwrap(), serde_json::json!(9));
        assert!(env.get_attr("count").is_err());
    }

    #[test]
    fn counter_from_spec_reads_params() {
        let spec = EnvSpec::named("counter-v0").with_param("limit", 7);
        let env = CounterEnv::from_spec(&spec);
        assert_eq!(env.limit, 7);
        assert_eq!(env.exit_after_steps, None);
    }

    #[test]
    fn scripted_reset_is_deterministic_per_seed() {
        let mut a = ScriptedEnv::new(8, 50, 4);
        let mut b = ScriptedEnv::new(8, 50, 4);
        assert_eq!(
            a.reset(&ResetOptions::default()).unwrap(),
            b.reset(&ResetOptions::default()).unwrap()
        );
    }

    #[test]
    fn scripted_observations_are_structured_with_mask() {
        let mut env = ScriptedEnv::new(4, 50, 0);
        let observations = env.reset(&ResetOptions::default()).unwrap();
        let seeker = &observations[ScriptedEnv::SEEKER];
        assert_eq!(seeker.field("observation").map(<[f32]>::len), Some(2));
        assert_eq!(seeker.field("action_mask").map(<[f32]>::len), Some(3));
    }

    #[test]
    fn mask_forbids_moving_off_the_strip() {
        let mut env = ScriptedEnv::new(4, 50, 0);
        env.reset(&ResetOptions::default()).unwrap();
        env.seeker = 0;
        let obs = env.observe(env.seeker, env.hider);
        assert_eq!(obs.field("action_mask"), Some(&[1.0, 0.0, 1.0][..]));
    }

    #[test]
    fn seeker_catching_hider_ends_the_episode() {
        let mut env = ScriptedEnv::new(4, 50, 0);
        env.reset(&ResetOptions::default()).unwrap();
        env.seeker = 1;
        env.hider = 2;

        // Seeker steps right onto the staying hider.
        let step = env.step(&scripted_actions(2, 0)).unwrap();
        assert!(step.dones[ScriptedEnv::SEEKER]);
        assert!((step.rewards[ScriptedEnv::SEEKER] - 1.0).abs() < f32::EPSILON);
        assert!((step.rewards[ScriptedEnv::HIDER] + 1.0).abs() < f32::EPSILON);
        // Episode stats: one step long, return equal to the final reward.
        assert_eq!(
            step.infos[ScriptedEnv::SEEKER],
            InfoValue::List(vec![1.0, 1.0])
        );
        assert_eq!(
            step.infos[ScriptedEnv::HIDER],
            InfoValue::List(vec![1.0, -1.0])
        );
    }

    #[test]
    fn episode_ends_at_max_steps() {
        let mut env = ScriptedEnv::new(8, 2, 0);
        env.reset(&ResetOptions::default()).unwrap();
        env.seeker = 0;
        env.hider = 7;

        let step = env.step(&scripted_actions(0, 0)).unwrap();
        assert!(!step.dones[ScriptedEnv::SEEKER]);
        assert!(step.infos.is_empty());
        let step = env.step(&scripted_actions(0, 0)).unwrap();
        assert!(step.dones[ScriptedEnv::SEEKER]);
        let InfoValue::List(stats) = &step.infos[ScriptedEnv::SEEKER] else {
            panic!("expected episode stats");
        };
        assert_eq!(stats[0], 2.0);
        assert!((stats[1] - -0.02).abs() < 1e-6);
    }

    #[test]
    fn invalid_action_is_a_step_error() {
        let mut env = ScriptedEnv::new(4, 50, 0);
        env.reset(&ResetOptions::default()).unwrap();
        let err = env.step(&scripted_actions(7, 0)).unwrap_err();
        assert!(matches!(err, EnvError::StepFailed(_)));
    }

    #[test]
    fn builtin_registry_builds_both() {
        let mut registry = Registry::new();
        register_builtin(&mut registry);
        assert!(registry.build(&EnvSpec::named("counter-v0")).is_ok());
        assert!(registry.build(&EnvSpec::named("scripted-v0")).is_ok());
        assert!(registry.build(&EnvSpec::named("missing-v0")).is_err());
    }

    #[test]
    fn spaces_agree_between_fresh_instances() {
        let spec = EnvSpec::named("scripted-v0").with_param("size", 6);
        assert_eq!(
            ScriptedEnv::from_spec(&spec).spaces(),
            ScriptedEnv::from_spec(&spec).spaces()
        );
    }
}
