//! Collaborator contract for the wrapped simulation.
//!
//! Each worker process hosts exactly one [`MultiAgentEnv`]. The trait is the
//! fixed per-call contract the coordinator relies on; the engine behind it is
//! opaque. Reflective access (`get_attr`/`set_attr`/`call_method`) is
//! restricted to the allow-lists the environment declares — nothing outside
//! [`remote_attrs`](MultiAgentEnv::remote_attrs) /
//! [`remote_methods`](MultiAgentEnv::remote_methods) is reachable across the
//! process boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EnvError;
use crate::types::{Action, Frame, InfoValue, Observation, RenderMode, ResetOptions, Spaces};

// ---------------------------------------------------------------------------
// EnvStep
// ---------------------------------------------------------------------------

/// Result of one environment step, keyed by worker-local agent name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvStep {
    pub observations: BTreeMap<String, Observation>,
    pub rewards: BTreeMap<String, f32>,
    pub dones: BTreeMap<String, bool>,
    pub infos: BTreeMap<String, InfoValue>,
}

// ---------------------------------------------------------------------------
// MultiAgentEnv
// ---------------------------------------------------------------------------

/// A real-time multi-agent simulation instance.
pub trait MultiAgentEnv: Send {
    /// Worker-local agent names currently alive.
    fn agents(&self) -> Vec<String>;

    /// Per-agent observation and action spaces. Stable for the lifetime of
    /// the environment.
    fn spaces(&self) -> Spaces;

    /// Start a new episode; returns initial per-agent observations.
    fn reset(&mut self, options: &ResetOptions) -> Result<BTreeMap<String, Observation>, EnvError>;

    /// Advance the simulation by one step with the given per-agent actions.
    fn step(&mut self, actions: &BTreeMap<String, Action>) -> Result<EnvStep, EnvError>;

    /// Reseed the environment's RNG.
    fn seed(&mut self, value: u64);

    /// Render the current state in the requested mode.
    ///
    /// [`RenderMode::Rgb`] asks for the frame buffer; [`RenderMode::Human`]
    /// asks the engine to display locally and returns `None`. Headless
    /// engines return `None` for every mode.
    fn render(&mut self, mode: RenderMode) -> Option<Frame> {
        let _ = mode;
        None
    }

    /// Release engine resources. Called once, before the worker exits.
    fn close(&mut self) {}

    /// Attribute names readable/writable across the process boundary.
    fn remote_attrs(&self) -> &[&str] {
        &[]
    }

    /// Method names invokable across the process boundary.
    fn remote_methods(&self) -> &[&str] {
        &[]
    }

    /// Read a declared attribute.
    fn get_attr(&self, name: &str) -> Result<serde_json::Value, EnvError> {
        Err(EnvError::UnsupportedAttr(name.into()))
    }

    /// Write a declared attribute.
    fn set_attr(&mut self, name: &str, _value: serde_json::Value) -> Result<(), EnvError> {
        Err(EnvError::UnsupportedAttr(name.into()))
    }

    /// Invoke a declared method.
    fn call_method(
        &mut self,
        name: &str,
        _args: &[serde_json::Value],
        _kwargs: &BTreeMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, EnvError> {
        Err(EnvError::UnsupportedMethod(name.into()))
    }
}

impl std::fmt::Debug for dyn MultiAgentEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiAgentEnv")
            .field("agents", &self.agents())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal env exercising the trait's defaults.
    struct NullEnv;

    impl MultiAgentEnv for NullEnv {
        fn agents(&self) -> Vec<String> {
            vec!["only".into()]
        }

        fn spaces(&self) -> Spaces {
            Spaces::default()
        }

        fn reset(
            &mut self,
            _options: &ResetOptions,
        ) -> Result<BTreeMap<String, Observation>, EnvError> {
            Ok(BTreeMap::new())
        }

        fn step(&mut self, _actions: &BTreeMap<String, Action>) -> Result<EnvStep, EnvError> {
            Ok(EnvStep::default())
        }

        fn seed(&mut self, _value: u64) {}
    }

    #[test]
    fn defaults_reject_reflective_access() {
        let mut env = NullEnv;
        assert!(env.remote_attrs().is_empty());
        assert!(env.remote_methods().is_empty());
        assert!(matches!(
            env.get_attr("difficulty"),
            Err(EnvError::UnsupportedAttr(_))
        ));
        assert!(matches!(
            env.set_attr("difficulty", serde_json::json!(1)),
            Err(EnvError::UnsupportedAttr(_))
        ));
        assert!(matches!(
            env.call_method("dance", &[], &BTreeMap::new()),
            Err(EnvError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn default_render_is_none_in_every_mode() {
        let mut env = NullEnv;
        assert!(env.render(RenderMode::Rgb).is_none());
        assert!(env.render(RenderMode::Human).is_none());
    }

    #[test]
    fn env_is_object_safe() {
        let env: Box<dyn MultiAgentEnv> = Box::new(NullEnv);
        assert_eq!(env.agents(), vec!["only"]);
    }
}
