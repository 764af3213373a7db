//! Environment registry.
//!
//! Factory closures cannot cross a process boundary, so construction is
//! data-driven instead: the coordinator sends an [`EnvSpec`] naming a
//! registered constructor, and the worker resolves it here. Both sides must
//! link the same registrations for a spec to be buildable.

use std::collections::BTreeMap;

use covey_core::config::EnvSpec;
use covey_core::env::MultiAgentEnv;
use covey_core::error::EnvError;

/// Builds one environment instance from its spec parameters.
pub type Constructor = fn(&EnvSpec) -> Result<Box<dyn MultiAgentEnv>, EnvError>;

/// Name-to-constructor table consulted once per worker at startup.
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<String, Constructor>,
}

impl Registry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name`. A later registration under the
    /// same name replaces the earlier one.
    pub fn register(&mut self, name: impl Into<String>, constructor: Constructor) {
        self.entries.insert(name.into(), constructor);
    }

    /// Whether `name` has a registered constructor.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Build the environment `spec` names.
    ///
    /// # Errors
    ///
    /// [`EnvError::UnknownEnv`] when no constructor is registered under
    /// `spec.name`; otherwise whatever the constructor reports.
    pub fn build(&self, spec: &EnvSpec) -> Result<Box<dyn MultiAgentEnv>, EnvError> {
        let constructor = self
            .entries
            .get(&spec.name)
            .ok_or_else(|| EnvError::UnknownEnv(spec.name.clone()))?;
        constructor(spec)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use covey_core::types::{Action, Observation, ResetOptions, Spaces};
    use std::collections::BTreeMap;

    struct StubEnv {
        size: u64,
    }

    impl MultiAgentEnv for StubEnv {
        fn agents(&self) -> Vec<String> {
            vec!["solo".into()]
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

        fn step(
            &mut self,
            _actions: &BTreeMap<String, Action>,
        ) -> Result<covey_core::env::EnvStep, EnvError> {
            Ok(covey_core::env::EnvStep::default())
        }

        fn seed(&mut self, _value: u64) {}

        fn get_attr(&self, name: &str) -> Result<serde_json::Value, EnvError> {
            match name {
                "size" => Ok(serde_json::json!(self.size)),
                other => Err(EnvError::UnsupportedAttr(other.into())),
            }
        }
    }

    fn stub(spec: &EnvSpec) -> Result<Box<dyn MultiAgentEnv>, EnvError> {
        Ok(Box::new(StubEnv {
            size: spec.param_u64("size", 1),
        }))
    }

    #[test]
    fn build_resolves_registered_name() {
        let mut registry = Registry::new();
        registry.register("stub-v0", stub);
        assert!(registry.contains("stub-v0"));

        let spec = EnvSpec::named("stub-v0").with_param("size", 8);
        let env = registry.build(&spec).unwrap();
        assert_eq!(env.get_attr("size").unwrap(), serde_json::json!(8));
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = Registry::new();
        let err = registry.build(&EnvSpec::named("maze-v9")).unwrap_err();
        assert!(matches!(err, EnvError::UnknownEnv(name) if name == "maze-v9"));
    }

    #[test]
    fn later_registration_replaces_earlier() {
        fn failing(_spec: &EnvSpec) -> Result<Box<dyn MultiAgentEnv>, EnvError> {
            Err(EnvError::Other("always fails".into()))
        }

        let mut registry = Registry::new();
        registry.register("stub-v0", failing);
        registry.register("stub-v0", stub);
        assert!(registry.build(&EnvSpec::named("stub-v0")).is_ok());
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = Registry::new();
        registry.register("zeta-v0", stub);
        registry.register("alpha-v0", stub);
        assert_eq!(registry.names(), vec!["alpha-v0", "zeta-v0"]);
    }
}
