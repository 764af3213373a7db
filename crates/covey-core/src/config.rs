use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_workers() -> usize {
    1
}
const fn default_step_timeout_ms() -> u64 {
    30_000
}
const fn default_connect_timeout_ms() -> u64 {
    10_000
}
const fn default_close_timeout_ms() -> u64 {
    5_000
}

// ---------------------------------------------------------------------------
// EnvSpec
// ---------------------------------------------------------------------------

/// Serializable environment constructor: a registered name plus parameters.
///
/// This is what crosses the process boundary instead of a factory closure —
/// the worker looks the name up in its registry and builds the environment
/// locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvSpec {
    /// Registered environment name, e.g. `"scripted-v0"`.
    pub name: String,

    /// Engine-specific constructor parameters.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl EnvSpec {
    /// Spec with no parameters.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add one parameter. Returns `self` for chaining.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Integer parameter lookup with a fallback.
    #[must_use]
    pub fn param_u64(&self, key: &str, fallback: u64) -> u64 {
        self.params
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(fallback)
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Experiment configuration: how many workers to spawn, how to seed them,
/// which environment each one hosts, and the coordinator's wait bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of worker processes (default: 1).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Base seed; worker `i` receives `base_seed + i`.
    #[serde(default)]
    pub base_seed: u64,

    /// Bounded wait for one reply during a batch, in milliseconds.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,

    /// Bounded wait for a spawned worker to connect, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bounded wait for worker process exit on close, in milliseconds.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Environment hosted by every worker.
    pub env: EnvSpec,
}

impl RunConfig {
    /// Load and validate a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on IO failure, TOML syntax errors, or invalid
    /// values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.step_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "step_timeout_ms".into(),
                message: "must be > 0".into(),
            });
        }
        if self.env.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "env.name".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// One identical [`EnvSpec`] per worker.
    #[must_use]
    pub fn worker_specs(&self) -> Vec<EnvSpec> {
        vec![self.env.clone(); self.workers]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
