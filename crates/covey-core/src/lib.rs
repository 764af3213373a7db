// covey-core: Types, agent key namespace, config, seeding and errors for Covey.

pub mod config;
pub mod env;
pub mod error;
pub mod key;
pub mod seed;
pub mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use config::{EnvSpec, RunConfig};
pub use env::{EnvStep, MultiAgentEnv};
pub use error::{ConfigError, CoveyError, EnvError, KeyError};
pub use key::{attach_env, strip_env, AgentKey, ENV_FIELD};
pub use types::{
    Action, ActionSpace, Frame, InfoValue, Observation, ObservationSpace, RenderMode, ResetOptions,
    Spaces,
};

pub mod prelude {
    pub use crate::config::{EnvSpec, RunConfig};
    pub use crate::env::{EnvStep, MultiAgentEnv};
    pub use crate::error::{ConfigError, CoveyError, EnvError, KeyError};
    pub use crate::key::{attach_env, strip_env, AgentKey, ENV_FIELD};
    pub use crate::types::{
        Action, ActionSpace, Frame, InfoValue, Observation, ObservationSpace, RenderMode,
        ResetOptions, Spaces,
    };
}
