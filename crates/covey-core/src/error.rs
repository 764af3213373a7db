use thiserror::Error;

/// Top-level error type for covey-core.
#[derive(Debug, Error)]
pub enum CoveyError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment error: {0}")]
    Env(#[from] EnvError),
}

/// Composite agent key errors. Local programmer errors, surfaced immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("Empty base name in agent key")]
    EmptyBase,

    #[error("Reserved character ('&' or '=') in {text:?}")]
    ReservedChar { text: String },

    #[error("Malformed key token {token:?} (expected field=value)")]
    MalformedToken { token: String },

    #[error("Key {key:?} carries no env field")]
    MissingEnv { key: String },

    #[error("Key {key:?} has non-numeric env index {value:?}")]
    BadEnvIndex { key: String, value: String },

    #[error("Key {key:?} already carries an env field")]
    DuplicateEnv { key: String },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("workers must be >= 1")]
    NoWorkers,

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors raised by a wrapped environment. Workers convert these into
/// explicit error replies rather than crashing the receive loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("Reset failed: {0}")]
    ResetFailed(String),

    #[error("Step failed: {0}")]
    StepFailed(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("No environment registered under {0:?}")]
    UnknownEnv(String),

    #[error("Attribute {0:?} is not remotely accessible")]
    UnsupportedAttr(String),

    #[error("Method {0:?} is not remotely invokable")]
    UnsupportedMethod(String),

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
