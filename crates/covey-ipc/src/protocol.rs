//! Command/response protocol between the coordinator and one worker.
//!
//! Strict request/response: the coordinator sends a [`Command`], the worker
//! replies with the matching [`Response`] kind or an explicit
//! [`Response::Error`]. The only command without a reply is
//! [`Command::Close`], which is terminal. All messages are length-prefixed
//! JSON (see [`framing`](crate::framing)).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use covey_core::types::{Action, Frame, InfoValue, Observation, RenderMode, ResetOptions, Spaces};

// ---------------------------------------------------------------------------
// ProtocolError
// ---------------------------------------------------------------------------

/// Transport and encoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Expected a {expected} response, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A command from the coordinator to one worker.
///
/// # Example
///
/// ```
/// use covey_ipc::protocol::Command;
///
/// let json = r#"{"type":"seed","value":42}"#;
/// let cmd: Command = serde_json::from_str(json).unwrap();
/// assert!(matches!(cmd, Command::Seed { value: 42 }));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Advance the simulation with per-agent actions (worker-local keys).
    Step { actions: BTreeMap<String, Action> },
    /// Start a new episode.
    Reset {
        #[serde(default)]
        options: ResetOptions,
    },
    /// Reseed the environment RNG.
    Seed { value: u64 },
    /// Render in the given mode; omitting the mode asks for the RGB buffer.
    Render {
        #[serde(default)]
        mode: RenderMode,
    },
    /// Query per-agent observation/action spaces.
    GetSpaces,
    /// Read a declared attribute.
    GetAttr { name: String },
    /// Write a declared attribute.
    SetAttr {
        name: String,
        value: serde_json::Value,
    },
    /// Invoke a declared method.
    EnvMethod {
        name: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
        #[serde(default)]
        kwargs: BTreeMap<String, serde_json::Value>,
    },
    /// Release resources and terminate. Terminal; no reply.
    Close,
}

impl Command {
    /// Wire tag of this command, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Step { .. } => "step",
            Self::Reset { .. } => "reset",
            Self::Seed { .. } => "seed",
            Self::Render { .. } => "render",
            Self::GetSpaces => "get_spaces",
            Self::GetAttr { .. } => "get_attr",
            Self::SetAttr { .. } => "set_attr",
            Self::EnvMethod { .. } => "env_method",
            Self::Close => "close",
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A worker's reply, matching the issuing [`Command`]'s kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Result of a step (worker-local keys).
    Step {
        observations: BTreeMap<String, Observation>,
        rewards: BTreeMap<String, f32>,
        dones: BTreeMap<String, bool>,
        infos: BTreeMap<String, InfoValue>,
    },
    /// Initial observations of the new episode.
    Reset {
        observations: BTreeMap<String, Observation>,
    },
    /// Acknowledgement of a seed command.
    Seeded { value: u64 },
    /// Frame buffer, if the engine renders.
    Frame { frame: Option<Frame> },
    /// Per-agent spaces.
    Spaces { spaces: Spaces },
    /// Attribute value.
    Attr { value: serde_json::Value },
    /// Acknowledgement of an attribute write.
    AttrSet,
    /// Method return value.
    Method { value: serde_json::Value },
    /// Explicit failure; the loop stays alive.
    Error { message: String },
}

impl Response {
    /// Error response from anything displayable.
    #[must_use]
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }

    /// Wire tag of this response, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Step { .. } => "step",
            Self::Reset { .. } => "reset",
            Self::Seeded { .. } => "seeded",
            Self::Frame { .. } => "frame",
            Self::Spaces { .. } => "spaces",
            Self::Attr { .. } => "attr",
            Self::AttrSet => "attr_set",
            Self::Method { .. } => "method",
            Self::Error { .. } => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use covey_core::types::ObservationSpace;

    #[test]
    fn command_step_roundtrip() {
        let mut actions = BTreeMap::new();
        actions.insert("seeker".to_string(), Action::Discrete(2));
        let cmd = Command::Step { actions };
        let json = serde_json::to_string(&cmd).unwrap();
        let cmd2: Command = serde_json::from_str(&json).unwrap();
        if let Command::Step { actions } = cmd2 {
            assert_eq!(actions.get("seeker"), Some(&Action::Discrete(2)));
        } else {
            panic!("expected Step");
        }
    }

    #[test]
    fn command_reset_without_options() {
        let json = r#"{"type":"reset"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        if let Command::Reset { options } = cmd {
            assert_eq!(options, ResetOptions::default());
        } else {
            panic!("expected Reset");
        }
    }

    #[test]
    fn command_env_method_defaults_empty_args() {
        let json = r#"{"type":"env_method","name":"ping"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        if let Command::EnvMethod { name, args, kwargs } = cmd {
            assert_eq!(name, "ping");
            assert!(args.is_empty());
            assert!(kwargs.is_empty());
        } else {
            panic!("expected EnvMethod");
        }
    }

    #[test]
    fn command_close_roundtrip() {
        let cmd = Command::Close;
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("close"));
        let cmd2: Command = serde_json::from_str(&json).unwrap();
        assert!(matches!(cmd2, Command::Close));
    }

    #[test]
    fn command_render_mode_defaults_to_rgb() {
        let json = r#"{"type":"render"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert!(matches!(
            cmd,
            Command::Render {
                mode: RenderMode::Rgb
            }
        ));

        let json = r#"{"type":"render","mode":"human"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert!(matches!(
            cmd,
            Command::Render {
                mode: RenderMode::Human
            }
        ));
    }

    #[test]
    fn command_kinds_cover_all_variants() {
        assert_eq!(
            Command::Render {
                mode: RenderMode::default()
            }
            .kind(),
            "render"
        );
        assert_eq!(Command::GetSpaces.kind(), "get_spaces");
        assert_eq!(Command::Seed { value: 0 }.kind(), "seed");
        assert_eq!(
            Command::GetAttr {
                name: "difficulty".into()
            }
            .kind(),
            "get_attr"
        );
    }

    #[test]
    fn response_step_roundtrip() {
        let mut observations = BTreeMap::new();
        observations.insert("seeker".to_string(), Observation::flat(vec![1.0, 2.0]));
        let mut rewards = BTreeMap::new();
        rewards.insert("seeker".to_string(), 0.5);
        let mut dones = BTreeMap::new();
        dones.insert("seeker".to_string(), false);
        let resp = Response::Step {
            observations,
            rewards,
            dones,
            infos: BTreeMap::new(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let resp2: Response = serde_json::from_str(&json).unwrap();
        if let Response::Step {
            observations,
            rewards,
            dones,
            ..
        } = resp2
        {
            assert_eq!(
                observations.get("seeker"),
                Some(&Observation::flat(vec![1.0, 2.0]))
            );
            assert!((rewards["seeker"] - 0.5).abs() < f32::EPSILON);
            assert!(!dones["seeker"]);
        } else {
            panic!("expected Step");
        }
    }

    #[test]
    fn response_spaces_roundtrip() {
        let mut spaces = Spaces::default();
        spaces.observation.insert(
            "seeker".into(),
            ObservationSpace::Box {
                low: vec![-1.0; 2],
                high: vec![1.0; 2],
            },
        );
        let resp = Response::Spaces { spaces };
        let json = serde_json::to_string(&resp).unwrap();
        let resp2: Response = serde_json::from_str(&json).unwrap();
        if let Response::Spaces { spaces } = resp2 {
            assert_eq!(spaces.observation["seeker"].size(), 2);
        } else {
            panic!("expected Spaces");
        }
    }

    #[test]
    fn response_error_constructor() {
        let resp = Response::error("engine exploded");
        if let Response::Error { message } = &resp {
            assert_eq!(message, "engine exploded");
        } else {
            panic!("expected Error");
        }
        assert_eq!(resp.kind(), "error");
    }

    #[test]
    fn response_frame_none_roundtrip() {
        let resp = Response::Frame { frame: None };
        let json = serde_json::to_string(&resp).unwrap();
        let resp2: Response = serde_json::from_str(&json).unwrap();
        assert!(matches!(resp2, Response::Frame { frame: None }));
    }

    #[test]
    fn unexpected_response_error_display() {
        let err = ProtocolError::UnexpectedResponse {
            expected: "step",
            got: "reset",
        };
        assert_eq!(err.to_string(), "Expected a step response, got reset");
    }
}
