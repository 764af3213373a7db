//! Worker command service loop.
//!
//! [`serve`] runs the blocking receive loop over an established stream: one
//! [`Command`] in, one [`Response`] out, in order. Environment failures never
//! kill the loop; they come back as [`Response::Error`] and the next command
//! is served. The loop ends on [`Command::Close`] (no reply, by contract) or
//! on a clean EOF from the coordinator.
//!
//! [`run`] is the full worker lifecycle used by the binary: connect back to
//! the coordinator, build the environment from its spec, seed it, serve.

use std::io::{Read, Write};

use thiserror::Error;
use tracing::{debug, info, warn};

use covey_core::config::EnvSpec;
use covey_core::env::MultiAgentEnv;
use covey_core::error::EnvError;
use covey_ipc::channel::connect;
use covey_ipc::framing::{read_frame, write_frame};
use covey_ipc::protocol::{Command, ProtocolError, Response};

use crate::registry::Registry;

// ---------------------------------------------------------------------------
// WorkerError
// ---------------------------------------------------------------------------

/// Fatal worker failures: anything the loop cannot answer with an error
/// reply.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to build environment: {0}")]
    Build(#[from] EnvError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

/// Serve commands from `stream` against `env` until `Close` or EOF.
///
/// # Errors
///
/// Only transport failures are fatal; environment errors are answered on the
/// wire and the loop continues.
pub fn serve<S: Read + Write>(
    stream: &mut S,
    env: &mut dyn MultiAgentEnv,
) -> Result<(), WorkerError> {
    loop {
        let Some(command) = read_frame::<Command>(stream)? else {
            debug!("coordinator closed the channel, shutting down");
            env.close();
            return Ok(());
        };

        if matches!(command, Command::Close) {
            debug!("close received, shutting down");
            env.close();
            return Ok(());
        }

        let response = dispatch(env, command);
        write_frame(stream, &response)?;
    }
}

/// Map one command to its reply. Environment errors become error replies.
fn dispatch(env: &mut dyn MultiAgentEnv, command: Command) -> Response {
    match command {
        Command::Step { actions } => match env.step(&actions) {
            Ok(step) => Response::Step {
                observations: step.observations,
                rewards: step.rewards,
                dones: step.dones,
                infos: step.infos,
            },
            Err(e) => Response::error(e),
        },
        Command::Reset { options } => match env.reset(&options) {
            Ok(observations) => Response::Reset { observations },
            Err(e) => Response::error(e),
        },
        Command::Seed { value } => {
            env.seed(value);
            Response::Seeded { value }
        }
        Command::Render { mode } => Response::Frame {
            frame: env.render(mode),
        },
        Command::GetSpaces => Response::Spaces {
            spaces: env.spaces(),
        },
        Command::GetAttr { name } => {
            if !env.remote_attrs().contains(&name.as_str()) {
                return Response::error(EnvError::UnsupportedAttr(name));
            }
            match env.get_attr(&name) {
                Ok(value) => Response::Attr { value },
                Err(e) => Response::error(e),
            }
        }
        Command::SetAttr { name, value } => {
            if !env.remote_attrs().contains(&name.as_str()) {
                return Response::error(EnvError::UnsupportedAttr(name));
            }
            match env.set_attr(&name, value) {
                Ok(()) => Response::AttrSet,
                Err(e) => Response::error(e),
            }
        }
        Command::EnvMethod { name, args, kwargs } => {
            if !env.remote_methods().contains(&name.as_str()) {
                return Response::error(EnvError::UnsupportedMethod(name));
            }
            match env.call_method(&name, &args, &kwargs) {
                Ok(value) => Response::Method { value },
                Err(e) => Response::error(e),
            }
        }
        // Handled before dispatch; unreachable by construction.
        Command::Close => Response::error("close carries no reply"),
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Full worker lifecycle: connect, build, seed, serve.
///
/// # Errors
///
/// Fails if the connection cannot be established, the spec names an
/// unregistered environment, or the transport breaks mid-session.
pub fn run(
    addr: &str,
    worker_id: usize,
    spec: &EnvSpec,
    seed: u64,
    registry: &Registry,
) -> Result<(), WorkerError> {
    info!(worker = worker_id, env = %spec.name, seed, "worker starting");
    let mut stream = connect(addr).map_err(ProtocolError::Io)?;

    let mut env = registry.build(spec).map_err(|e| {
        warn!(worker = worker_id, error = %e, "environment construction failed");
        e
    })?;
    env.seed(seed);

    let result = serve(&mut stream, env.as_mut());
    info!(worker = worker_id, "worker exiting");
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
