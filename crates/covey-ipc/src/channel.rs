//! Per-worker process handle and message channel.
//!
//! A [`WorkerHandle`] owns exactly one worker: its process handle (when
//! spawned rather than attached) and the loopback TCP connection carrying
//! framed [`Command`]/[`Response`] messages. The coordinator is the only
//! holder of a handle; workers never talk to each other.
//!
//! Spawning follows a fixed invocation contract: the worker program is
//! launched as
//!
//! ```text
//! <program> [extra_args..] worker --connect <addr> --worker-id <i> \
//!     --spec <env-spec-json> --seed <seed>
//! ```
//!
//! and must connect back to `<addr>` within the configured bound. Every
//! receive is bounded: a timeout yields [`ChannelError::Unresponsive`], a
//! closed socket or dead process yields [`ChannelError::Lost`].

use std::io::ErrorKind;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use covey_core::config::EnvSpec;

use crate::framing::{read_frame, write_frame};
use crate::protocol::{Command, ProtocolError, Response};

// ---------------------------------------------------------------------------
// ChannelError
// ---------------------------------------------------------------------------

/// Failure modes of one worker channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The socket closed or the process died while a reply was pending.
    #[error("Worker channel lost: {detail}")]
    Lost { detail: String },

    /// No reply arrived within the bounded wait.
    #[error("Worker unresponsive after {waited:?}")]
    Unresponsive { waited: Duration },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ChannelError {
    fn lost(detail: impl std::fmt::Display) -> Self {
        Self::Lost {
            detail: detail.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// LaunchOptions
// ---------------------------------------------------------------------------

/// How to launch workers and how long to wait on them.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Worker executable implementing the invocation contract.
    pub program: PathBuf,
    /// Arguments inserted before the `worker` subcommand.
    pub extra_args: Vec<String>,
    /// Bound on waiting for a spawned worker to connect back.
    pub connect_timeout: Duration,
    /// Bound on waiting for any single reply.
    pub step_timeout: Duration,
    /// Bound on waiting for process exit at close, before killing.
    pub close_timeout: Duration,
}

impl LaunchOptions {
    /// Options with default bounds for the given worker program.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            step_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerHandle
// ---------------------------------------------------------------------------

/// One worker process plus its exclusively-owned channel endpoint.
#[derive(Debug)]
pub struct WorkerHandle {
    index: usize,
    stream: TcpStream,
    child: Option<Child>,
    step_timeout: Duration,
    alive: bool,
}

impl WorkerHandle {
    /// Spawn a worker process hosting `spec` and wait for it to connect.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot be bound, the process cannot be spawned,
    /// or the worker does not connect within `options.connect_timeout`.
    pub fn spawn(
        index: usize,
        spec: &EnvSpec,
        seed: u64,
        options: &LaunchOptions,
    ) -> Result<Self, ChannelError> {
        let listener = TcpListener::bind("127.0.0.1:0").map_err(ProtocolError::Io)?;
        let addr = listener.local_addr().map_err(ProtocolError::Io)?;
        let spec_json = serde_json::to_string(spec).map_err(ProtocolError::Json)?;

        let child = ProcessCommand::new(&options.program)
            .args(&options.extra_args)
            .arg("worker")
            .arg("--connect")
            .arg(addr.to_string())
            .arg("--worker-id")
            .arg(index.to_string())
            .arg("--spec")
            .arg(&spec_json)
            .arg("--seed")
            .arg(seed.to_string())
            .stdin(Stdio::null())
            .spawn()
            .map_err(ProtocolError::Io)?;
        debug!(worker = index, pid = child.id(), %addr, "spawned worker");

        let stream = accept_with_deadline(&listener, options.connect_timeout)?;
        Self::configure(index, stream, Some(child), options.step_timeout)
    }

    /// Wrap an already-connected stream from an externally launched worker.
    ///
    /// The handle owns no process; `close` only shuts the channel down.
    pub fn attach(
        index: usize,
        stream: TcpStream,
        step_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        Self::configure(index, stream, None, step_timeout)
    }

    fn configure(
        index: usize,
        stream: TcpStream,
        child: Option<Child>,
        step_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        stream.set_nodelay(true).map_err(ProtocolError::Io)?;
        stream
            .set_read_timeout(Some(step_timeout))
            .map_err(ProtocolError::Io)?;
        Ok(Self {
            index,
            stream,
            child,
            step_timeout,
            alive: true,
        })
    }

    /// Worker index this handle was created with.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Whether the channel is still believed usable.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }

    /// Mark the worker dead after a lost channel.
    pub fn mark_lost(&mut self) {
        self.alive = false;
    }

    /// Send one command without waiting for a reply.
    pub fn send(&mut self, command: &Command) -> Result<(), ChannelError> {
        match write_frame(&mut self.stream, command) {
            Ok(()) => Ok(()),
            Err(ProtocolError::Io(e)) => {
                self.alive = false;
                Err(ChannelError::lost(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Receive one reply, bounded by the configured step timeout.
    pub fn recv(&mut self) -> Result<Response, ChannelError> {
        let started = Instant::now();
        match read_frame::<Response>(&mut self.stream) {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                self.alive = false;
                Err(ChannelError::lost("channel closed by worker"))
            }
            Err(ProtocolError::Io(e))
                if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock =>
            {
                Err(ChannelError::Unresponsive {
                    waited: started.elapsed().max(self.step_timeout),
                })
            }
            Err(ProtocolError::Io(e)) => {
                self.alive = false;
                Err(ChannelError::lost(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send a command and wait for its reply.
    pub fn request(&mut self, command: &Command) -> Result<Response, ChannelError> {
        self.send(command)?;
        self.recv()
    }

    /// Send `Close`, shut the channel down, and reap the process.
    ///
    /// Waits up to `deadline` for a spawned process to exit, then escalates
    /// to a kill. Best-effort: IO failures here are expected when the worker
    /// is already gone.
    pub fn shutdown(&mut self, deadline: Duration) {
        if self.alive {
            let _ = self.send(&Command::Close);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(child) = self.child.as_mut() {
            if !wait_with_deadline(child, deadline) {
                warn!(worker = self.index, "worker did not exit in time, killing");
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        self.alive = false;
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Worker-side: connect back to the coordinator's listener.
pub fn connect(addr: &str) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn accept_with_deadline(
    listener: &TcpListener,
    timeout: Duration,
) -> Result<TcpStream, ChannelError> {
    listener.set_nonblocking(true).map_err(ProtocolError::Io)?;
    let started = Instant::now();
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false).map_err(ProtocolError::Io)?;
                return Ok(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if started.elapsed() >= timeout {
                    return Err(ChannelError::Unresponsive {
                        waited: started.elapsed(),
                    });
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => return Err(ProtocolError::Io(e).into()),
        }
    }
}

fn wait_with_deadline(child: &mut Child, deadline: Duration) -> bool {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_status)) => return true,
            Ok(None) => {
                if started.elapsed() >= deadline {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(_) => return false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
