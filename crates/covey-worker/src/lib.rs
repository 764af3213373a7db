//! Worker-side half of the Covey runtime.
//!
//! A worker process hosts exactly one environment and speaks the framed
//! command protocol over a loopback connection back to the coordinator:
//!
//! - [`registry`] — name-to-constructor table; the coordinator ships an
//!   [`EnvSpec`](covey_core::config::EnvSpec) and the worker builds the
//!   environment locally
//! - [`service`] — the blocking receive loop: one command in, one reply out,
//!   environment failures answered with explicit error replies
//!
//! Reflective access (`get_attr`/`set_attr`/`env_method`) is gated on the
//! allow-lists the environment declares; undeclared names are refused before
//! the environment is consulted.

pub mod registry;
pub mod service;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use registry::{Constructor, Registry};
pub use service::{run, serve, WorkerError};
