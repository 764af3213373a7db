//! Vectorized environment coordination.
//!
//! One [`VecCoordinator`] drives N worker processes, each hosting one
//! environment instance, over per-worker channels:
//!
//! - [`coordinator`] — dispatch-then-collect batching: every worker gets its
//!   sub-batch before any reply is read, replies are collected in worker
//!   index order, and every wait is bounded
//! - [`restack`] — key-suffixed flat batches regrouped into agent-major
//!   matrices ([`BatchedEnv`] wraps a coordinator behind that view)
//!
//! Agent keys leaving the coordinator carry an `&env=<worker>` suffix so the
//! same simulation-local name from different workers stays distinguishable;
//! incoming action keys carry the same suffix and are routed by it.

pub mod coordinator;
pub mod restack;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use coordinator::{CoordinatorError, StepBatch, VecCoordinator};
pub use restack::{
    restack_observations, restack_step, unstack_actions, AgentBatch, BatchedEnv,
    BatchedObservation, RestackError,
};
