//! Multi-worker coordinator.
//!
//! [`VecCoordinator`] owns N worker channels and presents them as one
//! batched environment. Batch calls are dispatch-then-collect: the sub-batch
//! for every worker is sent before any reply is read, then replies are
//! collected in worker index order. A slow worker therefore delays only the
//! collect phase, never the dispatch to its peers, and results land in a
//! deterministic order regardless of completion timing.
//!
//! At most one step batch is in flight at a time.
//! [`step_async`](VecCoordinator::step_async) marks every worker pending;
//! [`step_wait`](VecCoordinator::step_wait) clears each worker as its reply
//! arrives, so [`close`](VecCoordinator::close) can drain what is still owed
//! before shutting the channels down.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use covey_core::config::EnvSpec;
use covey_core::error::KeyError;
use covey_core::key::{attach_env, strip_env};
use covey_core::seed::worker_seed;
use covey_core::types::{
    Action, ActionSpace, Frame, InfoValue, Observation, ObservationSpace, RenderMode,
    ResetOptions, Spaces,
};
use covey_ipc::channel::{ChannelError, LaunchOptions, WorkerHandle};
use covey_ipc::protocol::{Command, ProtocolError, Response};

use crate::restack::RestackError;

// ---------------------------------------------------------------------------
// CoordinatorError
// ---------------------------------------------------------------------------

/// Failures of the batched surface.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A worker's channel closed or its process died.
    #[error("Worker {worker} lost: {detail}")]
    WorkerLost { worker: usize, detail: String },

    /// A worker produced no reply within the bounded wait.
    #[error("Worker {worker} unresponsive after {waited:?}")]
    WorkerUnresponsive { worker: usize, waited: Duration },

    /// A worker's spaces disagree with worker 0's.
    #[error("Worker {worker} space mismatch for agent {agent:?}: {detail}")]
    SpaceMismatch {
        worker: usize,
        agent: String,
        detail: String,
    },

    /// The coordinator was already closed.
    #[error("Coordinator is closed")]
    Closed,

    /// A step batch is in flight, or a failed batch still owes replies.
    #[error("A step batch is in flight or replies are still owed")]
    Busy,

    /// `step_wait` without a matching `step_async`.
    #[error("No step batch is in flight")]
    NoPendingBatch,

    /// An action key routed to a worker index that does not exist.
    #[error("No worker with index {worker} (have {workers})")]
    UnknownWorker { worker: usize, workers: usize },

    /// A worker answered with an explicit error reply.
    #[error("Worker {worker} reported: {message}")]
    Worker { worker: usize, message: String },

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Restack(#[from] RestackError),
}

fn channel_error(worker: usize, error: ChannelError) -> CoordinatorError {
    match error {
        ChannelError::Lost { detail } => CoordinatorError::WorkerLost { worker, detail },
        ChannelError::Unresponsive { waited } => {
            CoordinatorError::WorkerUnresponsive { worker, waited }
        }
        ChannelError::Protocol(p) => CoordinatorError::Protocol(p),
    }
}

// ---------------------------------------------------------------------------
// StepBatch
// ---------------------------------------------------------------------------

/// One collected step across all workers, keyed by env-suffixed agent keys.
#[derive(Debug, Clone, Default)]
pub struct StepBatch {
    pub observations: BTreeMap<String, Observation>,
    pub rewards: BTreeMap<String, f32>,
    pub dones: BTreeMap<String, bool>,
    pub infos: BTreeMap<String, InfoValue>,
}

// ---------------------------------------------------------------------------
// VecCoordinator
// ---------------------------------------------------------------------------

/// N worker processes behind one batched request/response surface.
#[derive(Debug)]
pub struct VecCoordinator {
    workers: Vec<WorkerHandle>,
    spaces: Spaces,
    close_timeout: Duration,
    /// Per-worker flag: a reply is still owed from the last dispatch.
    pending: Vec<bool>,
    waiting: bool,
    closed: bool,
}

impl VecCoordinator {
    /// Spawn one worker per spec and validate their spaces.
    ///
    /// Worker `i` is seeded with `base_seed + i`. Construction fails fast on
    /// any spawn failure or on the first space disagreement; workers spawned
    /// so far are shut down before the error is returned.
    pub fn spawn(
        specs: &[EnvSpec],
        options: &LaunchOptions,
        base_seed: u64,
    ) -> Result<Self, CoordinatorError> {
        let mut workers = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            match WorkerHandle::spawn(index, spec, worker_seed(base_seed, index), options) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown_all(&mut workers, options.close_timeout);
                    return Err(channel_error(index, e));
                }
            }
        }
        info!(workers = workers.len(), "workers spawned");
        Self::from_handles(workers, options.close_timeout)
    }

    /// Build a coordinator over already-connected workers.
    ///
    /// Queries every worker's spaces (dispatch-then-collect) and requires
    /// them to agree with worker 0's before any batch is accepted.
    pub fn from_handles(
        mut workers: Vec<WorkerHandle>,
        close_timeout: Duration,
    ) -> Result<Self, CoordinatorError> {
        let spaces = match query_spaces(&mut workers) {
            Ok(spaces) => spaces,
            Err(e) => {
                shutdown_all(&mut workers, close_timeout);
                return Err(e);
            }
        };
        let count = workers.len();
        Ok(Self {
            workers,
            spaces,
            close_timeout,
            pending: vec![false; count],
            waiting: false,
            closed: false,
        })
    }

    /// Number of workers.
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// The shared per-agent spaces (worker-local keys).
    #[must_use]
    pub const fn spaces(&self) -> &Spaces {
        &self.spaces
    }

    /// Per-agent observation spaces, identical on every worker.
    #[must_use]
    pub const fn observation_spaces(&self) -> &BTreeMap<String, ObservationSpace> {
        &self.spaces.observation
    }

    /// Per-agent action spaces, identical on every worker.
    #[must_use]
    pub const fn action_spaces(&self) -> &BTreeMap<String, ActionSpace> {
        &self.spaces.action
    }

    /// Worker-local agent names, identical on every worker.
    #[must_use]
    pub fn agents(&self) -> Vec<String> {
        self.spaces.agents()
    }

    fn ensure_open(&self) -> Result<(), CoordinatorError> {
        if self.closed {
            return Err(CoordinatorError::Closed);
        }
        Ok(())
    }

    /// Open and with no batch in flight: required by every command that
    /// expects its replies to pair up with its sends.
    ///
    /// A reply still owed from a failed batch also counts as busy — reading
    /// it as part of a later request would hand the caller a stale row.
    fn ensure_idle(&self) -> Result<(), CoordinatorError> {
        self.ensure_open()?;
        if self.waiting || self.pending.iter().any(|&owed| owed) {
            return Err(CoordinatorError::Busy);
        }
        Ok(())
    }

    /// Discard replies still owed so later requests pair up again.
    ///
    /// A slot stays owed only when its reply may yet arrive (the worker is
    /// alive but timed out); those keep the coordinator busy until `close`.
    fn drain_pending(&mut self) {
        for worker in 0..self.workers.len() {
            if !self.pending[worker] {
                continue;
            }
            if !self.workers[worker].is_alive() {
                self.pending[worker] = false;
                continue;
            }
            match self.workers[worker].recv() {
                Ok(_) | Err(ChannelError::Lost { .. }) => self.pending[worker] = false,
                Err(ChannelError::Unresponsive { .. } | ChannelError::Protocol(_)) => {}
            }
        }
    }

    // ---- Step ----

    /// Dispatch one step batch and collect all replies.
    pub fn step(
        &mut self,
        actions: &BTreeMap<String, Action>,
    ) -> Result<StepBatch, CoordinatorError> {
        self.step_async(actions)?;
        self.step_wait()
    }

    /// Dispatch a step batch without collecting.
    ///
    /// Action keys must carry an `&env=<worker>` suffix; each worker receives
    /// its sub-batch under worker-local keys. Every worker is stepped, even
    /// those with an empty sub-batch, so replies stay aligned with workers.
    pub fn step_async(
        &mut self,
        actions: &BTreeMap<String, Action>,
    ) -> Result<(), CoordinatorError> {
        self.ensure_idle()?;

        let mut per_worker: Vec<BTreeMap<String, Action>> =
            vec![BTreeMap::new(); self.workers.len()];
        for (key, action) in actions {
            let (local, worker) = strip_env(key)?;
            let sub = per_worker
                .get_mut(worker)
                .ok_or(CoordinatorError::UnknownWorker {
                    worker,
                    workers: self.workers.len(),
                })?;
            sub.insert(local, action.clone());
        }

        for (worker, sub) in per_worker.into_iter().enumerate() {
            let handle = &mut self.workers[worker];
            handle
                .send(&Command::Step { actions: sub })
                .map_err(|e| channel_error(worker, e))?;
            self.pending[worker] = true;
        }
        self.waiting = true;
        debug!(actions = actions.len(), "step batch dispatched");
        Ok(())
    }

    /// Collect the in-flight step batch, in worker index order.
    ///
    /// Each worker's pending flag clears as its reply arrives. A worker error
    /// reply fails the whole batch; the peers' already-queued replies are
    /// drained before returning, so the coordinator is idle again and the
    /// next batch pairs each worker with its own reply. A timed-out reply
    /// cannot be drained and leaves the coordinator busy until `close`.
    pub fn step_wait(&mut self) -> Result<StepBatch, CoordinatorError> {
        self.ensure_open()?;
        if !self.waiting {
            return Err(CoordinatorError::NoPendingBatch);
        }
        self.waiting = false;

        let mut batch = StepBatch::default();
        for worker in 0..self.workers.len() {
            if !self.pending[worker] {
                continue;
            }
            let response = match self.workers[worker].recv() {
                Ok(response) => {
                    self.pending[worker] = false;
                    response
                }
                Err(e @ ChannelError::Lost { .. }) => {
                    // Nothing will ever arrive on this channel.
                    self.pending[worker] = false;
                    return Err(channel_error(worker, e));
                }
                Err(e) => return Err(channel_error(worker, e)),
            };
            if let Err(e) = merge_step(&mut batch, worker, response) {
                // The error kills this batch; the peers' replies still sit in
                // their sockets. Read them off now so the next request does
                // not pair up with a leftover row.
                self.drain_pending();
                return Err(e);
            }
        }
        Ok(batch)
    }

    // ---- Episode control ----

    /// Reset every worker; returns env-suffixed initial observations.
    pub fn reset(
        &mut self,
        options: &ResetOptions,
    ) -> Result<BTreeMap<String, Observation>, CoordinatorError> {
        self.ensure_idle()?;

        for (worker, handle) in self.workers.iter_mut().enumerate() {
            handle
                .send(&Command::Reset {
                    options: options.clone(),
                })
                .map_err(|e| channel_error(worker, e))?;
        }

        let mut all = BTreeMap::new();
        for worker in 0..self.workers.len() {
            let response = self.workers[worker]
                .recv()
                .map_err(|e| channel_error(worker, e))?;
            match response {
                Response::Reset { observations } => {
                    for (key, obs) in observations {
                        all.insert(attach_env(&key, worker)?, obs);
                    }
                }
                Response::Error { message } => {
                    return Err(CoordinatorError::Worker { worker, message });
                }
                other => {
                    return Err(ProtocolError::UnexpectedResponse {
                        expected: "reset",
                        got: other.kind(),
                    }
                    .into());
                }
            }
        }
        Ok(all)
    }

    /// Reseed worker `i` with `base + i`.
    pub fn seed(&mut self, base: u64) -> Result<(), CoordinatorError> {
        self.ensure_idle()?;
        for (worker, handle) in self.workers.iter_mut().enumerate() {
            handle
                .send(&Command::Seed {
                    value: worker_seed(base, worker),
                })
                .map_err(|e| channel_error(worker, e))?;
        }
        for worker in 0..self.workers.len() {
            let response = self.workers[worker]
                .recv()
                .map_err(|e| channel_error(worker, e))?;
            match response {
                Response::Seeded { .. } => {}
                Response::Error { message } => {
                    return Err(CoordinatorError::Worker { worker, message });
                }
                other => {
                    return Err(ProtocolError::UnexpectedResponse {
                        expected: "seeded",
                        got: other.kind(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Render every worker in the given mode. One slot per worker, `None`
    /// where no frame comes back.
    pub fn render(&mut self, mode: RenderMode) -> Result<Vec<Option<Frame>>, CoordinatorError> {
        self.ensure_idle()?;
        for (worker, handle) in self.workers.iter_mut().enumerate() {
            handle
                .send(&Command::Render { mode })
                .map_err(|e| channel_error(worker, e))?;
        }
        let mut frames = Vec::with_capacity(self.workers.len());
        for worker in 0..self.workers.len() {
            let response = self.workers[worker]
                .recv()
                .map_err(|e| channel_error(worker, e))?;
            match response {
                Response::Frame { frame } => frames.push(frame),
                Response::Error { message } => {
                    return Err(CoordinatorError::Worker { worker, message });
                }
                other => {
                    return Err(ProtocolError::UnexpectedResponse {
                        expected: "frame",
                        got: other.kind(),
                    }
                    .into());
                }
            }
        }
        Ok(frames)
    }

    /// RGB frame buffers from every worker; `None` where the engine does not
    /// render.
    pub fn get_images(&mut self) -> Result<Vec<Option<Frame>>, CoordinatorError> {
        self.render(RenderMode::Rgb)
    }

    // ---- Reflection ----

    /// Read a declared attribute from the targeted workers (all by default).
    /// Values come back in target order.
    pub fn get_attr(
        &mut self,
        name: &str,
        indices: Option<&[usize]>,
    ) -> Result<Vec<serde_json::Value>, CoordinatorError> {
        let targets = self.targets(indices)?;
        for &worker in &targets {
            self.workers[worker]
                .send(&Command::GetAttr { name: name.into() })
                .map_err(|e| channel_error(worker, e))?;
        }
        let mut values = Vec::with_capacity(targets.len());
        for &worker in &targets {
            match self.workers[worker]
                .recv()
                .map_err(|e| channel_error(worker, e))?
            {
                Response::Attr { value } => values.push(value),
                Response::Error { message } => {
                    return Err(CoordinatorError::Worker { worker, message });
                }
                other => {
                    return Err(ProtocolError::UnexpectedResponse {
                        expected: "attr",
                        got: other.kind(),
                    }
                    .into());
                }
            }
        }
        Ok(values)
    }

    /// Write a declared attribute on the targeted workers (all by default).
    pub fn set_attr(
        &mut self,
        name: &str,
        value: &serde_json::Value,
        indices: Option<&[usize]>,
    ) -> Result<(), CoordinatorError> {
        let targets = self.targets(indices)?;
        for &worker in &targets {
            self.workers[worker]
                .send(&Command::SetAttr {
                    name: name.into(),
                    value: value.clone(),
                })
                .map_err(|e| channel_error(worker, e))?;
        }
        for &worker in &targets {
            match self.workers[worker]
                .recv()
                .map_err(|e| channel_error(worker, e))?
            {
                Response::AttrSet => {}
                Response::Error { message } => {
                    return Err(CoordinatorError::Worker { worker, message });
                }
                other => {
                    return Err(ProtocolError::UnexpectedResponse {
                        expected: "attr_set",
                        got: other.kind(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Invoke a declared method on the targeted workers (all by default).
    /// Return values come back in target order.
    pub fn env_method(
        &mut self,
        name: &str,
        args: &[serde_json::Value],
        kwargs: &BTreeMap<String, serde_json::Value>,
        indices: Option<&[usize]>,
    ) -> Result<Vec<serde_json::Value>, CoordinatorError> {
        let targets = self.targets(indices)?;
        for &worker in &targets {
            self.workers[worker]
                .send(&Command::EnvMethod {
                    name: name.into(),
                    args: args.to_vec(),
                    kwargs: kwargs.clone(),
                })
                .map_err(|e| channel_error(worker, e))?;
        }
        let mut values = Vec::with_capacity(targets.len());
        for &worker in &targets {
            match self.workers[worker]
                .recv()
                .map_err(|e| channel_error(worker, e))?
            {
                Response::Method { value } => values.push(value),
                Response::Error { message } => {
                    return Err(CoordinatorError::Worker { worker, message });
                }
                other => {
                    return Err(ProtocolError::UnexpectedResponse {
                        expected: "method",
                        got: other.kind(),
                    }
                    .into());
                }
            }
        }
        Ok(values)
    }

    fn targets(&self, indices: Option<&[usize]>) -> Result<Vec<usize>, CoordinatorError> {
        self.ensure_idle()?;
        match indices {
            None => Ok((0..self.workers.len()).collect()),
            Some(picked) => {
                for &worker in picked {
                    if worker >= self.workers.len() {
                        return Err(CoordinatorError::UnknownWorker {
                            worker,
                            workers: self.workers.len(),
                        });
                    }
                }
                Ok(picked.to_vec())
            }
        }
    }

    // ---- Shutdown ----

    /// Shut every worker down. Idempotent and best-effort.
    ///
    /// Replies still owed from an interrupted batch are drained first so no
    /// worker blocks on an unread send buffer, then each channel gets a
    /// `Close` and each spawned process a bounded wait before a kill.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.waiting = false;

        self.drain_pending();
        // Whatever never answered gets killed by the shutdown below.
        for owed in &mut self.pending {
            *owed = false;
        }
        shutdown_all(&mut self.workers, self.close_timeout);
        info!("coordinator closed");
    }
}

impl Drop for VecCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn shutdown_all(workers: &mut [WorkerHandle], close_timeout: Duration) {
    for handle in workers {
        handle.shutdown(close_timeout);
    }
}

/// Dispatch `GetSpaces` to every worker, collect in order, and require each
/// reply to agree with worker 0's.
fn query_spaces(workers: &mut [WorkerHandle]) -> Result<Spaces, CoordinatorError> {
    for (worker, handle) in workers.iter_mut().enumerate() {
        handle
            .send(&Command::GetSpaces)
            .map_err(|e| channel_error(worker, e))?;
    }

    let mut reference: Option<Spaces> = None;
    for worker in 0..workers.len() {
        let response = workers[worker]
            .recv()
            .map_err(|e| channel_error(worker, e))?;
        let spaces = match response {
            Response::Spaces { spaces } => spaces,
            Response::Error { message } => {
                return Err(CoordinatorError::Worker { worker, message });
            }
            other => {
                return Err(ProtocolError::UnexpectedResponse {
                    expected: "spaces",
                    got: other.kind(),
                }
                .into());
            }
        };
        match &reference {
            None => reference = Some(spaces),
            Some(expected) => check_spaces(worker, expected, &spaces)?,
        }
    }
    Ok(reference.unwrap_or_default())
}

fn check_spaces(worker: usize, expected: &Spaces, got: &Spaces) -> Result<(), CoordinatorError> {
    if expected.agents() != got.agents() {
        return Err(CoordinatorError::SpaceMismatch {
            worker,
            agent: String::new(),
            detail: format!(
                "agent set {:?} differs from worker 0's {:?}",
                got.agents(),
                expected.agents()
            ),
        });
    }
    for (agent, space) in &expected.observation {
        if got.observation.get(agent) != Some(space) {
            return Err(CoordinatorError::SpaceMismatch {
                worker,
                agent: agent.clone(),
                detail: "observation space differs from worker 0's".into(),
            });
        }
    }
    for (agent, space) in &expected.action {
        if got.action.get(agent) != Some(space) {
            return Err(CoordinatorError::SpaceMismatch {
                worker,
                agent: agent.clone(),
                detail: "action space differs from worker 0's".into(),
            });
        }
    }
    Ok(())
}

/// Fold one worker's step reply into the batch, suffixing every key.
fn merge_step(
    batch: &mut StepBatch,
    worker: usize,
    response: Response,
) -> Result<(), CoordinatorError> {
    match response {
        Response::Step {
            observations,
            rewards,
            dones,
            infos,
        } => {
            for (key, obs) in observations {
                batch.observations.insert(attach_env(&key, worker)?, obs);
            }
            for (key, reward) in rewards {
                batch.rewards.insert(attach_env(&key, worker)?, reward);
            }
            for (key, done) in dones {
                batch.dones.insert(attach_env(&key, worker)?, done);
            }
            for (key, info) in infos {
                batch.infos.insert(attach_env(&key, worker)?, info);
            }
            Ok(())
        }
        Response::Error { message } => {
            warn!(worker, %message, "worker reported a step error");
            Err(CoordinatorError::Worker { worker, message })
        }
        other => Err(ProtocolError::UnexpectedResponse {
            expected: "step",
            got: other.kind(),
        }
        .into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_error_maps_to_worker_variants() {
        let lost = channel_error(
            2,
            ChannelError::Lost {
                detail: "gone".into(),
            },
        );
        assert!(matches!(lost, CoordinatorError::WorkerLost { worker: 2, .. }));

        let slow = channel_error(
            0,
            ChannelError::Unresponsive {
                waited: Duration::from_secs(1),
            },
        );
        assert!(matches!(
            slow,
            CoordinatorError::WorkerUnresponsive { worker: 0, .. }
        ));
    }

    #[test]
    fn space_check_flags_agent_set_difference() {
        use covey_core::types::ObservationSpace;

        let mut a = Spaces::default();
        a.observation
            .insert("seeker".into(), ObservationSpace::Discrete { n: 2 });
        let mut b = Spaces::default();
        b.observation
            .insert("hider".into(), ObservationSpace::Discrete { n: 2 });

        let err = check_spaces(1, &a, &b).unwrap_err();
        assert!(matches!(err, CoordinatorError::SpaceMismatch { worker: 1, .. }));
        assert!(check_spaces(1, &a, &a.clone()).is_ok());
    }

    #[test]
    fn merge_step_suffixes_every_map() {
        let mut observations = BTreeMap::new();
        observations.insert("seeker".to_string(), Observation::flat(vec![1.0]));
        let mut rewards = BTreeMap::new();
        rewards.insert("seeker".to_string(), 0.5);
        let mut dones = BTreeMap::new();
        dones.insert("seeker".to_string(), true);
        let mut infos = BTreeMap::new();
        infos.insert("seeker".to_string(), InfoValue::Scalar(7.0));

        let mut batch = StepBatch::default();
        merge_step(
            &mut batch,
            4,
            Response::Step {
                observations,
                rewards,
                dones,
                infos,
            },
        )
        .unwrap();

        assert!(batch.observations.contains_key("seeker&env=4"));
        assert!(batch.rewards.contains_key("seeker&env=4"));
        assert!(batch.dones.contains_key("seeker&env=4"));
        assert!(batch.infos.contains_key("seeker&env=4"));
    }

    #[test]
    fn merge_step_surfaces_worker_errors() {
        let mut batch = StepBatch::default();
        let err = merge_step(&mut batch, 1, Response::error("engine crash")).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Worker { worker: 1, ref message } if message == "engine crash"
        ));
    }
}
