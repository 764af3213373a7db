//! Agent-major restacking.
//!
//! The coordinator's flat batches are keyed `agent&env=i`. Training code
//! wants the transpose: one entry per base agent, whose row `i` came from
//! worker `i`. [`restack_step`] and [`restack_observations`] perform that
//! regrouping; [`unstack_actions`] is the inverse on the action side.
//! [`BatchedEnv`] wraps a [`VecCoordinator`] behind the agent-major view.
//!
//! Restacking requires a full matrix: every base agent must have a row from
//! every worker, and every row of one agent must use the same observation
//! variant. Both are construction-time guarantees (identical specs, spaces
//! validated against worker 0), so a violation here means a worker broke its
//! contract mid-run.

use std::collections::BTreeMap;

use thiserror::Error;

use covey_core::error::KeyError;
use covey_core::key::{attach_env, strip_env};
use covey_core::types::{Action, InfoValue, Observation, ResetOptions};

use crate::coordinator::{CoordinatorError, StepBatch, VecCoordinator};

// ---------------------------------------------------------------------------
// RestackError
// ---------------------------------------------------------------------------

/// A flat batch that cannot be regrouped into agent-major form.
#[derive(Debug, Error)]
pub enum RestackError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// An agent key pointed at a worker index outside the batch.
    #[error("Agent {agent:?} row from worker {worker} exceeds the {workers}-worker batch")]
    RowOutOfRange {
        agent: String,
        worker: usize,
        workers: usize,
    },

    /// An agent is missing its row from one worker.
    #[error("Agent {agent:?} has no row from worker {worker}")]
    MissingRow { agent: String, worker: usize },

    /// One agent's rows mix flat and structured observations, or disagree on
    /// structured field names.
    #[error("Agent {agent:?} row from worker {worker} uses a different observation layout")]
    VariantMismatch { agent: String, worker: usize },

    /// An action matrix row count does not match the worker count.
    #[error("Agent {agent:?} has {got} action rows, expected {expected}")]
    WrongRowCount {
        agent: String,
        got: usize,
        expected: usize,
    },
}

// ---------------------------------------------------------------------------
// BatchedObservation
// ---------------------------------------------------------------------------

/// One agent's observations across all workers; row `i` is worker `i`'s.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchedObservation {
    /// `workers x obs_len` matrix.
    Flat(Vec<Vec<f32>>),
    /// Per-field `workers x field_len` matrices, keyed by field name.
    Structured(BTreeMap<String, Vec<Vec<f32>>>),
}

impl BatchedObservation {
    /// Number of rows (one per worker).
    #[must_use]
    pub fn rows(&self) -> usize {
        match self {
            Self::Flat(rows) => rows.len(),
            Self::Structured(fields) => fields.values().next().map_or(0, Vec::len),
        }
    }
}

/// One agent-major step: every map is keyed by base agent name, every value
/// indexed by worker.
#[derive(Debug, Clone, Default)]
pub struct AgentBatch {
    pub observations: BTreeMap<String, BatchedObservation>,
    pub rewards: BTreeMap<String, Vec<f32>>,
    pub dones: BTreeMap<String, Vec<bool>>,
    /// Sparse: workers report infos independently.
    pub infos: BTreeMap<String, Vec<Option<InfoValue>>>,
}

// ---------------------------------------------------------------------------
// Restacking
// ---------------------------------------------------------------------------

/// Group env-suffixed entries into `agent -> rows`, one slot per worker.
fn group_rows<'a, T>(
    flat: impl IntoIterator<Item = (&'a String, &'a T)>,
    workers: usize,
) -> Result<BTreeMap<String, Vec<Option<&'a T>>>, RestackError> {
    let mut rows: BTreeMap<String, Vec<Option<&'a T>>> = BTreeMap::new();
    for (key, value) in flat {
        let (agent, worker) = strip_env(key)?;
        if worker >= workers {
            return Err(RestackError::RowOutOfRange {
                agent,
                worker,
                workers,
            });
        }
        rows.entry(agent).or_insert_with(|| vec![None; workers])[worker] = Some(value);
    }
    Ok(rows)
}

fn require_full<'a, T>(
    agent: &str,
    rows: Vec<Option<&'a T>>,
) -> Result<Vec<&'a T>, RestackError> {
    rows.into_iter()
        .enumerate()
        .map(|(worker, slot)| {
            slot.ok_or_else(|| RestackError::MissingRow {
                agent: agent.into(),
                worker,
            })
        })
        .collect()
}

/// Restack env-suffixed observations into agent-major matrices.
pub fn restack_observations(
    observations: &BTreeMap<String, Observation>,
    workers: usize,
) -> Result<BTreeMap<String, BatchedObservation>, RestackError> {
    let mut out = BTreeMap::new();
    for (agent, rows) in group_rows(observations, workers)? {
        let rows = require_full(&agent, rows)?;
        out.insert(agent.clone(), stack_agent(&agent, &rows)?);
    }
    Ok(out)
}

/// Stack one agent's per-worker observations, dispatching on the variant of
/// the first row.
fn stack_agent(agent: &str, rows: &[&Observation]) -> Result<BatchedObservation, RestackError> {
    match rows.first() {
        None => Ok(BatchedObservation::Flat(Vec::new())),
        Some(Observation::Flat(_)) => {
            let mut matrix = Vec::with_capacity(rows.len());
            for (worker, row) in rows.iter().enumerate() {
                let Observation::Flat(values) = row else {
                    return Err(RestackError::VariantMismatch {
                        agent: agent.into(),
                        worker,
                    });
                };
                matrix.push(values.clone());
            }
            Ok(BatchedObservation::Flat(matrix))
        }
        Some(Observation::Structured(first)) => {
            let mut fields: BTreeMap<String, Vec<Vec<f32>>> = first
                .keys()
                .map(|name| (name.clone(), Vec::with_capacity(rows.len())))
                .collect();
            for (worker, row) in rows.iter().enumerate() {
                let Observation::Structured(values) = row else {
                    return Err(RestackError::VariantMismatch {
                        agent: agent.into(),
                        worker,
                    });
                };
                if values.len() != fields.len() {
                    return Err(RestackError::VariantMismatch {
                        agent: agent.into(),
                        worker,
                    });
                }
                for (name, column) in &mut fields {
                    let Some(values) = values.get(name) else {
                        return Err(RestackError::VariantMismatch {
                            agent: agent.into(),
                            worker,
                        });
                    };
                    column.push(values.clone());
                }
            }
            Ok(BatchedObservation::Structured(fields))
        }
    }
}

/// Restack a full collected step into agent-major form.
pub fn restack_step(batch: &StepBatch, workers: usize) -> Result<AgentBatch, RestackError> {
    let observations = restack_observations(&batch.observations, workers)?;

    let mut rewards = BTreeMap::new();
    for (agent, rows) in group_rows(&batch.rewards, workers)? {
        let rows = require_full(&agent, rows)?;
        rewards.insert(agent, rows.into_iter().copied().collect());
    }

    let mut dones = BTreeMap::new();
    for (agent, rows) in group_rows(&batch.dones, workers)? {
        let rows = require_full(&agent, rows)?;
        dones.insert(agent, rows.into_iter().copied().collect());
    }

    let mut infos = BTreeMap::new();
    for (agent, rows) in group_rows(&batch.infos, workers)? {
        infos.insert(agent, rows.into_iter().map(|slot| slot.cloned()).collect());
    }

    Ok(AgentBatch {
        observations,
        rewards,
        dones,
        infos,
    })
}

/// Spread agent-major action rows back out to env-suffixed keys.
///
/// Every agent must provide exactly one action per worker.
pub fn unstack_actions(
    actions: &BTreeMap<String, Vec<Action>>,
    workers: usize,
) -> Result<BTreeMap<String, Action>, RestackError> {
    let mut out = BTreeMap::new();
    for (agent, rows) in actions {
        if rows.len() != workers {
            return Err(RestackError::WrongRowCount {
                agent: agent.clone(),
                got: rows.len(),
                expected: workers,
            });
        }
        for (worker, action) in rows.iter().enumerate() {
            out.insert(attach_env(agent, worker)?, action.clone());
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// BatchedEnv
// ---------------------------------------------------------------------------

/// Agent-major facade over a [`VecCoordinator`].
#[derive(Debug)]
pub struct BatchedEnv {
    inner: VecCoordinator,
}

impl BatchedEnv {
    #[must_use]
    pub const fn new(inner: VecCoordinator) -> Self {
        Self { inner }
    }

    /// The wrapped coordinator, for flat-keyed access.
    pub fn coordinator(&mut self) -> &mut VecCoordinator {
        &mut self.inner
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.inner.num_workers()
    }

    /// Reset every worker; observations come back agent-major.
    pub fn reset(
        &mut self,
        options: &ResetOptions,
    ) -> Result<BTreeMap<String, BatchedObservation>, CoordinatorError> {
        let flat = self.inner.reset(options)?;
        Ok(restack_observations(&flat, self.inner.num_workers())?)
    }

    /// Step every worker with agent-major action rows.
    pub fn step(
        &mut self,
        actions: &BTreeMap<String, Vec<Action>>,
    ) -> Result<AgentBatch, CoordinatorError> {
        let workers = self.inner.num_workers();
        let flat = unstack_actions(actions, workers)?;
        let batch = self.inner.step(&flat)?;
        Ok(restack_step(&batch, workers)?)
    }

    /// Shut the coordinator down. Idempotent.
    pub fn close(&mut self) {
        self.inner.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
