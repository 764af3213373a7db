use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Per-agent observation produced by an environment.
///
/// The variant is decided once per environment (at construction), never per
/// call: a `Flat` environment always produces `Flat` observations, a
/// `Structured` one always produces the same named fields (e.g. an
/// observation vector plus an action mask). Batching code dispatches on the
/// variant tag rather than inspecting payload shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Observation {
    /// Plain numeric vector.
    Flat(Vec<f32>),
    /// Named numeric fields, ordered by field name.
    Structured(BTreeMap<String, Vec<f32>>),
}

impl Observation {
    /// Flat observation from raw values.
    #[must_use]
    pub const fn flat(data: Vec<f32>) -> Self {
        Self::Flat(data)
    }

    /// Structured observation from `(field, values)` pairs.
    #[must_use]
    pub fn structured<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        Self::Structured(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Total number of scalar elements across all fields.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(v) => v.len(),
            Self::Structured(m) => m.values().map(Vec::len).sum(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slice view for flat observations, `None` for structured ones.
    #[must_use]
    pub fn as_flat(&self) -> Option<&[f32]> {
        match self {
            Self::Flat(v) => Some(v),
            Self::Structured(_) => None,
        }
    }

    /// A named field of a structured observation, `None` otherwise.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&[f32]> {
        match self {
            Self::Structured(m) => m.get(name).map(Vec::as_slice),
            Self::Flat(_) => None,
        }
    }
}

impl From<Vec<f32>> for Observation {
    fn from(data: Vec<f32>) -> Self {
        Self::Flat(data)
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Per-agent control command sent to the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Continuous control values (typically normalized to [-1, 1]).
    Continuous(Vec<f32>),
    /// Single discrete choice in [0, n).
    Discrete(u64),
    /// Multiple independent discrete choices.
    MultiDiscrete(Vec<u64>),
}

impl Action {
    /// Number of scalar elements.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Continuous(v) => v.len(),
            Self::Discrete(_) => 1,
            Self::MultiDiscrete(v) => v.len(),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// ObservationSpace
// ---------------------------------------------------------------------------

/// Shape and bounds of valid observations for one agent.
///
/// `Dict` describes the `Structured` observation variant; every other space
/// describes `Flat` observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObservationSpace {
    Box { low: Vec<f32>, high: Vec<f32> },
    Discrete { n: usize },
    MultiDiscrete { nvec: Vec<usize> },
    Dict { spaces: BTreeMap<String, ObservationSpace> },
}

impl ObservationSpace {
    /// Total number of scalar elements.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Box { low, .. } => low.len(),
            Self::Discrete { .. } => 1,
            Self::MultiDiscrete { nvec } => nvec.len(),
            Self::Dict { spaces } => spaces.values().map(Self::size).sum(),
        }
    }

    /// Whether observations drawn from this space use the `Structured` variant.
    #[must_use]
    pub const fn is_structured(&self) -> bool {
        matches!(self, Self::Dict { .. })
    }
}

// ---------------------------------------------------------------------------
// ActionSpace
// ---------------------------------------------------------------------------

/// Shape and bounds of valid actions for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionSpace {
    Box { low: Vec<f32>, high: Vec<f32> },
    Discrete { n: usize },
    MultiDiscrete { nvec: Vec<usize> },
}

impl ActionSpace {
    /// Sample a random action. Takes `&mut impl Rng` for determinism.
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample(&self, rng: &mut impl rand::Rng) -> Action {
        match self {
            Self::Box { low, high } => Action::Continuous(
                low.iter()
                    .zip(high.iter())
                    .map(|(l, h)| rng.gen_range(*l..=*h))
                    .collect(),
            ),
            Self::Discrete { n } => Action::Discrete(rng.gen_range(0..*n as u64)),
            Self::MultiDiscrete { nvec } => {
                Action::MultiDiscrete(nvec.iter().map(|n| rng.gen_range(0..*n as u64)).collect())
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn contains(&self, action: &Action) -> bool {
        match (self, action) {
            (Self::Box { low, high }, Action::Continuous(v)) => {
                v.len() == low.len()
                    && v.iter()
                        .zip(low.iter().zip(high.iter()))
                        .all(|(val, (l, h))| val >= l && val <= h)
            }
            (Self::Discrete { n }, Action::Discrete(v)) => (*v as usize) < *n,
            (Self::MultiDiscrete { nvec }, Action::MultiDiscrete(v)) => {
                v.len() == nvec.len()
                    && v.iter()
                        .zip(nvec.iter())
                        .all(|(val, n)| (*val as usize) < *n)
            }
            _ => false, // type mismatch
        }
    }
}

// ---------------------------------------------------------------------------
// Spaces
// ---------------------------------------------------------------------------

/// Per-agent observation and action spaces, keyed by worker-local agent name.
///
/// Queried once per worker at coordinator construction and validated against
/// worker 0's copy before any batch is dispatched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Spaces {
    pub observation: BTreeMap<String, ObservationSpace>,
    pub action: BTreeMap<String, ActionSpace>,
}

impl Spaces {
    /// Worker-local agent names, in map order.
    #[must_use]
    pub fn agents(&self) -> Vec<String> {
        self.observation.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// ResetOptions
// ---------------------------------------------------------------------------

/// Options forwarded to `env.reset()`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResetOptions {
    /// Optional RNG seed for the new episode.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Engine-specific scalar options.
    #[serde(default)]
    pub custom: BTreeMap<String, f32>,
}

impl ResetOptions {
    /// Reset with a fixed seed and no custom options.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            custom: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// InfoValue
// ---------------------------------------------------------------------------

/// Auxiliary diagnostic value reported through the `infos` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InfoValue {
    Scalar(f64),
    List(Vec<f64>),
    Text(String),
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// How a render request should be satisfied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Return the raw RGB frame buffer. The only mode whose output crosses
    /// the process boundary.
    #[default]
    Rgb,
    /// Display on the worker side; no frame comes back.
    Human,
}

/// Rendered RGB frame buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB bytes, `width * height * 3` long.
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
