//! Deterministic seeding for vectorized runs.
//!
//! Worker seeds are derived arithmetically so a run is reproducible from a
//! single base seed: worker `i` receives `base_seed + i`. Episode-level
//! seeds are mixed by hashing so consecutive episodes do not correlate.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Seed for worker `index` of a run seeded with `base`.
///
/// # Example
///
/// ```
/// use covey_core::seed::worker_seed;
///
/// assert_eq!(worker_seed(42, 0), 42);
/// assert_eq!(worker_seed(42, 3), 45);
/// ```
#[must_use]
pub fn worker_seed(base: u64, index: usize) -> u64 {
    base.wrapping_add(index as u64)
}

/// Derive an episode-level seed from a worker seed and episode number.
#[must_use]
pub fn episode_seed(worker: u64, episode: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    worker.hash(&mut hasher);
    episode.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic RNG from a seed.
#[must_use]
pub fn rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
