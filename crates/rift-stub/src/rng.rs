//! Seeded random source owned by a router.
//!
//! Every random choice made while synthesizing a response is drawn from the
//! one [`StubRng`] of the router. A fixed seed therefore reproduces the same
//! sequence of statuses and generated bodies across router instances.

use parking_lot::{Mutex, MutexGuard};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Shared, lock-guarded RNG handle.
#[derive(Clone)]
pub struct StubRng {
    seed: u64,
    inner: Arc<Mutex<StdRng>>,
}

impl StubRng {
    /// Create an RNG from an explicit seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            inner: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Create an RNG seeded from the current time.
    pub fn from_time() -> Self {
        let now = chrono::Utc::now();
        let seed = now
            .timestamp_nanos_opt()
            .map(|n| n as u64)
            .unwrap_or_else(|| now.timestamp_micros() as u64);
        Self::from_seed(seed)
    }

    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Self::from_time(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Lock the generator for a whole synthesis so draws from concurrent
    /// requests never interleave.
    pub fn lock(&self) -> MutexGuard<'_, StdRng> {
        self.inner.lock()
    }
}

impl std::fmt::Debug for StubRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubRng").field("seed", &self.seed).finish()
    }
}
