//! Process-wide sources of nondeterminism used by `random`, `randomn:` and `now`.
//!
//! Both are handed to the compiler through [`CompileOptions`](crate::CompileOptions)
//! so tests can pin them down.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A thread-safe pseudorandom generator.
pub trait RandomSource: Send + Sync + fmt::Debug {
    /// A non-negative 31-bit integer.
    fn next_int(&self) -> i32;

    /// An integer in `0..upper`. `upper` is always positive.
    fn next_below(&self, upper: i32) -> i32;
}

/// A wall clock.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Default generator: a seeded `StdRng` behind a mutex.
pub struct ThreadRandom {
    rng: Mutex<StdRng>,
}

impl ThreadRandom {
    pub fn new() -> Self {
        ThreadRandom {
            rng: Mutex::new(StdRng::seed_from_u64(rand::random::<u64>())),
        }
    }

    /// Deterministic sequence for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        ThreadRandom {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for ThreadRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ThreadRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRandom").finish_non_exhaustive()
    }
}

impl RandomSource for ThreadRandom {
    fn next_int(&self) -> i32 {
        self.rng.lock().gen_range(0..i32::MAX)
    }

    fn next_below(&self, upper: i32) -> i32 {
        self.rng.lock().gen_range(0..upper)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
