//! Reproducible randomness
//!
//! Each test run owns a [`Random`] generator. Its seed is fixed either
//! explicitly, with [`Random::set_seed`] or the
//! [`RandomSeed`](crate::config::RandomSeed) config element, or randomly on
//! first use. A generated seed is logged, and a failing test reports it, so the
//! run can be replayed exactly.
//!
//! The generator is ChaCha8 seeded from a `u64`, whose output is the same on
//! every platform.
//!
//! ```rust
//! use testkit_prepared::random::Random;
//!
//! let a = Random::new();
//! a.set_seed(42).unwrap();
//! let b = Random::new();
//! b.set_seed(42).unwrap();
//!
//! assert_eq!(a.next_u64(), b.next_u64());
//! ```

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::environment::TestEnvironment;
use crate::error::{Error, Result};
use crate::fixture::PreparedProvider;

/// How the seed of a [`Random`] was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedOrigin {
    /// Fixed by the test.
    Explicit,
    /// Drawn from system entropy when the generator was first used.
    Generated,
}

impl fmt::Display for SeedOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedOrigin::Explicit => write!(f, "explicitly chosen"),
            SeedOrigin::Generated => write!(f, "generated randomly on first use"),
        }
    }
}

/// The seed of a [`Random`] and how it was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedInfo {
    /// The seed.
    pub seed: u64,
    /// How it was chosen.
    pub origin: SeedOrigin,
}

impl fmt::Display for SeedInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            SeedOrigin::Explicit => {
                write!(f, "Random generator with the explicitly selected seed {}", self.seed)
            }
            SeedOrigin::Generated => write!(
                f,
                "Random generator with seed {seed}. To reproduce this execution, call 'random().set_seed({seed})' \
                 at the start of the test, before any random generation, or configure RandomSeed({seed})",
                seed = self.seed
            ),
        }
    }
}

#[derive(Default)]
struct RandomState {
    seed: Option<SeedInfo>,
    rng: Option<ChaCha8Rng>,
}

impl RandomState {
    fn fix(&mut self, info: SeedInfo) {
        self.seed = Some(info);
        self.rng = Some(ChaCha8Rng::seed_from_u64(info.seed));
    }
}

/// The random generator of one test run.
///
/// Cloning is cheap; clones share the same generator.
#[derive(Clone, Default)]
pub struct Random {
    state: Arc<Mutex<RandomState>>,
}

impl Random {
    /// A generator whose seed is not fixed yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the seed.
    ///
    /// Setting the seed that is already in use is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SeedAlreadyFixed`] if another seed was already fixed,
    /// explicitly or because the generator was used.
    pub fn set_seed(&self, seed: u64) -> Result<()> {
        let mut state = self.state.lock();
        match state.seed {
            Some(info) if info.seed == seed => Ok(()),
            Some(info) => Err(Error::SeedAlreadyFixed {
                seed: info.seed,
                origin: info.origin,
                requested: seed,
            }),
            None => {
                let info = SeedInfo {
                    seed,
                    origin: SeedOrigin::Explicit,
                };
                tracing::info!("» {info}");
                state.fix(info);
                Ok(())
            }
        }
    }

    /// The seed in use, if it is fixed yet.
    #[must_use]
    pub fn seed(&self) -> Option<SeedInfo> {
        self.state.lock().seed
    }

    /// Runs `f` with exclusive access to the generator.
    ///
    /// If no seed was fixed, a seed is generated and logged first.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut ChaCha8Rng) -> R) -> R {
        let mut state = self.state.lock();
        let RandomState { seed, rng } = &mut *state;
        let rng = rng.get_or_insert_with(|| {
            let info = SeedInfo {
                seed: rand::thread_rng().gen(),
                origin: SeedOrigin::Generated,
            };
            tracing::info!("» {info}");
            *seed = Some(info);
            ChaCha8Rng::seed_from_u64(info.seed)
        });
        f(rng)
    }

    /// A uniformly distributed `i32`.
    #[must_use]
    pub fn next_i32(&self) -> i32 {
        self.with_rng(|rng| rng.gen())
    }

    /// A uniformly distributed `i32` in `range`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is empty.
    #[must_use]
    pub fn next_i32_in(&self, range: Range<i32>) -> i32 {
        self.with_rng(|rng| rng.gen_range(range))
    }

    /// A uniformly distributed `i64`.
    #[must_use]
    pub fn next_i64(&self) -> i64 {
        self.with_rng(|rng| rng.gen())
    }

    /// A uniformly distributed `i64` in `range`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is empty.
    #[must_use]
    pub fn next_i64_in(&self, range: Range<i64>) -> i64 {
        self.with_rng(|rng| rng.gen_range(range))
    }

    /// A uniformly distributed `u64`.
    #[must_use]
    pub fn next_u64(&self) -> u64 {
        self.with_rng(|rng| rng.gen())
    }

    /// `true` or `false`, with equal probability.
    #[must_use]
    pub fn next_bool(&self) -> bool {
        self.with_rng(|rng| rng.gen())
    }

    /// A uniformly distributed `f64` in `[0, 1)`.
    #[must_use]
    pub fn next_f64(&self) -> f64 {
        self.with_rng(|rng| rng.gen())
    }

    /// A uniformly distributed `f64` in `range`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is empty.
    #[must_use]
    pub fn next_f64_in(&self, range: Range<f64>) -> f64 {
        self.with_rng(|rng| rng.gen_range(range))
    }

    /// A uniformly distributed `f32` in `[0, 1)`.
    #[must_use]
    pub fn next_f32(&self) -> f32 {
        self.with_rng(|rng| rng.gen())
    }

    /// The `bit_count` lowest bits are random, the others are zero.
    /// `bit_count` is clamped to 32.
    #[must_use]
    pub fn next_bits(&self, bit_count: u32) -> u32 {
        match bit_count.min(32) {
            0 => 0,
            bits => self.with_rng(|rng| rng.gen::<u32>() >> (32 - bits)),
        }
    }
}

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Random").field("seed", &self.seed()).finish()
    }
}

fn provider<T, F>(draw: F) -> PreparedProvider<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
    F: Fn(&Random) -> T + Send + Sync + 'static,
{
    PreparedProvider::new(move |env: TestEnvironment| {
        let value = draw(env.random());
        async move { Ok::<_, Error>(value) }
    })
}

/// Prepared random `i32` values.
#[must_use]
pub fn random_i32() -> PreparedProvider<i32> {
    provider(Random::next_i32)
}

/// Prepared random `i32` values in `range`.
#[must_use]
pub fn random_i32_in(range: Range<i32>) -> PreparedProvider<i32> {
    provider(move |random| random.next_i32_in(range.clone()))
}

/// Prepared random `i64` values.
#[must_use]
pub fn random_i64() -> PreparedProvider<i64> {
    provider(Random::next_i64)
}

/// Prepared random `i64` values in `range`.
#[must_use]
pub fn random_i64_in(range: Range<i64>) -> PreparedProvider<i64> {
    provider(move |random| random.next_i64_in(range.clone()))
}

/// Prepared random booleans.
#[must_use]
pub fn random_bool() -> PreparedProvider<bool> {
    provider(Random::next_bool)
}

/// Prepared random `f64` values in `[0, 1)`.
#[must_use]
pub fn random_f64() -> PreparedProvider<f64> {
    provider(Random::next_f64)
}

/// Prepared random `f64` values in `range`.
#[must_use]
pub fn random_f64_in(range: Range<f64>) -> PreparedProvider<f64> {
    provider(move |random| random.next_f64_in(range.clone()))
}

/// Prepared random `f32` values in `[0, 1)`.
#[must_use]
pub fn random_f32() -> PreparedProvider<f32> {
    provider(Random::next_f32)
}

/// Prepared values whose `bit_count` lowest bits are random.
#[must_use]
pub fn random_bits(bit_count: u32) -> PreparedProvider<u32> {
    provider(move |random| random.next_bits(bit_count))
}
