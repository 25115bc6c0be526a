//! The entropy accumulator: 32 hash pools feeding a guarded generator

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use zeroize::Zeroizing;

use crate::cipher::{new_aes256, NewCipher};
use crate::error::{FortunaError, Result};
use crate::generator::Generator;
use crate::sha256d::{Sha256d, OUTPUT_SIZE};

/// Number of entropy pools.
pub const NUM_POOLS: usize = 32;

/// Maximum entropy-event payload size in bytes. Longer data must be
/// hashed by the caller and the digest submitted instead.
pub const MAX_EVENT_SIZE: usize = 32;

/// Bytes that must accumulate in pool 0 before a reseed becomes
/// eligible.
const MIN_POOL_SIZE: usize = 32;

/// Minimum wall-clock spacing between consecutive reseeds.
const MIN_RESEED_INTERVAL: Duration = Duration::from_millis(100);

struct PoolState {
    pools: [Sha256d; NUM_POOLS],
    pool_zero_size: usize,
    reseed_count: u64,
    next_reseed: Option<Instant>,
}

/// Spreads entropy events round-robin over 32 double-SHA-256 pools and
/// reseeds its generator on the Fortuna schedule: pool 0 gates
/// eligibility, and pool `i` is consumed only on every 2^i-th reseed, so
/// the generator escapes a state compromise as soon as a pool the
/// attacker could not predict is folded in.
///
/// Safe to share across threads. The pools and the generator sit behind
/// two independent locks, and the pool lock is never held across
/// generator work, so entropy ingestion does not stall behind large
/// output requests.
pub struct Accumulator {
    generator: Mutex<Generator>,
    state: Mutex<PoolState>,
    next_source: AtomicU8,
    closed: AtomicBool,
}

/// Number of pools consumed by reseed number `reseed_count`: the largest
/// `k` such that `2^(k-1)` divides the count, capped at [`NUM_POOLS`].
fn reseed_pool_count(reseed_count: u64) -> usize {
    let mut k = 0;
    while k < NUM_POOLS && reseed_count % (1u64 << k) == 0 {
        k += 1;
    }
    k
}

impl Accumulator {
    /// Create an accumulator over AES-256 with empty pools and an
    /// unseeded generator. Callers must supply a seed (directly or
    /// through entropy events) before extracting output.
    pub fn new() -> Self {
        Self::with_cipher(new_aes256)
    }

    /// Like [`Accumulator::new`] but with a caller-chosen block cipher
    /// factory.
    pub fn with_cipher(new_cipher: NewCipher) -> Self {
        Self {
            generator: Mutex::new(Generator::new(new_cipher)),
            state: Mutex::new(PoolState {
                pools: std::array::from_fn(|_| Sha256d::new()),
                pool_zero_size: 0,
                reseed_count: 0,
                next_reseed: None,
            }),
            next_source: AtomicU8::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Add one entropy event to the pools.
    ///
    /// `source` identifies the entropy source (allocate ids with
    /// [`allocate_source`](Self::allocate_source)); `seq` should count 0,
    /// 1, 2, … per source so that every source spreads evenly over all
    /// pools. The pool absorbs the source id, the payload length, and
    /// the payload itself.
    pub fn add_random_event(&self, source: u8, seq: u64, data: &[u8]) -> Result<()> {
        if data.len() > MAX_EVENT_SIZE {
            return Err(FortunaError::OversizedEvent);
        }
        let pool = (seq % NUM_POOLS as u64) as usize;

        let mut state = self.state.lock().expect("pool lock poisoned");
        state.pools[pool].update(&[source, data.len() as u8]);
        state.pools[pool].update(data);
        if pool == 0 {
            state.pool_zero_size += 2 + data.len();
        }
        Ok(())
    }

    /// Allocate the next unused source id for an entropy source.
    pub fn allocate_source(&self) -> u8 {
        self.next_source.fetch_add(1, Ordering::Relaxed)
    }

    /// Check reseed eligibility and, when due, consume the scheduled
    /// pools. Holds only the pool lock; the returned seed is applied to
    /// the generator by the caller.
    fn try_reseed(&self) -> Option<Zeroizing<Vec<u8>>> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("pool lock poisoned");

        if state.pool_zero_size < MIN_POOL_SIZE {
            return None;
        }
        if let Some(next) = state.next_reseed {
            if now < next {
                return None;
            }
        }

        state.next_reseed = Some(now + MIN_RESEED_INTERVAL);
        state.pool_zero_size = 0;
        state.reseed_count += 1;

        let count = reseed_pool_count(state.reseed_count);
        let mut seed = Zeroizing::new(Vec::with_capacity(count * OUTPUT_SIZE));
        for pool in &mut state.pools[..count] {
            seed.extend_from_slice(&pool.sum());
            pool.reset();
        }
        tracing::debug!(
            reseed = state.reseed_count,
            pools = count,
            "reseeding generator from entropy pools"
        );
        Some(seed)
    }

    /// Run `f` on the generator, applying a pending reseed first. The
    /// pool lock is released before the generator lock is taken.
    fn with_generator<R>(&self, f: impl FnOnce(&mut Generator) -> R) -> R {
        assert!(
            !self.closed.load(Ordering::Acquire),
            "fortuna accumulator used after close"
        );
        let seed = self.try_reseed();
        let mut generator = self.generator.lock().expect("generator lock poisoned");
        if let Some(seed) = seed {
            generator.reseed(&seed);
        }
        f(&mut generator)
    }

    /// Run `f` with the generator lock held and no reseed gate. Used by
    /// the façade for seed-file critical sections.
    pub(crate) fn with_generator_locked<R>(&self, f: impl FnOnce(&mut Generator) -> R) -> R {
        let mut generator = self.generator.lock().expect("generator lock poisoned");
        f(&mut generator)
    }

    /// Fold an externally supplied seed into the generator.
    pub(crate) fn reseed(&self, seed: &[u8]) {
        self.with_generator_locked(|generator| generator.reseed(seed));
    }

    /// Return `n` random bytes.
    ///
    /// Panics if the generator has never been seeded or the accumulator
    /// has been closed.
    pub fn random_data(&self, n: usize) -> Vec<u8> {
        self.with_generator(|generator| generator.pseudo_random_data(n))
    }

    /// Fill `buf` completely with random bytes. Never partial.
    pub fn fill(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.random_data(buf.len()));
    }

    /// A random integer in `0..=i64::MAX`, drawn under the same reseed
    /// gate as [`random_data`](Self::random_data).
    pub fn int63(&self) -> i64 {
        self.with_generator(|generator| generator.int63())
    }

    /// A random `u64`, drawn under the same reseed gate as
    /// [`random_data`](Self::random_data).
    pub fn uint64(&self) -> u64 {
        self.with_generator(|generator| generator.uint64())
    }

    /// Mark the accumulator unusable and wipe the generator key. Any
    /// later extraction panics.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.generator
            .lock()
            .expect("generator lock poisoned")
            .reset();
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

// The accumulator is the crate's counterpart of a `rand` source. A
// `SeedableRng` implementation is deliberately absent: externally seeding
// a cryptographic generator would make its output predictable.
impl rand_core::RngCore for Accumulator {
    fn next_u32(&mut self) -> u32 {
        self.uint64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.uint64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.fill(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
        self.fill(dest);
        Ok(())
    }
}

impl rand_core::CryptoRng for Accumulator {}
