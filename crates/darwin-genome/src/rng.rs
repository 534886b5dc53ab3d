//! Process-wide seedable random number source.
//!
//! Every random decision made by the evolution engine flows through this module so that
//! a run is reproducible from its seed. The source is a set of PCG streams derived from a
//! single master seed:
//!
//! - Each thread lazily owns a [`Pcg32`] generator.
//! - [`seed`] replaces the master seed and invalidates every thread's generator; threads
//!   rebuild theirs on the next draw.
//! - [`with_stream`] runs a closure on a generator derived from `(master seed, key)`. Worker
//!   threads use it so that the numbers a worker draws depend only on the seed and on the
//!   work it was assigned, not on thread scheduling.
//!
//! The thread that calls [`seed`] draws from stream `0`. Threads that never enter
//! [`with_stream`] get a fresh stream number of their own.
//!
//! # Usage
//!
//! Genome operators are generic over [`rand::Rng`]; pass [`GlobalRng`] to route them
//! through this source:
//!
//! ```
//! use darwin_genome::rng::{self, GlobalRng};
//! use rand::Rng as _;
//!
//! rng::seed(7);
//! let x: f64 = GlobalRng.random_range(-1.0..1.0);
//! assert!((-1.0..1.0).contains(&x));
//! ```

use std::{
    cell::RefCell,
    sync::atomic::{AtomicU64, Ordering},
};

use rand::RngCore;
use rand_pcg::Pcg32;

const DEFAULT_SEED: u64 = 0x5eed;
const MAIN_STREAM: u64 = 0;
const DETACHED_STREAM_BASE: u64 = 1 << 62;
const STREAM_MASK: u64 = (1 << 63) - 1;

static MASTER_SEED: AtomicU64 = AtomicU64::new(DEFAULT_SEED);
static EPOCH: AtomicU64 = AtomicU64::new(0);
static NEXT_DETACHED_STREAM: AtomicU64 = AtomicU64::new(DETACHED_STREAM_BASE);

thread_local! {
    static LOCAL: RefCell<Option<LocalStream>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone)]
struct LocalStream {
    epoch: u64,
    stream: u64,
    rng: Pcg32,
}

impl LocalStream {
    fn new(stream: u64) -> Self {
        let master = MASTER_SEED.load(Ordering::Acquire);
        Self {
            epoch: EPOCH.load(Ordering::Acquire),
            stream,
            rng: Pcg32::new(mix(master ^ mix(stream)), stream & STREAM_MASK),
        }
    }

    fn refresh(&mut self) {
        if self.epoch != EPOCH.load(Ordering::Acquire) {
            *self = Self::new(self.stream);
        }
    }
}

/// `SplitMix64` finalizer used to spread stream keys over the state space.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn with_local<T>(f: impl FnOnce(&mut Pcg32) -> T) -> T {
    LOCAL.with(|cell| {
        let mut slot = cell.borrow_mut();
        let local = slot.get_or_insert_with(|| {
            LocalStream::new(NEXT_DETACHED_STREAM.fetch_add(1, Ordering::Relaxed))
        });
        local.refresh();
        f(&mut local.rng)
    })
}

/// Reseeds the process-wide source.
///
/// All per-thread generators are reset: the calling thread continues on stream `0` of the
/// new seed, other threads rebuild their stream on their next draw.
pub fn seed(seed: u64) {
    MASTER_SEED.store(seed, Ordering::Release);
    EPOCH.fetch_add(1, Ordering::AcqRel);
    LOCAL.with(|cell| *cell.borrow_mut() = Some(LocalStream::new(MAIN_STREAM)));
}

/// Returns the master seed currently in effect.
#[must_use]
pub fn current_seed() -> u64 {
    MASTER_SEED.load(Ordering::Acquire)
}

/// Returns a uniform integer in `[0, n)`.
///
/// # Panics
///
/// Panics if `n` is zero.
#[must_use]
pub fn intn(n: usize) -> usize {
    use rand::Rng as _;
    assert!(n > 0, "intn called with an empty range");
    GlobalRng.random_range(0..n)
}

/// Returns a uniform float in `[0, 1)`.
#[must_use]
pub fn float64() -> f64 {
    use rand::Rng as _;
    GlobalRng.random::<f64>()
}

/// Derives a stream key for one worker of one phase of work.
///
/// Two different `(phase, worker)` pairs never share a key.
#[must_use]
pub fn stream_key(phase: u64, worker: usize) -> u64 {
    ((phase << 20) | (worker as u64 & 0xf_ffff)) & (DETACHED_STREAM_BASE - 1)
}

/// Runs `f` with the calling thread drawing from stream `key` of the current seed.
///
/// The stream starts from its beginning on every call, so the same `key` under the same
/// seed always yields the same numbers. The previous generator of the thread is restored
/// afterwards, even if `f` panics.
pub fn with_stream<T>(key: u64, f: impl FnOnce() -> T) -> T {
    struct Restore(Option<LocalStream>);
    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0.take();
            LOCAL.with(|cell| *cell.borrow_mut() = previous);
        }
    }

    let previous = LOCAL.with(|cell| cell.borrow_mut().replace(LocalStream::new(key)));
    let _restore = Restore(previous);
    f()
}

/// Handle to the process-wide source usable wherever a [`rand::Rng`] is expected.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalRng;

impl RngCore for GlobalRng {
    fn next_u32(&mut self) -> u32 {
        with_local(RngCore::next_u32)
    }

    fn next_u64(&mut self) -> u64 {
        with_local(RngCore::next_u64)
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        with_local(|rng| rng.fill_bytes(dst));
    }
}
