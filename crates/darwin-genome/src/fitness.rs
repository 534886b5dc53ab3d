//! Shared fitness storage.

use std::sync::atomic::{AtomicU64, Ordering};

/// Fitness assigned when an evaluation produced `NaN`, an infinity, or a division by zero.
pub const FAULT_PENALTY: f64 = -1e4;

/// A fitness value that can be written through a shared reference.
///
/// Individuals are shared between generations (elites are carried over by reference), while
/// evaluation happens on worker threads. The value is stored as the bit pattern of an `f64`
/// in an atomic word. Non-finite values are replaced with [`FAULT_PENALTY`] on write, so a
/// stored fitness is always finite.
#[derive(Debug, Default)]
pub struct Fitness(AtomicU64);

impl Fitness {
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(sanitize(value).to_bits()))
    }

    #[must_use]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, value: f64) {
        self.0.store(sanitize(value).to_bits(), Ordering::Release);
    }
}

impl Clone for Fitness {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        log::debug!("non-finite fitness {value} replaced with {FAULT_PENALTY}");
        FAULT_PENALTY
    }
}
