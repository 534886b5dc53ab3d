//! Fixed-length bit-string genomes.

use rand::Rng;

use crate::{
    crossover,
    evolvable::{CrossoverInfo, Evolvable, MutateInfo},
    fitness::Fitness,
};

/// A fixed-length sequence of booleans.
#[derive(Debug, Clone)]
pub struct BitString {
    bits: Vec<bool>,
    fitness: Fitness,
}

impl BitString {
    /// Creates a bit string with each bit set independently with probability 0.5.
    pub fn random<R>(len: usize, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        Self::from_bits((0..len).map(|_| rng.random_bool(0.5)).collect())
    }

    #[must_use]
    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self {
            bits,
            fitness: Fitness::default(),
        }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Fraction of bits set, in `[0, 1]`. An empty string scores `0`.
    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn ones_fraction(&self) -> f64 {
        if self.bits.is_empty() {
            return 0.0;
        }
        let ones = self.bits.iter().filter(|&&b| b).count();
        ones as f64 / self.bits.len() as f64
    }
}

impl Evolvable for BitString {
    fn fitness(&self) -> f64 {
        self.fitness.get()
    }

    fn set_fitness(&self, fitness: f64) {
        self.fitness.set(fitness);
    }

    /// A single Bernoulli(`rate`) draw gates the whole call; when it passes, each bit
    /// flips independently with probability `rate`.
    fn mutate<R>(&mut self, rate: f64, _info: &MutateInfo, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        if rng.random::<f64>() >= rate {
            return;
        }
        for bit in &mut self.bits {
            if rng.random::<f64>() < rate {
                *bit = !*bit;
            }
        }
    }

    /// Multi-point crossover. Children start unscored.
    fn crossover<R>(&self, other: &Self, info: &CrossoverInfo, rng: &mut R) -> (Self, Self)
    where
        R: Rng + ?Sized,
    {
        let (a, b) = crossover::multi_point(&self.bits, &other.bits, info.crossover_points, rng);
        (Self::from_bits(a), Self::from_bits(b))
    }

    fn describe(&self) -> String {
        self.bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
    }
}
