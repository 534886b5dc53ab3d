//! Parent selection.
//!
//! Both selectors sample `size` individuals uniformly *with replacement* and never modify
//! the population.
//!
//! - [`Tournament`] returns the fittest of the sample; ties go to the first sampled.
//! - [`Roulette`] returns a sample member with probability proportional to `|fitness|`.
//!   Absolute values keep the wheel well-defined for negative fitness such as `-RMSE`.

use std::{fmt, sync::Arc};

use darwin_genome::{Evolvable as _, Individual};
use rand::{Rng as _, RngCore};

/// Picks one parent from a population.
pub trait Selector: fmt::Debug + Send + Sync {
    /// Returns a member of `population`.
    ///
    /// # Panics
    ///
    /// Panics if `population` is empty.
    fn select<'a>(
        &self,
        population: &'a [Arc<Individual>],
        rng: &mut dyn RngCore,
    ) -> &'a Arc<Individual>;
}

/// Which selector to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionType {
    #[default]
    Tournament,
    Roulette,
}

impl SelectionType {
    /// Builds a selector drawing `size` candidates per selection.
    #[must_use]
    pub fn build(self, size: usize) -> Box<dyn Selector> {
        match self {
            SelectionType::Tournament => Box::new(Tournament::new(size)),
            SelectionType::Roulette => Box::new(Roulette::new(size)),
        }
    }
}

fn sample<'a>(population: &'a [Arc<Individual>], rng: &mut dyn RngCore) -> &'a Arc<Individual> {
    assert!(!population.is_empty(), "cannot select from an empty population");
    &population[rng.random_range(0..population.len())]
}

#[derive(Debug, Clone, Copy)]
pub struct Tournament {
    size: usize,
}

impl Tournament {
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[must_use]
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "tournament size must be positive");
        Self { size }
    }
}

impl Selector for Tournament {
    fn select<'a>(
        &self,
        population: &'a [Arc<Individual>],
        rng: &mut dyn RngCore,
    ) -> &'a Arc<Individual> {
        let mut best = sample(population, rng);
        for _ in 1..self.size {
            let candidate = sample(population, rng);
            if candidate.fitness() > best.fitness() {
                best = candidate;
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Roulette {
    size: usize,
}

impl Roulette {
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[must_use]
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "roulette sample size must be positive");
        Self { size }
    }
}

impl Selector for Roulette {
    fn select<'a>(
        &self,
        population: &'a [Arc<Individual>],
        rng: &mut dyn RngCore,
    ) -> &'a Arc<Individual> {
        let candidates: Vec<&Arc<Individual>> =
            (0..self.size).map(|_| sample(population, rng)).collect();
        let total: f64 = candidates.iter().map(|c| c.fitness().abs()).sum();
        let last = candidates[candidates.len() - 1];
        if total <= 0.0 {
            return last;
        }

        let u = rng.random::<f64>() * total;
        let mut cumulative = 0.0;
        for candidate in candidates {
            cumulative += candidate.fitness().abs();
            if cumulative > u {
                return candidate;
            }
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use darwin_genome::{BitString, Evolvable};
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    use super::*;

    fn population(fitness: &[f64]) -> Vec<Arc<Individual>> {
        fitness
            .iter()
            .map(|&f| {
                let individual = Individual::from(BitString::from_bits(vec![false; 4]));
                individual.set_fitness(f);
                Arc::new(individual)
            })
            .collect()
    }

    fn contains(population: &[Arc<Individual>], chosen: &Arc<Individual>) -> bool {
        population.iter().any(|i| Arc::ptr_eq(i, chosen))
    }

    #[test]
    fn test_selection_returns_a_member() {
        let population = population(&[0.5, -2.0, 0.0, 3.0, 1.0]);
        let mut rng = Pcg32::seed_from_u64(3);
        for selector in [SelectionType::Tournament.build(3), SelectionType::Roulette.build(3)] {
            for _ in 0..100 {
                assert!(contains(&population, selector.select(&population, &mut rng)));
            }
        }
    }

    #[test]
    fn test_large_tournament_finds_the_best() {
        let population = population(&[0.1, 0.9, 0.3, 0.2]);
        let mut rng = Pcg32::seed_from_u64(4);
        let chosen = Tournament::new(200).select(&population, &mut rng);
        assert!(Arc::ptr_eq(chosen, &population[1]));
    }

    #[test]
    fn test_roulette_weighs_by_absolute_fitness() {
        let population = population(&[0.0, 0.0, -5.0, 0.0]);
        let mut rng = Pcg32::seed_from_u64(5);
        let chosen = Roulette::new(200).select(&population, &mut rng);
        assert!(Arc::ptr_eq(chosen, &population[2]));

        // an all-zero wheel still yields a member
        let zeros = self::population(&[0.0, 0.0]);
        assert!(contains(&zeros, Roulette::new(4).select(&zeros, &mut rng)));
    }

    #[test]
    fn test_selection_type_from_config_text() {
        let kind: SelectionType = serde_json::from_str(r#""roulette""#).unwrap();
        assert_eq!(kind, SelectionType::Roulette);
        assert_eq!(SelectionType::default(), SelectionType::Tournament);
    }
}
