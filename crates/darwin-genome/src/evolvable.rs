//! The capability set shared by every genome variant.

use std::fmt;

use rand::Rng;

use crate::tree::Operand;

/// Parameters consumed by tree-shaped mutation.
///
/// Linear genomes ignore these.
#[derive(Debug, Clone, Default)]
pub struct MutateInfo {
    /// Operators an internal node may be rewritten to.
    pub operand_set: Vec<Operand>,
    /// Variable names a leaf may be rewritten to.
    pub variable_set: Vec<String>,
    /// Constant tokens a leaf may be rewritten to.
    pub terminal_set: Vec<String>,
    pub max_depth: usize,
}

/// Parameters consumed by crossover.
#[derive(Debug, Clone, Copy)]
pub struct CrossoverInfo {
    /// Number of cut points for multi-point crossover.
    pub crossover_points: usize,
    /// Children deeper than this are replaced by a copy of their parent.
    pub max_depth: usize,
}

/// A genome the engine can evolve.
///
/// `Clone` is a deep copy: mutating a clone never affects the original.
pub trait Evolvable: Clone + fmt::Debug + Send + Sync {
    /// Returns the stored fitness. Larger is better.
    fn fitness(&self) -> f64;

    /// Stores a fitness value.
    ///
    /// Fitness lives in shared storage, so this works through `&self`.
    fn set_fitness(&self, fitness: f64);

    /// Mutates the genome in place with the given per-gene rate.
    fn mutate<R>(&mut self, rate: f64, info: &MutateInfo, rng: &mut R)
    where
        R: Rng + ?Sized;

    /// Recombines two parents of the same variant into two new children.
    ///
    /// The parents are left untouched. The first child is built on `self`, the second on
    /// `other`. A child's fitness means nothing until it is evaluated.
    fn crossover<R>(&self, other: &Self, info: &CrossoverInfo, rng: &mut R) -> (Self, Self)
    where
        R: Rng + ?Sized;

    /// Returns a human-readable rendering of the genome.
    fn describe(&self) -> String;

    /// Returns whichever of `self` and `other` has the higher fitness.
    ///
    /// `self` wins only when strictly fitter, so a tie returns `other`.
    #[must_use]
    fn fitter<'a>(&'a self, other: &'a Self) -> &'a Self {
        if self.fitness() > other.fitness() {
            self
        } else {
            other
        }
    }
}
