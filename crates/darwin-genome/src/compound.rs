//! A weight matrix and a set of action trees evolved as a single unit.

use rand::Rng;

use crate::{
    action_tree::ActionTrees,
    evolvable::{CrossoverInfo, Evolvable, MutateInfo},
    fitness::Fitness,
    weights::Weights,
};

/// Probability that a given action tree changes hands during compound crossover.
pub const TREE_SWAP_PROBABILITY: f64 = 0.5;

/// A complete game agent: weights and action trees with one shared fitness.
#[derive(Debug, Clone)]
pub struct WeightsAndActions {
    weights: Weights,
    actions: ActionTrees,
    fitness: Fitness,
}

impl WeightsAndActions {
    #[must_use]
    pub fn new(weights: Weights, actions: ActionTrees) -> Self {
        Self {
            weights,
            actions,
            fitness: Fitness::default(),
        }
    }

    #[must_use]
    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    #[must_use]
    pub fn actions(&self) -> &ActionTrees {
        &self.actions
    }
}

impl Evolvable for WeightsAndActions {
    fn fitness(&self) -> f64 {
        self.fitness.get()
    }

    fn set_fitness(&self, fitness: f64) {
        self.fitness.set(fitness);
    }

    fn mutate<R>(&mut self, rate: f64, info: &MutateInfo, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        self.weights.mutate(rate, info, rng);
        self.actions.mutate(rate, info, rng);
    }

    /// Weights recombine with row-wise multi-point crossover; each action tree is handed
    /// to the other child with probability [`TREE_SWAP_PROBABILITY`].
    fn crossover<R>(&self, other: &Self, info: &CrossoverInfo, rng: &mut R) -> (Self, Self)
    where
        R: Rng + ?Sized,
    {
        let (w1, w2) = self.weights.crossover(&other.weights, info, rng);
        let mut a1 = self.actions.clone();
        let mut a2 = other.actions.clone();
        a1.swap_trees(&mut a2, TREE_SWAP_PROBABILITY, rng);
        let c1 = Self::new(w1, a1);
        let c2 = Self::new(w2, a2);
        c1.set_fitness(self.fitness());
        c2.set_fitness(other.fitness());
        (c1, c2)
    }

    fn describe(&self) -> String {
        format!(
            "weights:\n{}\nactions:\n{}",
            self.weights.describe(),
            self.actions.describe()
        )
    }
}
