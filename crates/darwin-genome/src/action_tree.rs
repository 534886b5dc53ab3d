//! Per-action expression trees for the game agent.
//!
//! An [`ActionTrees`] genome holds one [`Tree`] per legal action component. At play time
//! each tree scores the output categories of its component; see the executor in the
//! fitness crate.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    evolvable::{CrossoverInfo, Evolvable, MutateInfo},
    fitness::Fitness,
    tree::{GrowMethod, Tree},
};

/// One component of the game action.
///
/// `value` is the number of categories the component can take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub value: usize,
}

/// One expression tree per action component, in action order.
#[derive(Debug, Clone)]
pub struct ActionTrees {
    trees: Vec<(String, Tree)>,
    fitness: Fitness,
}

impl ActionTrees {
    /// Builds one random tree per action, all with the same depth and method.
    pub fn random<R>(
        actions: &[ActionSpec],
        depth: usize,
        method: GrowMethod,
        info: &MutateInfo,
        rng: &mut R,
    ) -> Self
    where
        R: Rng + ?Sized,
    {
        Self::from_trees(
            actions
                .iter()
                .map(|action| (action.name.clone(), Tree::random(depth, method, info, rng)))
                .collect(),
        )
    }

    #[must_use]
    pub fn from_trees(trees: Vec<(String, Tree)>) -> Self {
        Self {
            trees,
            fitness: Fitness::default(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tree> {
        self.trees
            .iter()
            .find_map(|(action, tree)| (action == name).then_some(tree))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tree)> {
        self.trees.iter().map(|(name, tree)| (name.as_str(), tree))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Swaps whole trees between `self` and `other` by position, each with probability `p`.
    pub(crate) fn swap_trees<R>(&mut self, other: &mut Self, p: f64, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        for ((_, a), (_, b)) in self.trees.iter_mut().zip(other.trees.iter_mut()) {
            if rng.random_bool(p) {
                std::mem::swap(a, b);
            }
        }
    }
}

impl Evolvable for ActionTrees {
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
        for (_, tree) in &mut self.trees {
            tree.mutate(rate, info, rng);
        }
    }

    /// Subtree crossover between the trees of the same action.
    fn crossover<R>(&self, other: &Self, info: &CrossoverInfo, rng: &mut R) -> (Self, Self)
    where
        R: Rng + ?Sized,
    {
        let mut first = Vec::with_capacity(self.trees.len());
        let mut second = Vec::with_capacity(other.trees.len());
        for (name, tree) in &self.trees {
            match other.get(name) {
                Some(partner) => {
                    let (c1, c2) = tree.crossover(partner, info, rng);
                    first.push((name.clone(), c1));
                    second.push((name.clone(), c2));
                }
                None => first.push((name.clone(), tree.clone())),
            }
        }
        for (name, tree) in &other.trees {
            if self.get(name).is_none() {
                second.push((name.clone(), tree.clone()));
            }
        }
        let (c1, c2) = (Self::from_trees(first), Self::from_trees(second));
        c1.set_fitness(self.fitness());
        c2.set_fitness(other.fitness());
        (c1, c2)
    }

    fn describe(&self) -> String {
        self.trees
            .iter()
            .map(|(name, tree)| format!("{name}: {}", tree.describe()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
