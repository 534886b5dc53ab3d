//! Population containers.
//!
//! The engine sees a population only through [`Population`]: it reads and replaces the
//! slice being trained, asks for fitness evaluation, and notifies the container when a
//! generation has finished.
//!
//! # Shapes
//!
//! - [`GenericPopulation`] - one flat slice of individuals
//! - [`CoEvolvingPopulation`] - a weight-matrix slice and an action-tree slice of equal
//!   length. Only one of them is trained at a time; the other supplies partners for
//!   evaluation. The trained side switches every `switch_step` generations.
//!
//! # Evaluation
//!
//! A flat population is scored one individual at a time; a co-evolving population scores
//! each side against the other, so only it needs a separate re-evaluation pass.
//!
//! Fitness is computed on scoped worker threads, each owning a contiguous index range.
//! Scores are committed only once every worker has finished, so a cancelled evaluation
//! leaves all stored fitness values untouched.

use std::{cmp::Ordering, sync::Arc};

use darwin_fitness::FitnessEvaluator;
use darwin_genome::{Evolvable as _, Individual, WeightsAndActions, rng::GlobalRng};

use crate::{
    cancel::{CancellationToken, Cancelled},
    parallel,
};

/// How evaluation work is spread and stopped.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub workers: usize,
    /// Random stream family for this piece of work. Co-evolving evaluation also uses
    /// `phase + 1`.
    pub phase: u64,
    pub cancel: &'a CancellationToken,
}

/// A population the engine can evolve.
pub trait Population: Send {
    /// Returns member `index` of the trained slice.
    fn get(&self, index: usize) -> &Arc<Individual>;

    /// Size of the trained slice.
    fn count(&self) -> usize;

    /// The trained slice.
    fn individuals(&self) -> &[Arc<Individual>];

    /// Replaces the trained slice.
    fn set_population(&mut self, individuals: Vec<Arc<Individual>>);

    /// The population as a whole, best first.
    fn get_population(&self) -> Vec<Arc<Individual>>;

    /// Re-evaluates the trained slice from index `skip` on.
    ///
    /// Containers whose scores depend on partners also re-score the partners.
    fn calculate_fitnesses(
        &self,
        evaluator: &dyn FitnessEvaluator,
        skip: usize,
        ctx: &EvalContext<'_>,
    ) -> Result<(), Cancelled>;

    /// Whether a member's fitness depends on nothing but itself.
    ///
    /// The engine then scores offspring while breeding them instead of re-evaluating the
    /// installed slice.
    fn scores_standalone(&self) -> bool {
        true
    }

    /// Called once generation `generation` has been installed.
    fn update(&mut self, generation: usize);

    /// Stable sort of the trained slice, fittest first.
    fn sort_by_fitness(&mut self);
}

fn by_fitness_desc(a: &Arc<Individual>, b: &Arc<Individual>) -> Ordering {
    b.fitness()
        .partial_cmp(&a.fitness())
        .unwrap_or(Ordering::Equal)
}

fn commit(individuals: &[Arc<Individual>], scores: Vec<f64>) {
    for (individual, score) in individuals.iter().zip(scores) {
        individual.set_fitness(score);
    }
}

/// A single flat population.
#[derive(Debug, Clone, Default)]
pub struct GenericPopulation {
    individuals: Vec<Arc<Individual>>,
}

impl GenericPopulation {
    #[must_use]
    pub fn new(individuals: Vec<Arc<Individual>>) -> Self {
        Self { individuals }
    }

    /// Builds and evaluates `size` individuals in parallel.
    ///
    /// # Arguments
    ///
    /// * `size` - Number of individuals
    /// * `factory` - Builds the individual for a slot index
    /// * `evaluator` - Scores each individual right after construction
    /// * `ctx` - Worker count, random streams and cancellation
    pub fn build<F>(
        size: usize,
        factory: F,
        evaluator: &dyn FitnessEvaluator,
        ctx: &EvalContext<'_>,
    ) -> Result<Self, Cancelled>
    where
        F: Fn(usize, &mut GlobalRng) -> Individual + Sync,
    {
        let individuals = parallel::map_range(0..size, ctx.workers, ctx.phase, ctx.cancel, |i| {
            let individual = factory(i, &mut GlobalRng);
            individual.set_fitness(evaluator.evaluate(&individual));
            Arc::new(individual)
        })?;
        Ok(Self::new(individuals))
    }
}

impl Population for GenericPopulation {
    fn get(&self, index: usize) -> &Arc<Individual> {
        &self.individuals[index]
    }

    fn count(&self) -> usize {
        self.individuals.len()
    }

    fn individuals(&self) -> &[Arc<Individual>] {
        &self.individuals
    }

    fn set_population(&mut self, individuals: Vec<Arc<Individual>>) {
        self.individuals = individuals;
    }

    fn get_population(&self) -> Vec<Arc<Individual>> {
        let mut individuals = self.individuals.clone();
        individuals.sort_by(by_fitness_desc);
        individuals
    }

    fn calculate_fitnesses(
        &self,
        evaluator: &dyn FitnessEvaluator,
        skip: usize,
        ctx: &EvalContext<'_>,
    ) -> Result<(), Cancelled> {
        let skip = skip.min(self.individuals.len());
        let scores = parallel::map_range(
            skip..self.individuals.len(),
            ctx.workers,
            ctx.phase,
            ctx.cancel,
            |i| evaluator.evaluate(&self.individuals[i]),
        )?;
        commit(&self.individuals[skip..], scores);
        Ok(())
    }

    fn update(&mut self, _generation: usize) {}

    fn sort_by_fitness(&mut self) {
        self.individuals.sort_by(by_fitness_desc);
    }
}

/// How a co-evolving population alternates.
#[derive(Debug, Clone, Copy)]
pub struct CoEvolutionSettings {
    /// Generations between switches of the trained side; `0` never switches.
    pub switch_step: usize,
    pub train_weights_first: bool,
}

/// Weight matrices and action trees evolved in alternation.
#[derive(Debug, Clone)]
pub struct CoEvolvingPopulation {
    weights: Vec<Arc<Individual>>,
    trees: Vec<Arc<Individual>>,
    training_weights: bool,
    switch_step: usize,
}

impl CoEvolvingPopulation {
    /// # Panics
    ///
    /// Panics if the two slices differ in length.
    #[must_use]
    pub fn new(
        weights: Vec<Arc<Individual>>,
        trees: Vec<Arc<Individual>>,
        settings: CoEvolutionSettings,
    ) -> Self {
        assert_eq!(
            weights.len(),
            trees.len(),
            "co-evolving sub-populations must have the same size"
        );
        Self {
            weights,
            trees,
            training_weights: settings.train_weights_first,
            switch_step: settings.switch_step,
        }
    }

    /// Builds both sub-populations in parallel, then scores each against the other.
    ///
    /// Uses random streams `ctx.phase` to `ctx.phase + 3`.
    pub fn build<W, T>(
        size: usize,
        make_weights: W,
        make_trees: T,
        settings: CoEvolutionSettings,
        evaluator: &dyn FitnessEvaluator,
        ctx: &EvalContext<'_>,
    ) -> Result<Self, Cancelled>
    where
        W: Fn(usize, &mut GlobalRng) -> Individual + Sync,
        T: Fn(usize, &mut GlobalRng) -> Individual + Sync,
    {
        let weights = parallel::map_range(0..size, ctx.workers, ctx.phase, ctx.cancel, |i| {
            Arc::new(make_weights(i, &mut GlobalRng))
        })?;
        let trees = parallel::map_range(0..size, ctx.workers, ctx.phase + 1, ctx.cancel, |i| {
            Arc::new(make_trees(i, &mut GlobalRng))
        })?;
        let population = Self::new(weights, trees, settings);
        population.calculate_fitnesses(
            evaluator,
            0,
            &EvalContext {
                phase: ctx.phase + 2,
                ..*ctx
            },
        )?;
        Ok(population)
    }

    #[must_use]
    pub fn is_training_weights(&self) -> bool {
        self.training_weights
    }

    #[must_use]
    pub fn weights(&self) -> &[Arc<Individual>] {
        &self.weights
    }

    #[must_use]
    pub fn trees(&self) -> &[Arc<Individual>] {
        &self.trees
    }

    fn trained(&self) -> &Vec<Arc<Individual>> {
        if self.training_weights {
            &self.weights
        } else {
            &self.trees
        }
    }

    fn trained_mut(&mut self) -> &mut Vec<Arc<Individual>> {
        if self.training_weights {
            &mut self.weights
        } else {
            &mut self.trees
        }
    }

    fn partners(&self) -> &Vec<Arc<Individual>> {
        if self.training_weights {
            &self.trees
        } else {
            &self.weights
        }
    }
}

impl Population for CoEvolvingPopulation {
    fn get(&self, index: usize) -> &Arc<Individual> {
        &self.trained()[index]
    }

    fn count(&self) -> usize {
        self.trained().len()
    }

    fn individuals(&self) -> &[Arc<Individual>] {
        self.trained()
    }

    fn set_population(&mut self, individuals: Vec<Arc<Individual>>) {
        *self.trained_mut() = individuals;
    }

    /// Pairs the rank-`i` weights with the rank-`i` action trees.
    ///
    /// Each compound individual's fitness is the mean of its two components.
    fn get_population(&self) -> Vec<Arc<Individual>> {
        let mut weights = self.weights.clone();
        let mut trees = self.trees.clone();
        weights.sort_by(by_fitness_desc);
        trees.sort_by(by_fitness_desc);

        weights
            .iter()
            .zip(&trees)
            .map(|(w, t)| {
                let (Individual::Weights(matrix), Individual::ActionTrees(actions)) =
                    (w.as_ref(), t.as_ref())
                else {
                    panic!(
                        "cannot pair a {} genome with a {} genome",
                        w.kind(),
                        t.kind()
                    );
                };
                let agent = Individual::from(WeightsAndActions::new(
                    matrix.clone(),
                    actions.clone(),
                ));
                agent.set_fitness(f64::midpoint(w.fitness(), t.fitness()));
                Arc::new(agent)
            })
            .collect()
    }

    fn calculate_fitnesses(
        &self,
        evaluator: &dyn FitnessEvaluator,
        skip: usize,
        ctx: &EvalContext<'_>,
    ) -> Result<(), Cancelled> {
        let trained = self.trained();
        let partners = self.partners();
        let skip = skip.min(trained.len());

        let trained_scores =
            parallel::map_range(skip..trained.len(), ctx.workers, ctx.phase, ctx.cancel, |i| {
                evaluator.evaluate_against(&trained[i], partners)
            })?;
        let partner_scores = parallel::map_range(
            0..partners.len(),
            ctx.workers,
            ctx.phase + 1,
            ctx.cancel,
            |i| evaluator.evaluate_against(&partners[i], trained),
        )?;

        commit(&trained[skip..], trained_scores);
        commit(partners, partner_scores);
        Ok(())
    }

    fn scores_standalone(&self) -> bool {
        false
    }

    fn update(&mut self, generation: usize) {
        if self.switch_step > 0 && generation > 0 && generation % self.switch_step == 0 {
            self.training_weights = !self.training_weights;
            log::info!(
                "generation {generation}: now training {}",
                if self.training_weights {
                    "weights"
                } else {
                    "action trees"
                }
            );
        }
    }

    fn sort_by_fitness(&mut self) {
        self.trained_mut().sort_by(by_fitness_desc);
    }
}
