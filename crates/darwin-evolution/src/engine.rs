//! The generational engine.
//!
//! The engine owns the population on a dedicated controller thread and advances it one
//! generation per [`EvolutionCommand::StartGeneration`]. It stops on
//! [`EvolutionCommand::Stop`], when the command channel closes, or when its
//! [`CancellationToken`] fires.
//!
//! # Generation Step
//!
//! 1. Stable-sort the trained slice, fittest first.
//! 2. Carry the first `floor(size * elitism_pct)` individuals over unchanged.
//! 3. Fill the rest in parallel: select two parents, recombine them with probability
//!    `crossover_rate` (otherwise copy them), mutate both children, keep the fitter one.
//!    When the population scores individuals on their own, both children are evaluated
//!    after mutation, so the kept child is the fitter one as it actually is.
//! 4. Install the new slice. Populations scored against partners re-evaluate everything
//!    except the elites here; a standalone population already carries fresh scores.
//! 5. Sort again, so a finished generation always lists its best individual first.
//! 6. Publish a [`GenerationMetrics`] record without blocking.
//!
//! A cancelled step is rolled back: the population stays at the last completed generation
//! and no metrics are published for it.

use std::{
    panic,
    sync::{
        Arc,
        mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use darwin_fitness::FitnessEvaluator;
use darwin_genome::{CrossoverInfo, Evolvable as _, Individual, MutateInfo, rng::GlobalRng};
use rand::Rng as _;

use crate::{
    cancel::{CancellationToken, Cancelled},
    command::{EvolutionCommand, GenerationParams},
    metrics::GenerationMetrics,
    parallel,
    population::{EvalContext, Population},
    selection::Selector,
};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Random stream phases used per generation: breeding, evaluation, partner evaluation.
const PHASES_PER_GENERATION: u64 = 4;

/// Number of elites for a population of `size`.
#[must_use]
#[expect(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn elite_count(size: usize, elitism_pct: f64) -> usize {
    ((size as f64 * elitism_pct).floor() as usize).min(size)
}

/// Fixed engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Worker threads for breeding and evaluation.
    pub workers: usize,
    /// Operand, variable and terminal sets and depth bound for tree mutation.
    pub mutate_info: MutateInfo,
}

/// Everything the controller thread owns.
struct Controller {
    population: Box<dyn Population>,
    selector: Box<dyn Selector>,
    evaluator: Arc<dyn FitnessEvaluator>,
    settings: EngineSettings,
    commands: Receiver<EvolutionCommand>,
    metrics: SyncSender<GenerationMetrics>,
    cancel: CancellationToken,
}

/// Drives generations on a background thread.
pub struct EvolutionEngine {
    controller: Option<Controller>,
    handle: Option<JoinHandle<Box<dyn Population>>>,
    population: Option<Box<dyn Population>>,
    cancel: CancellationToken,
}

impl EvolutionEngine {
    /// # Arguments
    ///
    /// * `population` - Initial population, already evaluated
    /// * `selector` - Parent selection strategy
    /// * `evaluator` - Fitness function
    /// * `settings` - Worker count and mutation parameters
    /// * `commands` - Inbound command stream
    /// * `metrics` - Outbound metrics stream; records are dropped when it is full
    /// * `cancel` - Stops the engine at its next suspension point
    #[must_use]
    pub fn new(
        population: Box<dyn Population>,
        selector: Box<dyn Selector>,
        evaluator: Arc<dyn FitnessEvaluator>,
        settings: EngineSettings,
        commands: Receiver<EvolutionCommand>,
        metrics: SyncSender<GenerationMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            controller: Some(Controller {
                population,
                selector,
                evaluator,
                settings,
                commands,
                metrics,
                cancel: cancel.clone(),
            }),
            handle: None,
            population: None,
            cancel,
        }
    }

    /// Spawns the controller thread. Calling it again has no effect.
    pub fn start(&mut self) {
        if let Some(controller) = self.controller.take() {
            self.handle = Some(thread::spawn(move || controller.run()));
        }
    }

    /// Waits for the controller thread to finish.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the controller thread.
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(population) => self.population = Some(population),
                Err(payload) => panic::resume_unwind(payload),
            }
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The final population, once [`wait`](Self::wait) has returned.
    #[must_use]
    pub fn get_population(&self) -> Option<Vec<Arc<Individual>>> {
        self.population.as_ref().map(|p| p.get_population())
    }
}

impl Controller {
    fn run(mut self) -> Box<dyn Population> {
        loop {
            if self.cancel.is_cancelled() {
                log::info!("evolution cancelled");
                break;
            }
            match self.commands.recv_timeout(POLL_INTERVAL) {
                Ok(EvolutionCommand::StartGeneration(params)) => match self.step(&params) {
                    Ok(metrics) => self.publish(metrics),
                    Err(Cancelled) => {
                        log::info!("generation {} abandoned", params.generation);
                        break;
                    }
                },
                Ok(EvolutionCommand::Stop) => {
                    log::info!("evolution stopped");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.population
    }

    fn step(&mut self, params: &GenerationParams) -> Result<GenerationMetrics, Cancelled> {
        let start = Instant::now();
        log::debug!("generation {} started", params.generation);
        let phase = (params.generation as u64 + 1) * PHASES_PER_GENERATION;

        self.population.sort_by_fitness();
        let current = self.population.individuals().to_vec();
        let size = current.len();
        let elites = elite_count(size, params.elitism_pct);
        let standalone = self.population.scores_standalone();

        let breeder = Breeder {
            parents: &current,
            selector: self.selector.as_ref(),
            evaluator: standalone.then_some(self.evaluator.as_ref()),
            mutate_info: &self.settings.mutate_info,
            crossover: CrossoverInfo {
                crossover_points: params.crossover_points,
                max_depth: self.settings.mutate_info.max_depth,
            },
            params,
        };
        let children = parallel::map_range(
            elites..size,
            self.settings.workers,
            phase,
            &self.cancel,
            |_| Arc::new(breeder.offspring()),
        )?;

        let mut next = Vec::with_capacity(size);
        next.extend(current[..elites].iter().cloned());
        next.extend(children);
        self.population.set_population(next);

        if !standalone {
            let ctx = EvalContext {
                workers: self.settings.workers,
                phase: phase + 1,
                cancel: &self.cancel,
            };
            let evaluated =
                self.population
                    .calculate_fitnesses(self.evaluator.as_ref(), elites, &ctx);
            if let Err(err) = evaluated {
                self.population.set_population(current);
                return Err(err);
            }
        }
        self.population.sort_by_fitness();

        let metrics = GenerationMetrics::compute(
            params.generation,
            start.elapsed(),
            self.population.individuals(),
        );
        self.population.update(params.generation);
        log::debug!(
            "generation {} completed in {:.3}s: best {:.6}",
            params.generation,
            metrics.duration.as_secs_f64(),
            metrics.best
        );
        Ok(metrics)
    }

    fn publish(&self, metrics: GenerationMetrics) {
        match self.metrics.try_send(metrics) {
            Ok(()) => {}
            Err(TrySendError::Full(metrics)) => {
                log::debug!("metrics channel full; generation {} dropped", metrics.generation);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Read-only view used by breeding workers.
struct Breeder<'a> {
    parents: &'a [Arc<Individual>],
    selector: &'a dyn Selector,
    /// Scores children before one is kept; `None` leaves them unscored.
    evaluator: Option<&'a dyn FitnessEvaluator>,
    mutate_info: &'a MutateInfo,
    crossover: CrossoverInfo,
    params: &'a GenerationParams,
}

impl Breeder<'_> {
    fn offspring(&self) -> Individual {
        let mut rng = GlobalRng;
        let first = self.selector.select(self.parents, &mut rng);
        let second = self.selector.select(self.parents, &mut rng);

        let (mut a, mut b) = if rng.random::<f64>() < self.params.crossover_rate {
            first.crossover(second, &self.crossover, &mut rng)
        } else {
            (Individual::clone(first), Individual::clone(second))
        };
        a.mutate(self.params.mutation_rate, self.mutate_info, &mut rng);
        b.mutate(self.params.mutation_rate, self.mutate_info, &mut rng);
        if let Some(evaluator) = self.evaluator {
            a.set_fitness(evaluator.evaluate(&a));
            b.set_fitness(evaluator.evaluate(&b));
        }

        // same rule as `Evolvable::fitter`: a tie keeps the second child
        if a.fitness() > b.fitness() { a } else { b }
    }
}
