//! Generational evolution of [`darwin_genome::Individual`] populations.
//!
//! # Architecture
//!
//! ```text
//! runner --EvolutionCommand--> EvolutionEngine (controller thread)
//!                                  | owns
//!                                  v
//!                              Population ----- FitnessEvaluator
//!                                  | per generation
//!                                  v
//!                         GenerationMetrics --try_send--> MetricsStreamer --> subscribers
//! ```
//!
//! # Modules
//!
//! - [`engine`] - command-driven generation loop with elitism and cancellation
//! - [`population`] - flat and co-evolving population containers
//! - [`selection`] - tournament and roulette parent selection
//! - [`metrics`] - per-generation summaries and their non-blocking fan-out
//! - [`command`] - engine commands
//! - [`cancel`] - cooperative cancellation token
//!
//! # Determinism
//!
//! All random draws go through [`darwin_genome::rng`]. Parallel work is split into
//! contiguous index chunks and each chunk draws from its own seeded stream, so a run with
//! a fixed seed and worker count is reproducible.

pub mod cancel;
pub mod command;
pub mod engine;
pub mod metrics;
mod parallel;
pub mod population;
pub mod selection;

pub use self::{
    cancel::{CancellationToken, Cancelled},
    command::{EvolutionCommand, GenerationParams},
    engine::{EngineSettings, EvolutionEngine},
    metrics::{GenerationMetrics, MetricsStreamer},
    population::{
        CoEvolutionSettings, CoEvolvingPopulation, EvalContext, GenericPopulation, Population,
    },
    selection::{Roulette, SelectionType, Selector, Tournament},
};

// Tests that reseed the process-wide random source.
#[cfg(test)]
static SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());
