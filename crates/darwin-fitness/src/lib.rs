//! Fitness evaluation for every genome variant.
//!
//! An evaluator turns an [`Individual`] into a finite fitness value (higher is better).
//! The engine calls evaluators from many worker threads at once, so they are `Send + Sync`
//! and take individuals by shared reference.
//!
//! # Evaluators
//!
//! - [`bit_string::OnesFraction`] - fraction of set bits
//! - [`regression::TreeRegression`] - symbolic regression: `-RMSE` against a target
//!   expression on fixed test cases
//! - [`regression::GrammarRegression`] - the same after decoding a codon genome
//! - [`game::GameEvaluator`] - plays games against a remote server, for compound agents
//!   and for co-evolving weights and action trees
//!
//! # Game Plumbing
//!
//! ```text
//! GameEvaluator
//!     | borrows clients from
//! ConnectionPool (pool)
//!     | of
//! GameClient (client) --- line-delimited JSON (protocol) ---> game server
//!     | each turn
//! ActionExecutor (executor) --- checked by ---> ActionValidator (validator)
//! ```
//!
//! # Errors
//!
//! Evaluation itself never fails: network failures are logged and scored as lost games,
//! and numerical faults are replaced with [`darwin_genome::FAULT_PENALTY`].

use std::sync::Arc;

use darwin_genome::Individual;

pub mod bit_string;
pub mod client;
pub mod executor;
pub mod expression;
pub mod game;
pub mod pool;
pub mod protocol;
pub mod regression;
pub mod validator;

/// Scores individuals.
pub trait FitnessEvaluator: Send + Sync {
    /// Scores an individual on its own.
    ///
    /// # Panics
    ///
    /// Panics if the evaluator does not handle the individual's genome variant.
    fn evaluate(&self, individual: &Individual) -> f64;

    /// Scores an individual against a set of partners from another sub-population.
    ///
    /// Evaluators without a notion of partners ignore them.
    fn evaluate_against(&self, individual: &Individual, partners: &[Arc<Individual>]) -> f64 {
        let _ = partners;
        self.evaluate(individual)
    }
}

/// Panics with a message naming the evaluator and the unexpected genome variant.
pub(crate) fn unsupported(evaluator: &str, individual: &Individual) -> ! {
    panic!(
        "{evaluator} cannot evaluate a {} genome",
        individual.kind()
    )
}
