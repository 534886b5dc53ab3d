//! Symbolic regression fitness.
//!
//! A fixed set of [`TestCase`]s is drawn once per run by evaluating the target function at
//! random bindings. A candidate tree scores `-RMSE` over the test cases, so a perfect fit
//! scores `0`. A candidate that divides by zero or produces a non-finite value on any test
//! case scores [`FAULT_PENALTY`].

use std::collections::HashMap;

use darwin_genome::{FAULT_PENALTY, Grammar, Individual, Node};
use rand::Rng;

use crate::{FitnessEvaluator, expression::TargetFunction};

/// Variables are drawn uniformly from `[-BINDING_RANGE, BINDING_RANGE]`.
pub const BINDING_RANGE: f64 = 5.0;

/// Draws per test case before giving up on a target that is undefined almost everywhere.
const MAX_DRAWS_PER_CASE: usize = 100;

/// Targets are rounded to this many decimal places.
const TARGET_DECIMALS: i32 = 6;

/// One input binding and the expected output.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub bindings: HashMap<String, f64>,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("target function is undefined at {draws} random points in a row")]
pub struct UndefinedTarget {
    draws: usize,
}

/// Generates `count` test cases.
///
/// Points where the target is undefined are redrawn.
///
/// # Arguments
///
/// * `target` - Function to sample
/// * `variables` - Names bound at each test case
/// * `count` - Number of test cases
/// * `rng` - Random number generator
pub fn generate_test_cases<R>(
    target: &dyn TargetFunction,
    variables: &[String],
    count: usize,
    rng: &mut R,
) -> Result<Vec<TestCase>, UndefinedTarget>
where
    R: Rng + ?Sized,
{
    let scale = 10f64.powi(TARGET_DECIMALS);
    let mut cases = Vec::with_capacity(count);
    for _ in 0..count {
        let mut draws = 0;
        loop {
            if draws == MAX_DRAWS_PER_CASE {
                return Err(UndefinedTarget { draws });
            }
            draws += 1;
            let bindings: HashMap<String, f64> = variables
                .iter()
                .map(|name| {
                    (
                        name.clone(),
                        rng.random_range(-BINDING_RANGE..=BINDING_RANGE),
                    )
                })
                .collect();
            if let Some(value) = target.evaluate(&bindings).filter(|v| v.is_finite()) {
                cases.push(TestCase {
                    bindings,
                    target: (value * scale).round() / scale,
                });
                break;
            }
        }
    }
    Ok(cases)
}

/// Scores a tree against test cases: `-RMSE`, or [`FAULT_PENALTY`] on any fault.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub fn score_tree(root: &Node, cases: &[TestCase]) -> f64 {
    if cases.is_empty() {
        return 0.0;
    }
    let mut sum_sq = 0.0;
    for case in cases {
        let eval = root.evaluate(&|name| case.bindings.get(name).copied());
        if eval.faulted {
            log::debug!("evaluation fault in `{root}`; applying penalty");
            return FAULT_PENALTY;
        }
        let err = eval.value - case.target;
        sum_sq += err * err;
    }
    let rmse = (sum_sq / cases.len() as f64).sqrt();
    if rmse.is_finite() {
        -rmse
    } else {
        log::debug!("non-finite error for `{root}`; applying penalty");
        FAULT_PENALTY
    }
}

/// Symbolic regression over expression trees.
#[derive(Debug, Clone)]
pub struct TreeRegression {
    cases: Vec<TestCase>,
}

impl TreeRegression {
    #[must_use]
    pub fn new(cases: Vec<TestCase>) -> Self {
        Self { cases }
    }

    #[must_use]
    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }
}

impl FitnessEvaluator for TreeRegression {
    fn evaluate(&self, individual: &Individual) -> f64 {
        match individual {
            Individual::Tree(tree) => score_tree(tree.root(), &self.cases),
            other => crate::unsupported("tree regression", other),
        }
    }
}

/// Symbolic regression over codon genomes, decoded through a grammar.
#[derive(Debug, Clone)]
pub struct GrammarRegression {
    cases: Vec<TestCase>,
    grammar: Grammar,
    max_depth: usize,
}

impl GrammarRegression {
    #[must_use]
    pub fn new(cases: Vec<TestCase>, grammar: Grammar, max_depth: usize) -> Self {
        Self {
            cases,
            grammar,
            max_depth,
        }
    }
}

impl FitnessEvaluator for GrammarRegression {
    fn evaluate(&self, individual: &Individual) -> f64 {
        match individual {
            Individual::GrammarTree(genome) => {
                let root = genome.decode(&self.grammar, self.max_depth);
                score_tree(&root, &self.cases)
            }
            other => crate::unsupported("grammar regression", other),
        }
    }
}
