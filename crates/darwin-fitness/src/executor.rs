//! Turning an agent's trees and weights into a game action.
//!
//! # Scoring
//!
//! Each weight-matrix row `r` stands for output category `r`. The row's values are bound
//! as `w0, w1, ...` next to the observation features, and every action tree whose
//! component has more than `r` categories is evaluated. This yields one score vector per
//! action component, indexed by category.
//!
//! # Choosing
//!
//! Scores become probabilities through [`softmax`]. The first candidate takes the most
//! likely category of every component ([`argmax`]); further candidates are drawn with
//! [`sample_categorical`]. The first candidate the [`ActionValidator`] accepts is played;
//! if none is accepted the agent passes.

use std::collections::HashMap;

use darwin_genome::{ActionSpec, ActionTrees, FAULT_PENALTY, Weights};
use rand::Rng;

use crate::{protocol::GameAction, validator::ActionValidator};

/// Exponents below this are clamped so every probability stays strictly positive.
const MIN_EXPONENT: f64 = -700.0;

/// Numerically stable softmax.
///
/// The maximum is subtracted before exponentiation. An empty input yields an empty output;
/// if the exponentials sum to zero, the distribution is uniform.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub fn softmax(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores
        .iter()
        .map(|&s| (s - max).max(MIN_EXPONENT).exp())
        .collect();
    let sum: f64 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.into_iter().map(|e| e / sum).collect()
    } else {
        vec![1.0 / scores.len() as f64; scores.len()]
    }
}

/// Index of the first maximum. Returns `0` for an empty slice.
#[must_use]
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Draws an index with probability proportional to `probabilities`, by cumulative sum.
///
/// Rounding shortfalls fall on the last index. Returns `0` for an empty slice.
pub fn sample_categorical<R>(probabilities: &[f64], rng: &mut R) -> usize
where
    R: Rng + ?Sized,
{
    let u: f64 = rng.random();
    let mut cumulative = 0.0;
    for (i, p) in probabilities.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return i;
        }
    }
    probabilities.len().saturating_sub(1)
}

/// Chooses actions for one agent.
#[derive(Debug, Clone)]
pub struct ActionExecutor<'a> {
    actions: &'a [ActionSpec],
    max_attempts: usize,
}

impl<'a> ActionExecutor<'a> {
    /// # Arguments
    ///
    /// * `actions` - Action components, in wire order
    /// * `max_attempts` - Sampled candidates tried after the most likely one
    #[must_use]
    pub fn new(actions: &'a [ActionSpec], max_attempts: usize) -> Self {
        Self {
            actions,
            max_attempts,
        }
    }

    /// Category probabilities for each action component.
    #[must_use]
    pub fn probabilities(
        &self,
        trees: &ActionTrees,
        weights: &Weights,
        features: &HashMap<String, f64>,
    ) -> Vec<Vec<f64>> {
        let mut scores = vec![Vec::new(); self.actions.len()];
        for row in 0..weights.rows() {
            let bindings = |name: &str| {
                name.strip_prefix('w')
                    .and_then(|index| index.parse::<usize>().ok())
                    .filter(|&col| col < weights.cols())
                    .map(|col| weights.get(row, col))
                    .or_else(|| features.get(name).copied())
            };
            for (action, scores) in self.actions.iter().zip(&mut scores) {
                if action.value <= row {
                    continue;
                }
                let score = trees.get(&action.name).map_or(0.0, |tree| {
                    let eval = tree.evaluate(&bindings);
                    if eval.faulted {
                        FAULT_PENALTY
                    } else {
                        eval.value
                    }
                });
                scores.push(score);
            }
        }
        scores.iter().map(|s| softmax(s)).collect()
    }

    /// Picks the action to play this turn.
    pub fn select<R>(
        &self,
        trees: &ActionTrees,
        weights: &Weights,
        features: &HashMap<String, f64>,
        validator: &ActionValidator,
        owned: Option<&[Vec<bool>]>,
        rng: &mut R,
    ) -> GameAction
    where
        R: Rng + ?Sized,
    {
        let probabilities = self.probabilities(trees, weights, features);
        let candidate = |pick: &mut dyn FnMut(&[f64]) -> usize| {
            let mut components = [0; 5];
            for (slot, p) in components.iter_mut().zip(&probabilities) {
                *slot = pick(p);
            }
            GameAction::new(components)
        };

        let best = candidate(&mut |p: &[f64]| argmax(p));
        if validator.is_valid(&best, owned) {
            return best;
        }
        for _ in 0..self.max_attempts {
            let sampled = candidate(&mut |p: &[f64]| sample_categorical(p, rng));
            if validator.is_valid(&sampled, owned) {
                return sampled;
            }
        }
        GameAction::PASS
    }
}

#[cfg(test)]
mod tests {
    use darwin_genome::{Node, Operand, Tree};
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    use super::*;

    fn specs() -> Vec<ActionSpec> {
        [("pass", 2), ("row", 3), ("col", 3), ("direction", 4), ("split", 2)]
            .into_iter()
            .map(|(name, value)| ActionSpec {
                name: name.to_owned(),
                value,
            })
            .collect()
    }

    fn trees(pass: Node, row: Node) -> ActionTrees {
        ActionTrees::from_trees(vec![
            ("pass".to_owned(), Tree::new(pass)),
            ("row".to_owned(), Tree::new(row)),
            ("col".to_owned(), Tree::new(Node::variable("w0"))),
            ("direction".to_owned(), Tree::new(Node::constant(0.0))),
            ("split".to_owned(), Tree::new(Node::constant(0.0))),
        ])
    }

    #[test]
    fn test_softmax_is_a_distribution() {
        for scores in [
            vec![1.0, 2.0, 3.0],
            vec![0.0],
            vec![-1e4, 0.0, 1e4],
            vec![1e300, -1e300],
            vec![5.0, 5.0, 5.0, 5.0],
        ] {
            let p = softmax(&scores);
            assert_eq!(p.len(), scores.len());
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-10);
            assert!(p.iter().all(|&x| x > 0.0 && x <= 1.0));
        }
        assert!(softmax(&[]).is_empty());
    }

    #[test]
    fn test_argmax_takes_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_sample_categorical_follows_distribution() {
        let mut rng = Pcg32::seed_from_u64(1);
        assert_eq!(sample_categorical(&[0.0, 1.0, 0.0], &mut rng), 1);
        let mut counts = [0; 2];
        for _ in 0..10_000 {
            counts[sample_categorical(&[0.25, 0.75], &mut rng)] += 1;
        }
        assert!((2_000..3_000).contains(&counts[0]));
    }

    #[test]
    fn test_rows_bind_weight_inputs() {
        // col tree returns w0: row values 0, 5, 1 make category 1 the most likely
        let weights = Weights::from_values(3, 2, vec![0.0, 9.0, 5.0, 9.0, 1.0, 9.0]);
        let specs = specs();
        let executor = ActionExecutor::new(&specs[..], 4);
        let probs = executor.probabilities(
            &trees(Node::constant(0.0), Node::variable("army")),
            &weights,
            &HashMap::from([("army".to_owned(), 2.0)]),
        );
        assert_eq!(probs.len(), 5);
        assert_eq!(probs[0].len(), 2);
        assert_eq!(probs[1].len(), 3);
        assert_eq!(argmax(&probs[2]), 1);
        // row tree reads the same feature for every category
        assert!((probs[1][0] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_select_prefers_valid_argmax_then_passes() {
        let weights = Weights::from_values(3, 1, vec![0.0, 5.0, 1.0]);
        let actions = specs();
        let executor = ActionExecutor::new(&actions, 8);
        // pass scores: category 0 favoured; row tree favours category via w0
        let agent = trees(
            Node::branch(Operand::Multiply, Node::variable("w0"), Node::constant(-10.0)),
            Node::variable("w0"),
        );
        let mut rng = Pcg32::seed_from_u64(2);

        let open = ActionValidator::default();
        let action = executor.select(&agent, &weights, &HashMap::new(), &open, None, &mut rng);
        assert_eq!(action.components(), [0, 1, 1, 0, 0]);

        // every cell is a mountain: nothing but a pass can be legal
        let blocked = ActionValidator::new(vec![vec![true; 3]; 3]);
        let action = executor.select(&agent, &weights, &HashMap::new(), &blocked, None, &mut rng);
        assert_eq!(action, GameAction::PASS);
    }
}
