//! Bit-string fitness.

use darwin_genome::Individual;

use crate::FitnessEvaluator;

/// Scores a bit string by the fraction of bits set, in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnesFraction;

impl FitnessEvaluator for OnesFraction {
    fn evaluate(&self, individual: &Individual) -> f64 {
        match individual {
            Individual::BitString(bits) => bits.ones_fraction(),
            other => crate::unsupported("bit-string evaluator", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use darwin_genome::{BitString, Node, Tree};

    use super::*;

    #[test]
    fn test_ones_fraction() {
        let individual = BitString::from_bits(vec![true, true, false, true, false]).into();
        assert!((OnesFraction.evaluate(&individual) - 0.6).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "bit-string evaluator cannot evaluate a tree genome")]
    fn test_wrong_variant_panics() {
        let individual = Tree::new(Node::constant(1.0)).into();
        let _ = OnesFraction.evaluate(&individual);
    }
}
