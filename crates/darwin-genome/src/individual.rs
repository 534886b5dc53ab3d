//! The closed set of genome variants handled by the engine.

use rand::Rng;

use crate::{
    action_tree::ActionTrees,
    bit_string::BitString,
    compound::WeightsAndActions,
    evolvable::{CrossoverInfo, Evolvable, MutateInfo},
    grammar::GrammarTree,
    tree::Tree,
    weights::Weights,
};

/// Name of a genome variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum GenomeKind {
    #[display("bitstring")]
    BitString,
    #[display("tree")]
    Tree,
    #[display("grammar_tree")]
    GrammarTree,
    #[display("action_tree")]
    ActionTrees,
    #[display("weights")]
    Weights,
    #[display("compound")]
    Compound,
}

/// Size statistics of a tree-shaped genome.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Structure {
    pub depth: usize,
    pub nodes: usize,
}

/// A genome of any supported variant.
///
/// Recombining two individuals of different variants is a programming error and panics.
#[derive(Debug, Clone, derive_more::From, derive_more::IsVariant)]
pub enum Individual {
    BitString(BitString),
    Tree(Tree),
    GrammarTree(GrammarTree),
    ActionTrees(ActionTrees),
    Weights(Weights),
    Compound(WeightsAndActions),
}

macro_rules! dispatch {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Individual::BitString($inner) => $body,
            Individual::Tree($inner) => $body,
            Individual::GrammarTree($inner) => $body,
            Individual::ActionTrees($inner) => $body,
            Individual::Weights($inner) => $body,
            Individual::Compound($inner) => $body,
        }
    };
}

impl Individual {
    #[must_use]
    pub fn kind(&self) -> GenomeKind {
        match self {
            Individual::BitString(_) => GenomeKind::BitString,
            Individual::Tree(_) => GenomeKind::Tree,
            Individual::GrammarTree(_) => GenomeKind::GrammarTree,
            Individual::ActionTrees(_) => GenomeKind::ActionTrees,
            Individual::Weights(_) => GenomeKind::Weights,
            Individual::Compound(_) => GenomeKind::Compound,
        }
    }

    /// Depth and node count for tree-shaped genomes.
    ///
    /// Action-tree genomes report their deepest tree and their total node count. Grammar
    /// genomes have no tree until decoded and report `None`.
    #[must_use]
    pub fn structure(&self) -> Option<Structure> {
        let of_trees = |trees: &ActionTrees| {
            trees.iter().fold(Structure::default(), |acc, (_, tree)| Structure {
                depth: acc.depth.max(tree.depth()),
                nodes: acc.nodes + tree.size(),
            })
        };
        match self {
            Individual::Tree(tree) => Some(Structure {
                depth: tree.depth(),
                nodes: tree.size(),
            }),
            Individual::ActionTrees(trees) => Some(of_trees(trees)),
            Individual::Compound(agent) => Some(of_trees(agent.actions())),
            Individual::BitString(_) | Individual::GrammarTree(_) | Individual::Weights(_) => {
                None
            }
        }
    }
}

impl Evolvable for Individual {
    fn fitness(&self) -> f64 {
        dispatch!(self, inner => inner.fitness())
    }

    fn set_fitness(&self, fitness: f64) {
        dispatch!(self, inner => inner.set_fitness(fitness));
    }

    fn mutate<R>(&mut self, rate: f64, info: &MutateInfo, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        dispatch!(self, inner => inner.mutate(rate, info, rng));
    }

    fn crossover<R>(&self, other: &Self, info: &CrossoverInfo, rng: &mut R) -> (Self, Self)
    where
        R: Rng + ?Sized,
    {
        fn pair<T: Into<Individual>>((a, b): (T, T)) -> (Individual, Individual) {
            (a.into(), b.into())
        }
        match (self, other) {
            (Individual::BitString(a), Individual::BitString(b)) => pair(a.crossover(b, info, rng)),
            (Individual::Tree(a), Individual::Tree(b)) => pair(a.crossover(b, info, rng)),
            (Individual::GrammarTree(a), Individual::GrammarTree(b)) => {
                pair(a.crossover(b, info, rng))
            }
            (Individual::ActionTrees(a), Individual::ActionTrees(b)) => {
                pair(a.crossover(b, info, rng))
            }
            (Individual::Weights(a), Individual::Weights(b)) => pair(a.crossover(b, info, rng)),
            (Individual::Compound(a), Individual::Compound(b)) => pair(a.crossover(b, info, rng)),
            (a, b) => panic!("cannot cross a {} genome with a {} genome", a.kind(), b.kind()),
        }
    }

    fn describe(&self) -> String {
        dispatch!(self, inner => inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    use super::*;
    use crate::tree::{Node, Operand};

    fn info() -> CrossoverInfo {
        CrossoverInfo {
            crossover_points: 1,
            max_depth: 3,
        }
    }

    #[test]
    fn test_dispatch_preserves_variant() {
        let mut rng = Pcg32::seed_from_u64(1);
        let a: Individual = BitString::random(10, &mut rng).into();
        let b: Individual = BitString::random(10, &mut rng).into();
        let (c1, c2) = a.crossover(&b, &info(), &mut rng);
        assert!(c1.is_bit_string());
        assert!(c2.is_bit_string());
        assert_eq!(c1.kind(), GenomeKind::BitString);
        assert_eq!(c1.kind().to_string(), "bitstring");
    }

    #[test]
    #[should_panic(expected = "cannot cross a bitstring genome with a tree genome")]
    fn test_mismatched_crossover_panics() {
        let mut rng = Pcg32::seed_from_u64(2);
        let a: Individual = BitString::random(4, &mut rng).into();
        let b: Individual = Tree::new(Node::constant(1.0)).into();
        let _ = a.crossover(&b, &info(), &mut rng);
    }

    #[test]
    fn test_fitter_prefers_other_on_tie() {
        let a: Individual = BitString::from_bits(vec![true]).into();
        let b: Individual = BitString::from_bits(vec![false]).into();
        a.set_fitness(0.5);
        b.set_fitness(0.5);
        assert_eq!(a.fitter(&b).describe(), "0");
        assert_eq!(b.fitter(&a).describe(), "1");
        a.set_fitness(0.6);
        assert_eq!(a.fitter(&b).describe(), "1");
        assert_eq!(b.fitter(&a).describe(), "1");
    }

    #[test]
    fn test_structure() {
        let tree: Individual = Tree::new(Node::branch(
            Operand::Add,
            Node::variable("x"),
            Node::constant(1.0),
        ))
        .into();
        assert_eq!(tree.structure(), Some(Structure { depth: 1, nodes: 3 }));
        let bits: Individual = BitString::from_bits(vec![true]).into();
        assert_eq!(bits.structure(), None);
    }
}
