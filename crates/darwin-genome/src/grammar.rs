//! Grammatical evolution: codon strings decoded into expression trees.
//!
//! A [`GrammarTree`] carries a string of integer codons. [`Grammar::decode`] walks a fixed
//! context-free grammar, consuming one codon at every choice and taking the alternative at
//! `codon % alternatives`:
//!
//! ```text
//! <expr>     ::= <expr> <operator> <expr> | <var>
//! <var>      ::= <variable> | <constant>
//! <variable> ::= one of the variable names
//! <constant> ::= one of the constant tokens
//! <operator> ::= one of the operators
//! ```
//!
//! # Termination
//!
//! The codon string wraps around up to [`MAX_WRAPS`] times. Once the depth cap is reached
//! or the codon supply is used up, `<expr>` may only take its terminal alternative `<var>`,
//! so decoding always terminates with a tree no deeper than the cap. Choices made without
//! codons take the first alternative.

use std::sync::OnceLock;

use rand::Rng;

use crate::{
    crossover,
    evolvable::{CrossoverInfo, Evolvable, MutateInfo},
    fitness::Fitness,
    tree::{Leaf, Node, Operand},
};

/// Number of extra passes over the codon string allowed while decoding.
pub const MAX_WRAPS: usize = 2;

/// Codons are drawn uniformly from `[0, CODON_LIMIT)`.
pub const CODON_LIMIT: u8 = 255;

/// The expression grammar, parameterised by its terminal sets.
#[derive(Debug, Clone)]
pub struct Grammar {
    operators: Vec<Operand>,
    variables: Vec<Leaf>,
    constants: Vec<Leaf>,
}

impl Grammar {
    /// Builds the grammar.
    ///
    /// # Panics
    ///
    /// Panics if there are no operators, or neither variables nor constants.
    #[must_use]
    pub fn new(operators: &[Operand], variables: &[String], constants: &[String]) -> Self {
        assert!(!operators.is_empty(), "grammar needs at least one operator");
        assert!(
            !variables.is_empty() || !constants.is_empty(),
            "grammar needs at least one variable or constant"
        );
        Self {
            operators: operators.to_vec(),
            variables: variables
                .iter()
                .map(|name| Leaf::Variable(name.clone()))
                .collect(),
            constants: constants.iter().map(|token| Leaf::parse(token)).collect(),
        }
    }

    /// Builds the grammar from the sets used by tree mutation.
    #[must_use]
    pub fn from_info(info: &MutateInfo) -> Self {
        Self::new(&info.operand_set, &info.variable_set, &info.terminal_set)
    }

    /// Decodes a codon string into a tree of depth at most `max_depth`.
    #[must_use]
    pub fn decode(&self, codons: &[u8], max_depth: usize) -> Node {
        let mut reader = CodonReader::new(codons);
        self.expr(0, max_depth, &mut reader)
    }

    fn expr(&self, depth: usize, max_depth: usize, reader: &mut CodonReader<'_>) -> Node {
        let terminal_only = depth >= max_depth || reader.is_exhausted();
        let recurse = !terminal_only && reader.choose(2) == 0;
        if !recurse {
            if terminal_only {
                // <var> is the only terminal alternative; its codon is still consumed.
                let _ = reader.choose(1);
            }
            return Node::Leaf(self.var(reader));
        }
        let left = self.expr(depth + 1, max_depth, reader);
        let op = self.operators[reader.choose(self.operators.len())];
        let right = self.expr(depth + 1, max_depth, reader);
        Node::branch(op, left, right)
    }

    fn var(&self, reader: &mut CodonReader<'_>) -> Leaf {
        let sets: Vec<&[Leaf]> = [self.variables.as_slice(), self.constants.as_slice()]
            .into_iter()
            .filter(|set| !set.is_empty())
            .collect();
        let set = sets[reader.choose(sets.len())];
        set[reader.choose(set.len())].clone()
    }
}

#[derive(Debug)]
struct CodonReader<'a> {
    codons: &'a [u8],
    reads: usize,
}

impl<'a> CodonReader<'a> {
    fn new(codons: &'a [u8]) -> Self {
        Self { codons, reads: 0 }
    }

    fn is_exhausted(&self) -> bool {
        self.reads >= self.codons.len() * (1 + MAX_WRAPS)
    }

    /// Picks an alternative in `[0, n)`, taking the first when no codon is left.
    fn choose(&mut self, n: usize) -> usize {
        if self.is_exhausted() || n == 0 {
            return 0;
        }
        let codon = self.codons[self.reads % self.codons.len()];
        self.reads += 1;
        usize::from(codon) % n
    }
}

/// A codon-string genome decoded through a [`Grammar`].
#[derive(Debug, Clone)]
pub struct GrammarTree {
    codons: Vec<u8>,
    phenotype: OnceLock<String>,
    fitness: Fitness,
}

impl GrammarTree {
    pub fn random<R>(len: usize, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        Self::from_codons((0..len).map(|_| rng.random_range(0..CODON_LIMIT)).collect())
    }

    #[must_use]
    pub fn from_codons(codons: Vec<u8>) -> Self {
        Self {
            codons,
            phenotype: OnceLock::new(),
            fitness: Fitness::default(),
        }
    }

    #[must_use]
    pub fn codons(&self) -> &[u8] {
        &self.codons
    }

    /// Decodes the genome and remembers the rendered expression for [`Evolvable::describe`].
    #[must_use]
    pub fn decode(&self, grammar: &Grammar, max_depth: usize) -> Node {
        let node = grammar.decode(&self.codons, max_depth);
        let _ = self.phenotype.set(node.to_string());
        node
    }
}

impl Evolvable for GrammarTree {
    fn fitness(&self) -> f64 {
        self.fitness.get()
    }

    fn set_fitness(&self, fitness: f64) {
        self.fitness.set(fitness);
    }

    /// Gated by a single Bernoulli(`rate`) draw; each codon is then redrawn with
    /// probability `rate`.
    fn mutate<R>(&mut self, rate: f64, _info: &MutateInfo, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        if rng.random::<f64>() >= rate {
            return;
        }
        for codon in &mut self.codons {
            if rng.random::<f64>() < rate {
                *codon = rng.random_range(0..CODON_LIMIT);
            }
        }
        self.phenotype = OnceLock::new();
    }

    fn crossover<R>(&self, other: &Self, info: &CrossoverInfo, rng: &mut R) -> (Self, Self)
    where
        R: Rng + ?Sized,
    {
        let (a, b) = crossover::multi_point(&self.codons, &other.codons, info.crossover_points, rng);
        let (c1, c2) = (Self::from_codons(a), Self::from_codons(b));
        c1.set_fitness(self.fitness());
        c2.set_fitness(other.fitness());
        (c1, c2)
    }

    fn describe(&self) -> String {
        match self.phenotype.get() {
            Some(expr) => expr.clone(),
            None => format!("{:?}", self.codons),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    use super::*;

    fn grammar() -> Grammar {
        Grammar::new(
            &[Operand::Add, Operand::Multiply],
            &["x".to_owned()],
            &["1".to_owned(), "2".to_owned()],
        )
    }

    #[test]
    fn test_decode_follows_codons() {
        // expr -> binary (0), left expr -> var (1), var -> variable (0), x (0),
        // operator -> * (1), right expr -> var (1), var -> constant (1), "2" (1)
        let node = grammar().decode(&[0, 1, 0, 0, 1, 1, 1, 1], 3);
        assert_eq!(node.to_string(), "(x * 2)");
    }

    #[test]
    fn test_depth_cap_forces_terminals() {
        // all-zero codons always pick the recursive alternative
        let codons = vec![0; 50];
        for max_depth in 0..4 {
            let node = grammar().decode(&codons, max_depth);
            assert_eq!(node.depth(), max_depth);
        }
    }

    #[test]
    fn test_decode_terminates_on_empty_and_short_genomes() {
        let node = grammar().decode(&[], 5);
        assert_eq!(node.to_string(), "x");

        let mut rng = Pcg32::seed_from_u64(8);
        for _ in 0..200 {
            let genome = GrammarTree::random(rng.random_range(1..6), &mut rng);
            let node = genome.decode(&grammar(), 4);
            assert!(node.depth() <= 4);
            assert_eq!(genome.describe(), node.to_string());
        }
    }

    #[test]
    fn test_constants_only_grammar() {
        let grammar = Grammar::new(&[Operand::Subtract], &[], &["3".to_owned()]);
        let node = grammar.decode(&[1, 0, 0], 2);
        assert_eq!(node.to_string(), "3");
    }

    #[test]
    fn test_mutate_and_crossover() {
        let mut rng = Pcg32::seed_from_u64(9);
        let a = GrammarTree::random(20, &mut rng);
        let b = GrammarTree::random(20, &mut rng);
        assert!(a.codons().iter().all(|&c| c < CODON_LIMIT));

        let mut same = a.clone();
        same.mutate(0.0, &MutateInfo::default(), &mut rng);
        assert_eq!(same.codons(), a.codons());

        let info = CrossoverInfo {
            crossover_points: 3,
            max_depth: 4,
        };
        let (c1, c2) = a.crossover(&b, &info, &mut rng);
        assert_eq!(c1.codons().len(), 20);
        for j in 0..20 {
            let mut pair = [c1.codons()[j], c2.codons()[j]];
            let mut parents = [a.codons()[j], b.codons()[j]];
            pair.sort_unstable();
            parents.sort_unstable();
            assert_eq!(pair, parents);
        }
    }
}
