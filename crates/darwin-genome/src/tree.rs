//! Binary expression trees.
//!
//! A tree is built from [`Node`]s: leaves hold a variable name or a numeric constant,
//! internal nodes hold an [`Operand`] and exactly two children. Because internal nodes
//! own both children in the same variant, a node with a single child cannot be built.
//!
//! # Construction
//!
//! - [`GrowMethod::Full`] grows every branch to exactly the requested depth.
//! - [`GrowMethod::Grow`] always splits the root, then stops each branch at random.
//! - [`ramped_half_and_half`] assigns a depth and a method to each population slot so the
//!   initial population covers every depth from `1` to the initial depth.
//!
//! # Evaluation
//!
//! [`Node::evaluate`] substitutes variable bindings and folds the tree. Division by zero
//! and non-finite intermediate values are reported through [`Evaluation::faulted`] rather
//! than returned as `NaN`, so fitness functions can penalize them.

use std::{fmt, str::FromStr};

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

use crate::{
    evolvable::{CrossoverInfo, Evolvable, MutateInfo},
    fitness::Fitness,
};

/// A binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, Serialize, Deserialize)]
pub enum Operand {
    #[display("+")]
    #[serde(rename = "+")]
    Add,
    #[display("-")]
    #[serde(rename = "-")]
    Subtract,
    #[display("*")]
    #[serde(rename = "*")]
    Multiply,
    #[display("/")]
    #[serde(rename = "/")]
    Divide,
}

impl Operand {
    pub const ALL: [Operand; 4] = [
        Operand::Add,
        Operand::Subtract,
        Operand::Multiply,
        Operand::Divide,
    ];

    /// Applies the operator. Returns `None` on division by zero.
    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> Option<f64> {
        match self {
            Operand::Add => Some(lhs + rhs),
            Operand::Subtract => Some(lhs - rhs),
            Operand::Multiply => Some(lhs * rhs),
            Operand::Divide => (rhs != 0.0).then(|| lhs / rhs),
        }
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("unknown operator `{token}`")]
pub struct ParseOperandError {
    token: String,
}

impl FromStr for Operand {
    type Err = ParseOperandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.to_string() == s.trim())
            .ok_or_else(|| ParseOperandError {
                token: s.to_owned(),
            })
    }
}

/// A leaf value: either a named variable or a constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    Variable(String),
    Constant(f64),
}

impl Leaf {
    /// Parses a token, treating anything that reads as a number as a constant.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token.trim().parse::<f64>() {
            Ok(value) => Leaf::Constant(value),
            Err(_) => Leaf::Variable(token.trim().to_owned()),
        }
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leaf::Variable(name) => f.write_str(name),
            Leaf::Constant(value) => write!(f, "{value}"),
        }
    }
}

/// The result of folding a tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub value: f64,
    /// Set when a division by zero or a non-finite value occurred anywhere in the tree.
    pub faulted: bool,
}

/// A node of an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Leaf),
    Branch {
        op: Operand,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    #[must_use]
    pub fn branch(op: Operand, left: Node, right: Node) -> Self {
        Node::Branch {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn variable(name: &str) -> Self {
        Node::Leaf(Leaf::Variable(name.to_owned()))
    }

    #[must_use]
    pub fn constant(value: f64) -> Self {
        Node::Leaf(Leaf::Constant(value))
    }

    /// Number of edges on the longest root-to-leaf path. A lone leaf has depth `0`.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf(_) => 0,
            Node::Branch { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Total number of nodes.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Branch { left, right, .. } => 1 + left.size() + right.size(),
        }
    }

    #[must_use]
    pub fn has_variable(&self) -> bool {
        match self {
            Node::Leaf(leaf) => matches!(leaf, Leaf::Variable(_)),
            Node::Branch { left, right, .. } => left.has_variable() || right.has_variable(),
        }
    }

    /// Folds the tree with the given variable bindings.
    ///
    /// Unbound variables evaluate to `0.0`.
    pub fn evaluate(&self, bindings: &dyn Fn(&str) -> Option<f64>) -> Evaluation {
        match self {
            Node::Leaf(Leaf::Constant(value)) => Evaluation {
                value: *value,
                faulted: !value.is_finite(),
            },
            Node::Leaf(Leaf::Variable(name)) => {
                let value = bindings(name).unwrap_or(0.0);
                Evaluation {
                    value,
                    faulted: !value.is_finite(),
                }
            }
            Node::Branch { op, left, right } => {
                let lhs = left.evaluate(bindings);
                let rhs = right.evaluate(bindings);
                match op.apply(lhs.value, rhs.value) {
                    Some(value) => Evaluation {
                        value,
                        faulted: lhs.faulted || rhs.faulted || !value.is_finite(),
                    },
                    None => Evaluation {
                        value: 0.0,
                        faulted: true,
                    },
                }
            }
        }
    }

    /// Returns the node at `index` in pre-order (the root is `0`).
    #[must_use]
    pub fn nth(&self, mut index: usize) -> Option<&Node> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if index == 0 {
                return Some(node);
            }
            index -= 1;
            if let Node::Branch { left, right, .. } = node {
                stack.push(right);
                stack.push(left);
            }
        }
        None
    }

    /// Mutable counterpart of [`Node::nth`].
    pub fn nth_mut(&mut self, mut index: usize) -> Option<&mut Node> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if index == 0 {
                return Some(node);
            }
            index -= 1;
            if let Node::Branch { left, right, .. } = node {
                stack.push(right);
                stack.push(left);
            }
        }
        None
    }

    fn random<R>(
        level: usize,
        depth: usize,
        method: GrowMethod,
        operands: &[Operand],
        leaves: &[Leaf],
        rng: &mut R,
    ) -> Self
    where
        R: Rng + ?Sized,
    {
        let split = level < depth
            && match method {
                GrowMethod::Full => true,
                GrowMethod::Grow => level == 0 || rng.random_bool(0.5),
            };
        if !split {
            return Node::Leaf(random_leaf(leaves, rng));
        }
        let op = *operands.choose(rng).expect("operand set is empty");
        let left = Self::random(level + 1, depth, method, operands, leaves, rng);
        let right = Self::random(level + 1, depth, method, operands, leaves, rng);
        Node::branch(op, left, right)
    }

    /// Point mutation, children before parents.
    fn mutate<R>(&mut self, rate: f64, operands: &[Operand], leaves: &[Leaf], rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        match self {
            Node::Leaf(leaf) => {
                if rng.random::<f64>() < rate
                    && let Some(other) = pick_other(leaves, leaf, rng)
                {
                    *leaf = other;
                }
            }
            Node::Branch { op, left, right } => {
                left.mutate(rate, operands, leaves, rng);
                right.mutate(rate, operands, leaves, rng);
                if rng.random::<f64>() < rate
                    && let Some(other) = pick_other(operands, op, rng)
                {
                    *op = other;
                }
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Leaf(leaf) => leaf.fmt(f),
            Node::Branch { op, left, right } => write!(f, "({left} {op} {right})"),
        }
    }
}

fn random_leaf<R>(leaves: &[Leaf], rng: &mut R) -> Leaf
where
    R: Rng + ?Sized,
{
    leaves.choose(rng).expect("leaf set is empty").clone()
}

/// Picks an element of `choices` different from `current`, if there is one.
fn pick_other<T, R>(choices: &[T], current: &T, rng: &mut R) -> Option<T>
where
    T: Clone + PartialEq,
    R: Rng + ?Sized,
{
    let others: Vec<&T> = choices.iter().filter(|c| *c != current).collect();
    others.choose(rng).map(|c| (*c).clone())
}

impl MutateInfo {
    /// Every value a leaf may take: the variables followed by the parsed constants.
    #[must_use]
    pub fn leaves(&self) -> Vec<Leaf> {
        self.variable_set
            .iter()
            .map(|name| Leaf::Variable(name.clone()))
            .chain(self.terminal_set.iter().map(|token| Leaf::parse(token)))
            .collect()
    }
}

/// How a random tree is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum GrowMethod {
    Full,
    Grow,
}

/// Computes the depth and shape of population slot `index` under ramped half-and-half.
///
/// The population is divided into `initial_depth` groups, one per depth `1..=initial_depth`.
/// Sizes differ by at most one; the remainder goes to the shallowest groups. Within each
/// group the first half uses [`GrowMethod::Grow`] and the rest [`GrowMethod::Full`].
#[must_use]
pub fn ramped_half_and_half(
    index: usize,
    population_size: usize,
    initial_depth: usize,
) -> (usize, GrowMethod) {
    let groups = initial_depth.max(1);
    let base = population_size / groups;
    let remainder = population_size % groups;

    let mut start = 0;
    for group in 0..groups {
        let size = base + usize::from(group < remainder);
        if index < start + size || group == groups - 1 {
            let local = index.saturating_sub(start);
            let method = if local < size / 2 {
                GrowMethod::Grow
            } else {
                GrowMethod::Full
            };
            return (group + 1, method);
        }
        start += size;
    }
    unreachable!("groups is at least one")
}

/// An expression tree genome.
#[derive(Debug, Clone)]
pub struct Tree {
    root: Node,
    fitness: Fitness,
}

impl Tree {
    #[must_use]
    pub fn new(root: Node) -> Self {
        Self {
            root,
            fitness: Fitness::default(),
        }
    }

    /// Builds a random tree.
    ///
    /// # Arguments
    ///
    /// * `depth` - Target depth (exact for [`GrowMethod::Full`], an upper bound otherwise)
    /// * `method` - Shape of the tree
    /// * `info` - Source of the operator, variable and constant sets
    /// * `rng` - Random number generator
    ///
    /// # Panics
    ///
    /// Panics if `info` has no operators (and `depth > 0`) or no leaves.
    pub fn random<R>(depth: usize, method: GrowMethod, info: &MutateInfo, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let leaves = info.leaves();
        Self::new(Node::random(
            0,
            depth,
            method,
            &info.operand_set,
            &leaves,
            rng,
        ))
    }

    #[must_use]
    pub fn root(&self) -> &Node {
        &self.root
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.root.size()
    }

    /// A tree without variables scores every input the same.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        !self.root.has_variable()
    }

    pub fn evaluate(&self, bindings: &dyn Fn(&str) -> Option<f64>) -> Evaluation {
        self.root.evaluate(bindings)
    }

    fn crossover_point<R>(&self, rng: &mut R) -> usize
    where
        R: Rng + ?Sized,
    {
        match self.size() {
            0 | 1 => 0,
            size => rng.random_range(1..size),
        }
    }
}

impl Evolvable for Tree {
    fn fitness(&self) -> f64 {
        self.fitness.get()
    }

    fn set_fitness(&self, fitness: f64) {
        self.fitness.set(fitness);
    }

    /// Rewrites each leaf to a different leaf, and each operator to a different operator,
    /// independently with probability `rate`. The shape never changes.
    fn mutate<R>(&mut self, rate: f64, info: &MutateInfo, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        let leaves = info.leaves();
        self.root.mutate(rate, &info.operand_set, &leaves, rng);
    }

    /// Subtree crossover: a random non-root node of each parent is exchanged. A child
    /// deeper than `max_depth` is replaced by a copy of its parent. Children inherit their
    /// parent's fitness until re-evaluated.
    fn crossover<R>(&self, other: &Self, info: &CrossoverInfo, rng: &mut R) -> (Self, Self)
    where
        R: Rng + ?Sized,
    {
        let i = self.crossover_point(rng);
        let j = other.crossover_point(rng);

        let graft = |base: &Tree, at: usize, donor: &Tree, from: usize| {
            let mut root = base.root.clone();
            if let (Some(slot), Some(subtree)) = (root.nth_mut(at), donor.root.nth(from)) {
                *slot = subtree.clone();
            }
            if root.depth() > info.max_depth {
                root = base.root.clone();
            }
            let child = Tree::new(root);
            child.set_fitness(base.fitness());
            child
        };

        (graft(self, i, other, j), graft(other, j, self, i))
    }

    fn describe(&self) -> String {
        self.root.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    use super::*;

    fn info() -> MutateInfo {
        MutateInfo {
            operand_set: Operand::ALL.to_vec(),
            variable_set: vec!["x".to_owned(), "y".to_owned()],
            terminal_set: vec!["1".to_owned(), "2.5".to_owned()],
            max_depth: 4,
        }
    }

    fn bind<'a>(vars: &'a HashMap<&'a str, f64>) -> impl Fn(&str) -> Option<f64> + 'a {
        |name| vars.get(name).copied()
    }

    fn no_binary_node_with_one_child(node: &Node) -> bool {
        // Enforced by the type; check the traversal sees two children everywhere.
        match node {
            Node::Leaf(_) => true,
            Node::Branch { left, right, .. } => {
                no_binary_node_with_one_child(left) && no_binary_node_with_one_child(right)
            }
        }
    }

    #[test]
    fn test_operand_parse_and_display() {
        for op in Operand::ALL {
            assert_eq!(op.to_string().parse::<Operand>().unwrap(), op);
        }
        assert!("%".parse::<Operand>().is_err());
        assert_eq!(Operand::Divide.apply(1.0, 0.0), None);
        assert_eq!(Operand::Multiply.apply(3.0, 2.0), Some(6.0));
    }

    #[test]
    fn test_evaluate_expression() {
        // (x * 2) + (3 * 2)
        let tree = Node::branch(
            Operand::Add,
            Node::branch(Operand::Multiply, Node::variable("x"), Node::constant(2.0)),
            Node::branch(Operand::Multiply, Node::constant(3.0), Node::constant(2.0)),
        );
        let vars = HashMap::from([("x", 1.5)]);
        let eval = tree.evaluate(&bind(&vars));
        assert!(!eval.faulted);
        assert!((eval.value - 9.0).abs() < 1e-12);
        assert_eq!(tree.to_string(), "((x * 2) + (3 * 2))");
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.size(), 7);
    }

    #[test]
    fn test_division_by_zero_faults() {
        let tree = Node::branch(
            Operand::Add,
            Node::constant(1.0),
            Node::branch(Operand::Divide, Node::variable("x"), Node::variable("y")),
        );
        let vars = HashMap::from([("x", 1.0), ("y", 0.0)]);
        let eval = tree.evaluate(&bind(&vars));
        assert!(eval.faulted);
        assert!(eval.value.is_finite());
    }

    #[test]
    fn test_constant_trees_have_no_variables() {
        let constant = Tree::new(Node::branch(
            Operand::Multiply,
            Node::constant(2.0),
            Node::constant(3.0),
        ));
        assert!(constant.is_constant());
        let nested = Tree::new(Node::branch(
            Operand::Add,
            Node::constant(1.0),
            Node::branch(Operand::Subtract, Node::constant(4.0), Node::variable("x")),
        ));
        assert!(!nested.is_constant());
        assert!(!Tree::new(Node::variable("w0")).is_constant());
    }

    #[test]
    fn test_unbound_variable_is_zero() {
        let eval = Node::variable("z").evaluate(&|_| None);
        assert!(!eval.faulted);
        assert!(eval.value.abs() < f64::EPSILON);
    }

    #[test]
    fn test_full_tree_has_exact_depth() {
        let mut rng = Pcg32::seed_from_u64(1);
        for depth in 0..5 {
            let tree = Tree::random(depth, GrowMethod::Full, &info(), &mut rng);
            assert_eq!(tree.depth(), depth);
            assert_eq!(tree.size(), (1 << (depth + 1)) - 1);
        }
    }

    #[test]
    fn test_grow_tree_is_bounded() {
        let mut rng = Pcg32::seed_from_u64(2);
        for _ in 0..100 {
            let tree = Tree::random(3, GrowMethod::Grow, &info(), &mut rng);
            assert!((1..=3).contains(&tree.depth()));
            assert!(no_binary_node_with_one_child(tree.root()));
        }
    }

    #[test]
    fn test_ramped_half_and_half_layout() {
        // 10 slots, 3 depths: groups of 4, 3, 3
        let plan: Vec<_> = (0..10).map(|i| ramped_half_and_half(i, 10, 3)).collect();
        assert_eq!(plan[0], (1, GrowMethod::Grow));
        assert_eq!(plan[1], (1, GrowMethod::Grow));
        assert_eq!(plan[2], (1, GrowMethod::Full));
        assert_eq!(plan[3], (1, GrowMethod::Full));
        assert_eq!(plan[4], (2, GrowMethod::Grow));
        assert_eq!(plan[5], (2, GrowMethod::Full));
        assert_eq!(plan[6], (2, GrowMethod::Full));
        assert_eq!(plan[7], (3, GrowMethod::Grow));
        assert_eq!(plan[9], (3, GrowMethod::Full));
    }

    #[test]
    fn test_mutation_keeps_shape() {
        let mut rng = Pcg32::seed_from_u64(3);
        let original = Tree::random(3, GrowMethod::Full, &info(), &mut rng);
        let mut mutated = original.clone();
        mutated.mutate(1.0, &info(), &mut rng);
        assert_eq!(mutated.size(), original.size());
        assert_eq!(mutated.depth(), original.depth());
        assert_ne!(mutated.describe(), original.describe());

        let mut unchanged = original.clone();
        unchanged.mutate(0.0, &info(), &mut rng);
        assert_eq!(unchanged.root(), original.root());
    }

    #[test]
    fn test_crossover_respects_max_depth_and_parents() {
        let mut rng = Pcg32::seed_from_u64(4);
        let a = Tree::random(3, GrowMethod::Full, &info(), &mut rng);
        let b = Tree::random(3, GrowMethod::Grow, &info(), &mut rng);
        let (a_text, b_text) = (a.describe(), b.describe());
        let cross = CrossoverInfo {
            crossover_points: 1,
            max_depth: 4,
        };
        for _ in 0..50 {
            let (c1, c2) = a.crossover(&b, &cross, &mut rng);
            assert!(c1.depth() <= 4);
            assert!(c2.depth() <= 4);
            assert!(no_binary_node_with_one_child(c1.root()));
            assert!(no_binary_node_with_one_child(c2.root()));
        }
        assert_eq!(a.describe(), a_text);
        assert_eq!(b.describe(), b_text);
    }

    #[test]
    fn test_crossover_of_leaves_swaps_whole_trees() {
        let mut rng = Pcg32::seed_from_u64(5);
        let a = Tree::new(Node::variable("x"));
        let b = Tree::new(Node::constant(2.0));
        a.set_fitness(-1.0);
        let cross = CrossoverInfo {
            crossover_points: 1,
            max_depth: 4,
        };
        let (c1, c2) = a.crossover(&b, &cross, &mut rng);
        assert_eq!(c1.describe(), "2");
        assert_eq!(c2.describe(), "x");
        assert!((c1.fitness() + 1.0).abs() < f64::EPSILON);
    }
}
