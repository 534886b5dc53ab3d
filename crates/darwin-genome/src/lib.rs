//! Genome representations and genetic operators.
//!
//! This crate defines everything an individual *is*, independent of how it is scored or
//! how a population evolves:
//!
//! - [`rng`] - the process-wide seedable random source
//! - [`evolvable`] - the [`Evolvable`] capability set (fitness, mutation, crossover)
//! - [`bit_string`], [`tree`], [`grammar`], [`weights`], [`action_tree`], [`compound`] -
//!   the genome variants
//! - [`individual`] - the [`Individual`] enum the engine stores
//!
//! # Genome Variants
//!
//! | Variant              | Mutation                          | Crossover                     |
//! |----------------------|-----------------------------------|-------------------------------|
//! | [`BitString`]        | gated per-bit flip                | multi-point                   |
//! | [`Tree`]             | point mutation (same shape)       | subtree exchange              |
//! | [`GrammarTree`]      | gated per-codon redraw            | multi-point on codons         |
//! | [`Weights`]          | additive uniform noise            | row-wise multi-point          |
//! | [`ActionTrees`]      | point mutation of every tree      | subtree exchange per action   |
//! | [`WeightsAndActions`]| both of the above                 | weights + whole-tree swaps    |
//!
//! # Randomness
//!
//! Operators are generic over [`rand::Rng`] like any rand-based code. The engine passes
//! [`rng::GlobalRng`] so that all draws come from the seeded process-wide source; tests
//! pass their own seeded generator.
//!
//! # Fitness
//!
//! Every variant stores its fitness in a [`Fitness`] cell: a finite `f64` that can be
//! written through a shared reference, since individuals are shared between generations.

pub mod action_tree;
pub mod bit_string;
pub mod compound;
pub mod crossover;
pub mod evolvable;
pub mod fitness;
pub mod grammar;
pub mod individual;
pub mod rng;
pub mod tree;
pub mod weights;

pub use self::{
    action_tree::{ActionSpec, ActionTrees},
    bit_string::BitString,
    compound::WeightsAndActions,
    evolvable::{CrossoverInfo, Evolvable, MutateInfo},
    fitness::{FAULT_PENALTY, Fitness},
    grammar::{Grammar, GrammarTree},
    individual::{GenomeKind, Individual, Structure},
    tree::{GrowMethod, Leaf, Node, Operand, Tree},
    weights::Weights,
};
