//! Real-valued weight matrices.
//!
//! A [`Weights`] genome is a `rows x cols` matrix. In the game setting each row is one
//! output category of an action component and each column feeds an input variable
//! `w{col}` of the action trees.

use std::fmt::Write as _;

use rand::Rng;

use crate::{
    crossover,
    evolvable::{CrossoverInfo, Evolvable, MutateInfo},
    fitness::Fitness,
};

/// Initial values are drawn uniformly from `[-INIT_RANGE, INIT_RANGE]`.
pub const INIT_RANGE: f64 = 5.0;

/// Mutation adds `U(-INIT_RANGE, INIT_RANGE) * MUTATION_SCALE` to a weight.
pub const MUTATION_SCALE: f64 = 0.3;

/// A dense weight matrix genome.
#[derive(Debug, Clone)]
pub struct Weights {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
    fitness: Fitness,
}

impl Weights {
    pub fn random<R>(rows: usize, cols: usize, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let values = (0..rows * cols)
            .map(|_| rng.random_range(-INIT_RANGE..=INIT_RANGE))
            .collect();
        Self::from_values(rows, cols, values)
    }

    /// Builds a matrix from row-major values.
    ///
    /// # Panics
    ///
    /// Panics if `values.len() != rows * cols`.
    #[must_use]
    pub fn from_values(rows: usize, cols: usize, values: Vec<f64>) -> Self {
        assert_eq!(values.len(), rows * cols, "weight matrix shape mismatch");
        Self {
            rows,
            cols,
            values,
            fitness: Fitness::default(),
        }
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    /// Names of the input variables fed by one row, `w0..w{cols-1}`.
    #[must_use]
    pub fn input_names(cols: usize) -> Vec<String> {
        (0..cols).map(|c| format!("w{c}")).collect()
    }
}

impl Evolvable for Weights {
    fn fitness(&self) -> f64 {
        self.fitness.get()
    }

    fn set_fitness(&self, fitness: f64) {
        self.fitness.set(fitness);
    }

    fn mutate<R>(&mut self, rate: f64, _info: &MutateInfo, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        for value in &mut self.values {
            if rng.random::<f64>() < rate {
                *value += rng.random_range(-INIT_RANGE..=INIT_RANGE) * MUTATION_SCALE;
            }
        }
    }

    /// Row-wise multi-point crossover: the same cut columns apply to every row, and the
    /// exchange pattern restarts at the beginning of each row.
    fn crossover<R>(&self, other: &Self, info: &CrossoverInfo, rng: &mut R) -> (Self, Self)
    where
        R: Rng + ?Sized,
    {
        assert_eq!(
            (self.rows, self.cols),
            (other.rows, other.cols),
            "crossover between weight matrices of different shape"
        );
        let points = crossover::cut_points(rng, self.cols, info.crossover_points);
        let mut a = self.values.clone();
        let mut b = other.values.clone();
        if self.cols > 0 {
            for (row_a, row_b) in a.chunks_mut(self.cols).zip(b.chunks_mut(self.cols)) {
                crossover::exchange_segments(row_a, row_b, &points);
            }
        }
        let c1 = Self::from_values(self.rows, self.cols, a);
        let c2 = Self::from_values(other.rows, other.cols, b);
        c1.set_fitness(self.fitness());
        c2.set_fitness(other.fitness());
        (c1, c2)
    }

    fn describe(&self) -> String {
        let mut out = String::new();
        for r in 0..self.rows {
            let cells: Vec<String> = self.row(r).iter().map(|v| format!("{v:.3}")).collect();
            let _ = writeln!(out, "[{}]", cells.join(", "));
        }
        out.trim_end().to_owned()
    }
}
