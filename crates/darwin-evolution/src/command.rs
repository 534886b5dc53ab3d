//! Commands accepted by the evolution engine.

/// Operator settings for one generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Generation number, counted from 1.
    pub generation: usize,
    pub crossover_points: usize,
    /// Probability that a pair of parents is recombined rather than copied.
    pub crossover_rate: f64,
    pub mutation_rate: f64,
    /// Share of the population carried over unchanged, in `(0, 1)`.
    pub elitism_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvolutionCommand {
    StartGeneration(GenerationParams),
    Stop,
}
