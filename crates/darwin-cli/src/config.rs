//! Run configuration.
//!
//! A configuration is a JSON document with one section per concern. Exactly one genome
//! section (`bitstring`, `tree`, `grammar_tree` or `action_tree`) must be enabled. Grammar
//! and action-tree runs borrow the operator, variable and constant sets of the `tree`
//! section.
//!
//! ```json
//! {
//!   "evolution": { "population_size": 100, "generations": 50, "seed": 42, ... },
//!   "bitstring": { "enabled": true, "genome_size": 50 },
//!   "logging": { "level": "info" }
//! }
//! ```
//!
//! [`Config::validate`] checks every constraint up front so a run never starts with
//! settings the engine would reject.

use std::{fmt, path::PathBuf, time::Duration};

use darwin_evolution::SelectionType;
use darwin_fitness::expression::{ExpressionError, TargetExpression};
use darwin_genome::{ActionSpec, Operand};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.json";

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Config {
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub bitstring: BitStringConfig,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub grammar_tree: GrammarTreeConfig,
    #[serde(default)]
    pub action_tree: ActionTreeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub crossover_point_count: usize,
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    pub mutation_rate: f64,
    pub generations: usize,
    pub elitism_percentage: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub selection_type: SelectionType,
    #[serde(default = "default_selection_size")]
    pub selection_size: usize,
    /// Worker threads; defaults to the available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_crossover_rate() -> f64 {
    1.0
}

fn default_selection_size() -> usize {
    3
}

#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct BitStringConfig {
    pub enabled: bool,
    pub genome_size: usize,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct TreeConfig {
    pub enabled: bool,
    pub operand_set: Vec<Operand>,
    pub variable_set: Vec<String>,
    pub terminal_set: Vec<String>,
    pub max_depth: usize,
    pub initial_depth: usize,
    pub target_function: String,
    pub test_case_count: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            operand_set: Operand::ALL.to_vec(),
            variable_set: vec!["x".to_owned()],
            terminal_set: vec!["1".to_owned(), "2".to_owned(), "3".to_owned()],
            max_depth: 6,
            initial_depth: 3,
            target_function: String::new(),
            test_case_count: 10,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct GrammarTreeConfig {
    pub enabled: bool,
    pub genome_size: usize,
    pub max_depth: usize,
}

impl Default for GrammarTreeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            genome_size: 32,
            max_depth: 6,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ActionTreeConfig {
    pub enabled: bool,
    pub server_addr: String,
    pub opponent_type: String,
    pub max_steps: usize,
    pub actions: Vec<ActionSpec>,
    /// Rows of the weight matrix; one per output category.
    pub weights_count: usize,
    /// Columns of the weight matrix, bound as `w0, w1, ...`.
    pub weights_column_count: usize,
    pub train_weights_first: bool,
    pub switch_training_target_step: usize,
    pub selection_percentage: f64,
    pub pool_size: usize,
    pub test_case_count: usize,
    /// Connection timeout such as `"5s"` or `"500ms"`.
    pub timeout: String,
    /// Evolve weights and action trees as separate populations.
    pub coevolve: bool,
    /// Partners sampled per evaluation; `0` uses the whole partner population.
    pub partner_sample_size: usize,
    pub reward_exponent: f64,
    pub max_action_attempts: usize,
    /// Taken off a game's reward for each action component whose tree has no variables.
    pub constant_action_penalty: f64,
}

impl Default for ActionTreeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_addr: "127.0.0.1:5000".to_owned(),
            opponent_type: "random".to_owned(),
            max_steps: 500,
            actions: Vec::new(),
            weights_count: 0,
            weights_column_count: 2,
            train_weights_first: true,
            switch_training_target_step: 5,
            selection_percentage: 0.5,
            pool_size: 8,
            test_case_count: 3,
            timeout: "5s".to_owned(),
            coevolve: true,
            partner_sample_size: 0,
            reward_exponent: 1.0,
            max_action_attempts: 8,
            constant_action_penalty: 10.0,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// File receiving every metrics record as a JSON line.
    pub output: Option<PathBuf>,
    /// Generations between metrics log lines; defaults to a tenth of the run.
    pub log_interval: Option<usize>,
}

/// The enabled genome section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenomeChoice {
    BitString,
    Tree,
    GrammarTree,
    ActionTree,
}

impl fmt::Display for GenomeChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GenomeChoice::BitString => "bitstring",
            GenomeChoice::Tree => "tree",
            GenomeChoice::GrammarTree => "grammar_tree",
            GenomeChoice::ActionTree => "action_tree",
        })
    }
}

/// A violated configuration constraint.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ConfigError {
    #[display("population_size must be greater than 0")]
    PopulationSize,
    #[display("generations must be greater than 0")]
    Generations,
    #[display("crossover_point_count must be at least 1")]
    CrossoverPoints,
    #[display("mutation_rate must be between 0 and 1, got {value}")]
    MutationRate { value: f64 },
    #[display("crossover_rate must be between 0 and 1, got {value}")]
    CrossoverRate { value: f64 },
    #[display("elitism_percentage must be greater than 0 and less than 1, got {value}")]
    ElitismPercentage { value: f64 },
    #[display("selection_size must be at least 1")]
    SelectionSize,
    #[display("workers must be at least 1")]
    Workers,
    #[display("exactly one genome section must be enabled, found {enabled}")]
    GenomeSections { enabled: usize },
    #[display("{section}.genome_size must be greater than 0")]
    GenomeSize { section: &'static str },
    #[display("tree.{name} must not be empty")]
    EmptySet { name: &'static str },
    #[display("tree depths must satisfy max_depth >= initial_depth >= 1, got {max_depth} and {initial_depth}")]
    Depth {
        max_depth: usize,
        initial_depth: usize,
    },
    #[display("grammar_tree.max_depth must be at least 1")]
    GrammarDepth,
    #[display("{section}.test_case_count must be at least 1")]
    TestCaseCount { section: &'static str },
    #[display("invalid tree.target_function {text:?}")]
    TargetFunction {
        text: String,
        source: ExpressionError,
    },
    #[display("action_tree.actions must not be empty")]
    NoActions,
    #[display("action_tree.weights_count must be at least {required} (the largest action value), got {weights_count}")]
    WeightsCount {
        weights_count: usize,
        required: usize,
    },
    #[display("action_tree.weights_column_count must be at least 1")]
    WeightsColumns,
    #[display("action_tree.pool_size must be at least 1")]
    PoolSize,
    #[display("action_tree.selection_percentage must be in (0, 1], got {value}")]
    SelectionPercentage { value: f64 },
    #[display("action_tree.max_steps must be at least 1")]
    MaxSteps,
    #[display("action_tree.constant_action_penalty must be finite and non-negative, got {value}")]
    ConstantActionPenalty { value: f64 },
    #[display("invalid action_tree.timeout {text:?}")]
    Timeout { text: String },
}

impl Config {
    /// Checks every constraint and returns the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.evolution.validate()?;
        match self.genome()? {
            GenomeChoice::BitString => {
                if self.bitstring.genome_size == 0 {
                    return Err(ConfigError::GenomeSize {
                        section: "bitstring",
                    });
                }
            }
            GenomeChoice::Tree => self.tree.validate()?,
            GenomeChoice::GrammarTree => {
                self.tree.validate()?;
                if self.grammar_tree.genome_size == 0 {
                    return Err(ConfigError::GenomeSize {
                        section: "grammar_tree",
                    });
                }
                if self.grammar_tree.max_depth == 0 {
                    return Err(ConfigError::GrammarDepth);
                }
            }
            GenomeChoice::ActionTree => {
                self.tree.validate_sets()?;
                self.action_tree.validate()?;
            }
        }
        Ok(())
    }

    /// The single enabled genome section.
    pub fn genome(&self) -> Result<GenomeChoice, ConfigError> {
        let enabled: Vec<GenomeChoice> = [
            (self.bitstring.enabled, GenomeChoice::BitString),
            (self.tree.enabled, GenomeChoice::Tree),
            (self.grammar_tree.enabled, GenomeChoice::GrammarTree),
            (self.action_tree.enabled, GenomeChoice::ActionTree),
        ]
        .into_iter()
        .filter_map(|(on, choice)| on.then_some(choice))
        .collect();
        match enabled.as_slice() {
            [choice] => Ok(*choice),
            _ => Err(ConfigError::GenomeSections {
                enabled: enabled.len(),
            }),
        }
    }

    /// Worker threads to use.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.evolution.workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        })
    }

    /// Generations between metrics log lines.
    #[must_use]
    pub fn log_interval(&self) -> usize {
        self.metrics
            .log_interval
            .unwrap_or(self.evolution.generations / 10)
            .max(1)
    }

    /// One-line description of the run, for logs and `check-config`.
    #[must_use]
    pub fn summary(&self) -> String {
        let evolution = &self.evolution;
        let genome = match self.genome() {
            Ok(GenomeChoice::BitString) => format!("bitstring[{}]", self.bitstring.genome_size),
            Ok(GenomeChoice::Tree) => format!(
                "tree(target {}, depth {}..{})",
                self.tree.target_function, self.tree.initial_depth, self.tree.max_depth
            ),
            Ok(GenomeChoice::GrammarTree) => format!(
                "grammar_tree[{}](target {})",
                self.grammar_tree.genome_size, self.tree.target_function
            ),
            Ok(GenomeChoice::ActionTree) => format!(
                "action_tree({} actions, {}x{} weights, server {}{})",
                self.action_tree.actions.len(),
                self.action_tree.weights_count,
                self.action_tree.weights_column_count,
                self.action_tree.server_addr,
                if self.action_tree.coevolve {
                    ", co-evolving"
                } else {
                    ""
                }
            ),
            Err(_) => "no genome".to_owned(),
        };
        format!(
            "{genome}: population {}, {} generations, seed {}, {:?} selection of {}, \
             crossover {} x{}, mutation {}, elitism {}",
            evolution.population_size,
            evolution.generations,
            evolution.seed,
            evolution.selection_type,
            evolution.selection_size,
            evolution.crossover_rate,
            evolution.crossover_point_count,
            evolution.mutation_rate,
            evolution.elitism_percentage,
        )
    }
}

impl EvolutionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::PopulationSize);
        }
        if self.generations == 0 {
            return Err(ConfigError::Generations);
        }
        if self.crossover_point_count == 0 {
            return Err(ConfigError::CrossoverPoints);
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(ConfigError::MutationRate {
                value: self.mutation_rate,
            });
        }
        if !(0.0..=1.0).contains(&self.crossover_rate) {
            return Err(ConfigError::CrossoverRate {
                value: self.crossover_rate,
            });
        }
        if !(self.elitism_percentage > 0.0 && self.elitism_percentage < 1.0) {
            return Err(ConfigError::ElitismPercentage {
                value: self.elitism_percentage,
            });
        }
        if self.selection_size == 0 {
            return Err(ConfigError::SelectionSize);
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Workers);
        }
        Ok(())
    }
}

impl TreeConfig {
    fn validate_sets(&self) -> Result<(), ConfigError> {
        if self.operand_set.is_empty() {
            return Err(ConfigError::EmptySet {
                name: "operand_set",
            });
        }
        if self.variable_set.is_empty() && self.terminal_set.is_empty() {
            return Err(ConfigError::EmptySet {
                name: "variable_set/terminal_set",
            });
        }
        if !(self.max_depth >= self.initial_depth && self.initial_depth >= 1) {
            return Err(ConfigError::Depth {
                max_depth: self.max_depth,
                initial_depth: self.initial_depth,
            });
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_sets()?;
        if self.variable_set.is_empty() {
            return Err(ConfigError::EmptySet {
                name: "variable_set",
            });
        }
        if self.test_case_count == 0 {
            return Err(ConfigError::TestCaseCount { section: "tree" });
        }
        self.target()?;
        Ok(())
    }

    /// Parses the target function.
    pub fn target(&self) -> Result<TargetExpression, ConfigError> {
        self.target_function
            .parse()
            .map_err(|source| ConfigError::TargetFunction {
                text: self.target_function.clone(),
                source,
            })
    }
}

impl ActionTreeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.actions.is_empty() {
            return Err(ConfigError::NoActions);
        }
        let required = self.actions.iter().map(|a| a.value).max().unwrap_or(0);
        if self.weights_count < required {
            return Err(ConfigError::WeightsCount {
                weights_count: self.weights_count,
                required,
            });
        }
        if self.weights_column_count == 0 {
            return Err(ConfigError::WeightsColumns);
        }
        if self.pool_size == 0 {
            return Err(ConfigError::PoolSize);
        }
        if !(self.selection_percentage > 0.0 && self.selection_percentage <= 1.0) {
            return Err(ConfigError::SelectionPercentage {
                value: self.selection_percentage,
            });
        }
        if self.test_case_count == 0 {
            return Err(ConfigError::TestCaseCount {
                section: "action_tree",
            });
        }
        if self.max_steps == 0 {
            return Err(ConfigError::MaxSteps);
        }
        if !(self.constant_action_penalty.is_finite() && self.constant_action_penalty >= 0.0) {
            return Err(ConfigError::ConstantActionPenalty {
                value: self.constant_action_penalty,
            });
        }
        self.timeout()?;
        Ok(())
    }

    /// Parses the connection timeout.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.timeout).ok_or_else(|| ConfigError::Timeout {
            text: self.timeout.clone(),
        })
    }
}

/// Parses durations such as `"5s"`, `"500ms"`, `"1m30s"` or `"2"` (seconds).
///
/// Supported units are `ms`, `s`, `m` and `h`. Returns `None` for empty or malformed text
/// and for a zero duration.
#[must_use]
pub fn parse_duration(text: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut rest = text.trim();
    if rest.is_empty() {
        return None;
    }
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "" | "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
        rest = &rest[unit_len..];
    }
    (!total.is_zero()).then_some(total)
}
