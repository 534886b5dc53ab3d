//! Runs an evolution from a [`Config`].
//!
//! # Steps
//!
//! 1. Validate the configuration; for action-tree runs check that the game server answers.
//! 2. Seed the random source.
//! 3. Build the evaluator (and connection pool) and the initial, scored population.
//! 4. Start the metrics streamer and the engine.
//! 5. Send one [`EvolutionCommand::StartGeneration`] per generation through a short
//!    queue, then close the command channel and wait for the engine.
//! 6. Stop the streamer, close the pool and return the final population.

use std::{
    sync::{
        Arc,
        mpsc::{self, SyncSender, TrySendError},
    },
    thread,
    time::{Duration, Instant},
};

use darwin_evolution::{
    CancellationToken, Cancelled, CoEvolutionSettings, CoEvolvingPopulation, EngineSettings,
    EvalContext, EvolutionCommand, EvolutionEngine, GenerationMetrics, GenerationParams,
    GenericPopulation, MetricsStreamer, Population,
};
use darwin_fitness::{
    FitnessEvaluator,
    bit_string::OnesFraction,
    client::ClientError,
    game::{GameEvaluator, GameSettings},
    pool::{self, ConnectionPool, PoolConfig},
    regression::{self, GrammarRegression, TreeRegression, UndefinedTarget},
};
use darwin_genome::{
    ActionTrees, BitString, Grammar, GrammarTree, Individual, MutateInfo, Tree, Weights,
    WeightsAndActions, rng::{self, GlobalRng}, tree::ramped_half_and_half,
};

use crate::config::{ActionTreeConfig, Config, ConfigError, EvolutionConfig, GenomeChoice};

/// How long sending one generation command may take.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Generation commands queued ahead of the engine. Once it is full, each send waits for
/// the engine to take the next command, bounded by [`COMMAND_TIMEOUT`].
pub const COMMAND_BACKLOG: usize = 2;

const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(1);

const PREFLIGHT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Receives every metrics record of a run.
pub type MetricsHandler = Box<dyn FnMut(&GenerationMetrics) + Send>;

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum RunError {
    #[display("invalid configuration")]
    Config(ConfigError),
    #[display("game server at {addr} is unavailable")]
    ServerUnavailable { addr: String, source: ClientError },
    #[display("failed to generate test cases")]
    TestCases(UndefinedTarget),
    #[display("timeout sending evolution command for generation {generation}")]
    CommandTimeout {
        #[error(not(source))]
        generation: usize,
    },
    #[display("run cancelled while building the initial population")]
    Cancelled(Cancelled),
}

impl From<ConfigError> for RunError {
    fn from(err: ConfigError) -> Self {
        RunError::Config(err)
    }
}

impl From<Cancelled> for RunError {
    fn from(err: Cancelled) -> Self {
        RunError::Cancelled(err)
    }
}

/// Everything built from the configuration before the engine starts.
struct Setup {
    population: Box<dyn Population>,
    evaluator: Arc<dyn FitnessEvaluator>,
    mutate_info: MutateInfo,
    game: Option<Arc<GameEvaluator>>,
}

/// Runs a complete evolution and returns the final population, fittest first.
///
/// Cancelling `cancel` stops the engine at its next suspension point; the population of
/// the last completed generation is returned.
///
/// # Arguments
///
/// * `config` - Run configuration; validated before anything else happens
/// * `handler` - Called on a separate thread with each metrics record, in order
/// * `cancel` - Stops the run early
pub fn run_evolution(
    config: &Config,
    handler: Option<MetricsHandler>,
    cancel: &CancellationToken,
) -> Result<Vec<Arc<Individual>>, RunError> {
    config.validate()?;
    let genome = config.genome()?;
    if genome == GenomeChoice::ActionTree {
        preflight(&config.action_tree)?;
    }

    rng::seed(config.evolution.seed);
    let workers = config.workers();
    log::info!("building initial {genome} population with {workers} workers");
    let start = Instant::now();
    let setup = build(config, genome, workers, cancel)?;
    log::info!(
        "initial population built in {:.3}s",
        start.elapsed().as_secs_f64()
    );

    let generations = config.evolution.generations;
    let (commands, command_rx) = mpsc::sync_channel(COMMAND_BACKLOG);
    let (metrics_tx, metrics_rx) = mpsc::sync_channel(generations);

    let mut streamer = MetricsStreamer::new(metrics_rx);
    let records = streamer.subscribe();
    let log_interval = config.log_interval();
    let mut handler = handler;
    let reporter = thread::spawn(move || {
        for metrics in records {
            if metrics.generation == 1
                || metrics.generation == generations
                || metrics.generation % log_interval == 0
            {
                log::info!(
                    "generation {}/{}: best {:.6}, avg {:.6}, {:.3}s, best individual {}",
                    metrics.generation,
                    generations,
                    metrics.best,
                    metrics.avg,
                    metrics.duration.as_secs_f64(),
                    metrics.best_description
                );
            }
            if let Some(handler) = handler.as_mut() {
                handler(&metrics);
            }
        }
    });
    streamer.start(cancel);

    let Setup {
        population,
        evaluator,
        mutate_info,
        game,
    } = setup;
    let mut engine = EvolutionEngine::new(
        population,
        config
            .evolution
            .selection_type
            .build(config.evolution.selection_size),
        evaluator,
        EngineSettings {
            workers,
            mutate_info,
        },
        command_rx,
        metrics_tx,
        cancel.clone(),
    );
    engine.start();

    let outcome = feed_generations(&commands, &config.evolution, cancel, COMMAND_TIMEOUT);
    if outcome.is_err() {
        cancel.cancel();
    }
    drop(commands);
    engine.wait();
    streamer.stop();
    if reporter.join().is_err() {
        log::error!("metrics handler panicked");
    }
    if let Some(game) = game {
        game.pool().close();
        log::info!(
            "{} games played, pool stats {:?}",
            game.games_played(),
            game.pool().stats()
        );
    }
    outcome?;

    Ok(engine.get_population().unwrap_or_default())
}

/// Sends one `StartGeneration` per planned generation.
///
/// Stops early without an error when the run is cancelled or the engine has exited.
fn feed_generations(
    commands: &SyncSender<EvolutionCommand>,
    evolution: &EvolutionConfig,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<(), RunError> {
    for generation in 1..=evolution.generations {
        if cancel.is_cancelled() {
            log::warn!("run cancelled before generation {generation}");
            break;
        }
        let command = EvolutionCommand::StartGeneration(GenerationParams {
            generation,
            crossover_points: evolution.crossover_point_count,
            crossover_rate: evolution.crossover_rate,
            mutation_rate: evolution.mutation_rate,
            elitism_pct: evolution.elitism_percentage,
        });
        if !send_command(commands, command, generation, timeout)? {
            log::warn!("engine stopped before generation {generation}");
            break;
        }
    }
    Ok(())
}

/// Sends `command`, retrying while the channel is full until `timeout` elapses.
///
/// Returns `Ok(false)` if the engine has already exited.
pub fn send_command(
    commands: &SyncSender<EvolutionCommand>,
    command: EvolutionCommand,
    generation: usize,
    timeout: Duration,
) -> Result<bool, RunError> {
    let deadline = Instant::now() + timeout;
    let mut command = command;
    loop {
        match commands.try_send(command) {
            Ok(()) => return Ok(true),
            Err(TrySendError::Disconnected(_)) => return Ok(false),
            Err(TrySendError::Full(returned)) => {
                if Instant::now() >= deadline {
                    return Err(RunError::CommandTimeout { generation });
                }
                command = returned;
                thread::sleep(SEND_RETRY_INTERVAL);
            }
        }
    }
}

/// Checks the game server, retrying once after a short delay.
fn preflight(config: &ActionTreeConfig) -> Result<(), RunError> {
    let timeout = config.timeout()?;
    let addr = &config.server_addr;
    if let Err(err) = pool::check_server(addr, timeout) {
        log::warn!("game server at {addr} not reachable ({err}); retrying");
        thread::sleep(PREFLIGHT_RETRY_DELAY);
        pool::check_server(addr, timeout).map_err(|source| RunError::ServerUnavailable {
            addr: addr.clone(),
            source,
        })?;
    }
    log::info!("game server at {addr} is reachable");
    Ok(())
}

fn build(
    config: &Config,
    genome: GenomeChoice,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<Setup, RunError> {
    let size = config.evolution.population_size;
    let ctx = EvalContext {
        workers,
        phase: 0,
        cancel,
    };
    let tree = &config.tree;
    let tree_info = |variable_set: Vec<String>, max_depth: usize| MutateInfo {
        operand_set: tree.operand_set.clone(),
        variable_set,
        terminal_set: tree.terminal_set.clone(),
        max_depth,
    };

    let setup = match genome {
        GenomeChoice::BitString => {
            let genome_size = config.bitstring.genome_size;
            let population = GenericPopulation::build(
                size,
                |_, rng| BitString::random(genome_size, rng).into(),
                &OnesFraction,
                &ctx,
            )?;
            Setup {
                population: Box::new(population),
                evaluator: Arc::new(OnesFraction),
                mutate_info: MutateInfo::default(),
                game: None,
            }
        }
        GenomeChoice::Tree => {
            let info = tree_info(tree.variable_set.clone(), tree.max_depth);
            let cases = regression::generate_test_cases(
                &tree.target()?,
                &tree.variable_set,
                tree.test_case_count,
                &mut GlobalRng,
            )
            .map_err(RunError::TestCases)?;
            let evaluator = TreeRegression::new(cases);
            let population = GenericPopulation::build(
                size,
                |i, rng| {
                    let (depth, method) = ramped_half_and_half(i, size, tree.initial_depth);
                    Tree::random(depth, method, &info, rng).into()
                },
                &evaluator,
                &ctx,
            )?;
            Setup {
                population: Box::new(population),
                evaluator: Arc::new(evaluator),
                mutate_info: info,
                game: None,
            }
        }
        GenomeChoice::GrammarTree => {
            let grammar_config = &config.grammar_tree;
            let info = tree_info(tree.variable_set.clone(), grammar_config.max_depth);
            let cases = regression::generate_test_cases(
                &tree.target()?,
                &tree.variable_set,
                tree.test_case_count,
                &mut GlobalRng,
            )
            .map_err(RunError::TestCases)?;
            let evaluator = GrammarRegression::new(
                cases,
                Grammar::from_info(&info),
                grammar_config.max_depth,
            );
            let population = GenericPopulation::build(
                size,
                |_, rng| GrammarTree::random(grammar_config.genome_size, rng).into(),
                &evaluator,
                &ctx,
            )?;
            Setup {
                population: Box::new(population),
                evaluator: Arc::new(evaluator),
                mutate_info: info,
                game: None,
            }
        }
        GenomeChoice::ActionTree => build_action_tree(config, size, &ctx)?,
    };
    Ok(setup)
}

fn build_action_tree(
    config: &Config,
    size: usize,
    ctx: &EvalContext<'_>,
) -> Result<Setup, RunError> {
    let tree = &config.tree;
    let action = &config.action_tree;
    let mut variable_set = Weights::input_names(action.weights_column_count);
    variable_set.extend(tree.variable_set.iter().cloned());
    let info = MutateInfo {
        operand_set: tree.operand_set.clone(),
        variable_set,
        terminal_set: tree.terminal_set.clone(),
        max_depth: tree.max_depth,
    };

    let pool = Arc::new(ConnectionPool::new(PoolConfig {
        server_addr: action.server_addr.clone(),
        max_connections: action.pool_size,
        timeout: action.timeout()?,
    }));
    let game = Arc::new(GameEvaluator::new(
        GameSettings {
            actions: action.actions.clone(),
            opponent_type: action.opponent_type.clone(),
            max_steps: action.max_steps,
            test_case_count: action.test_case_count,
            selection_percentage: action.selection_percentage,
            partner_sample_size: action.partner_sample_size,
            reward_exponent: action.reward_exponent,
            max_action_attempts: action.max_action_attempts,
            constant_action_penalty: action.constant_action_penalty,
        },
        pool,
    ));

    let make_weights =
        |rng: &mut GlobalRng| Weights::random(action.weights_count, action.weights_column_count, rng);
    let make_trees = |i: usize, rng: &mut GlobalRng| {
        let (depth, method) = ramped_half_and_half(i, size, tree.initial_depth);
        ActionTrees::random(&action.actions, depth, method, &info, rng)
    };

    let population: Box<dyn Population> = if action.coevolve {
        Box::new(CoEvolvingPopulation::build(
            size,
            |_, rng| make_weights(rng).into(),
            |i, rng| make_trees(i, rng).into(),
            CoEvolutionSettings {
                switch_step: action.switch_training_target_step,
                train_weights_first: action.train_weights_first,
            },
            game.as_ref(),
            ctx,
        )?)
    } else {
        Box::new(GenericPopulation::build(
            size,
            |i, rng| {
                let weights = make_weights(rng);
                WeightsAndActions::new(weights, make_trees(i, rng)).into()
            },
            game.as_ref(),
            ctx,
        )?)
    };

    Ok(Setup {
        population,
        evaluator: Arc::clone(&game) as Arc<dyn FitnessEvaluator>,
        mutate_info: info,
        game: Some(game),
    })
}
