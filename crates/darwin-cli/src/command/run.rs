use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use darwin_cli::{
    config::DEFAULT_CONFIG_PATH,
    logging,
    runner::{self, MetricsHandler},
    util::{self, Output},
};
use darwin_evolution::{CancellationToken, GenerationMetrics};
use darwin_genome::{Evolvable as _, Individual};

/// Individuals listed in the run summary.
const SUMMARY_TOP: usize = 5;

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct RunArg {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Write every generation's metrics to this file as JSON lines
    #[arg(long)]
    metrics_output: Option<PathBuf>,
    /// Log level; overrides `logging.level` of the configuration
    #[arg(long)]
    log_level: Option<String>,
    /// Output file for the run summary (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, serde::Serialize)]
struct RunSummary {
    finished_at: DateTime<Utc>,
    genome: String,
    seed: u64,
    generations: usize,
    population_size: usize,
    elapsed_seconds: f64,
    best: Vec<ScoredIndividual>,
}

#[derive(Debug, serde::Serialize)]
struct ScoredIndividual {
    fitness: f64,
    kind: String,
    description: String,
}

impl ScoredIndividual {
    fn new(individual: &Individual) -> Self {
        Self {
            fitness: individual.fitness(),
            kind: individual.kind().to_string(),
            description: individual.describe(),
        }
    }
}

pub(crate) fn run(arg: &RunArg) -> anyhow::Result<()> {
    let RunArg {
        config,
        metrics_output,
        log_level,
        output,
    } = arg;

    let config = util::load_config(config)?;
    logging::init(log_level.as_deref().unwrap_or(&config.logging.level));
    log::info!("{}", config.summary());

    let metrics_path = metrics_output.clone().or_else(|| config.metrics.output.clone());
    let (handler, sink) = match metrics_path {
        Some(path) => {
            let (handler, sink) = json_lines_handler(Output::file(path)?);
            (Some(handler), Some(sink))
        }
        None => (None, None),
    };

    let start = Instant::now();
    let cancel = CancellationToken::new();
    let population =
        runner::run_evolution(&config, handler, &cancel).context("Evolution run failed")?;
    let elapsed = start.elapsed();

    if let Some(sink) = sink {
        let sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
        log::info!("metrics written to {}", sink.output.label());
        if let Some(err) = &sink.error {
            anyhow::bail!("Failed to write metrics: {err:#}");
        }
    }

    let summary = RunSummary {
        finished_at: Utc::now(),
        genome: config.genome()?.to_string(),
        seed: config.evolution.seed,
        generations: config.evolution.generations,
        population_size: population.len(),
        elapsed_seconds: elapsed.as_secs_f64(),
        best: population
            .iter()
            .take(SUMMARY_TOP)
            .map(|individual| ScoredIndividual::new(individual))
            .collect(),
    };
    if let Some(best) = summary.best.first() {
        log::info!(
            "finished in {:.3}s: best fitness {:.6}, {}",
            summary.elapsed_seconds,
            best.fitness,
            best.description
        );
    }
    Output::create(output.clone())?.write_summary(&summary)?;
    Ok(())
}

/// Metrics file shared between the handler thread and the command.
struct MetricsSink {
    output: Output,
    error: Option<anyhow::Error>,
}

/// Builds a handler appending each record to `output`.
///
/// The first write error stops further writes and is kept in the returned sink.
fn json_lines_handler(output: Output) -> (MetricsHandler, Arc<Mutex<MetricsSink>>) {
    let sink = Arc::new(Mutex::new(MetricsSink {
        output,
        error: None,
    }));
    let shared = Arc::clone(&sink);
    let handler = Box::new(move |metrics: &GenerationMetrics| {
        let mut sink = shared.lock().unwrap_or_else(PoisonError::into_inner);
        if sink.error.is_some() {
            return;
        }
        if let Err(err) = sink.output.append_record(metrics) {
            log::error!("{err:#}");
            sink.error = Some(err);
        }
    });
    (handler, sink)
}
