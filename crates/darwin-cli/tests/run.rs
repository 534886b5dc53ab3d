use std::{
    io::{BufRead as _, BufReader, Write as _},
    net::TcpListener,
    sync::{Arc, Mutex},
    thread,
};

use darwin_cli::{
    config::Config,
    runner::{self, RunError},
};
use darwin_evolution::{CancellationToken, GenerationMetrics};
use darwin_genome::{Evolvable as _, Individual};
use serde_json::json;

static SERIAL: Mutex<()> = Mutex::new(());

fn config(value: serde_json::Value) -> Config {
    let config: Config = serde_json::from_value(value).unwrap();
    config.validate().unwrap();
    config
}

fn regression_config() -> Config {
    config(json!({
        "evolution": {
            "population_size": 200,
            "crossover_point_count": 1,
            "crossover_rate": 0.9,
            "mutation_rate": 0.1,
            "generations": 30,
            "elitism_percentage": 0.1,
            "seed": 1,
            "workers": 4
        },
        "tree": {
            "enabled": true,
            "operand_set": ["+", "-", "*", "/"],
            "variable_set": ["x"],
            "terminal_set": ["1", "2", "3", "5"],
            "max_depth": 4,
            "initial_depth": 3,
            "target_function": "x*2+3*2",
            "test_case_count": 10
        }
    }))
}

fn bitstring_config(seed: u64) -> Config {
    config(json!({
        "evolution": {
            "population_size": 30,
            "crossover_point_count": 2,
            "mutation_rate": 0.05,
            "generations": 8,
            "elitism_percentage": 0.2,
            "seed": seed,
            "selection_type": "roulette",
            "selection_size": 2,
            "workers": 3
        },
        "bitstring": { "enabled": true, "genome_size": 24 }
    }))
}

fn collect_metrics() -> (runner::MetricsHandler, Arc<Mutex<Vec<GenerationMetrics>>>) {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let handler = Box::new(move |metrics: &GenerationMetrics| {
        sink.lock().unwrap().push(metrics.clone());
    });
    (handler, records)
}

fn fingerprint(population: &[Arc<Individual>]) -> Vec<(String, u64)> {
    population
        .iter()
        .map(|i| (i.describe(), i.fitness().to_bits()))
        .collect()
}

#[test]
fn test_symbolic_regression() {
    let _guard = SERIAL.lock().unwrap();
    let (handler, records) = collect_metrics();
    let population =
        runner::run_evolution(&regression_config(), Some(handler), &CancellationToken::new())
            .unwrap();

    assert_eq!(population.len(), 200);
    assert!(population.iter().all(|i| i.fitness().is_finite()));
    let best = population[0].fitness();
    assert!(best > -0.5, "best fitness {best} is not above -0.5");
    assert!(population.iter().all(|i| i.fitness() <= best));

    let records = records.lock().unwrap();
    assert_eq!(records.len(), 30);
    assert_eq!(records[29].generation, 30);
    assert!(records.iter().all(|m| m.mean_depth.is_some_and(|d| d <= 4.0)));
}

#[test]
fn test_same_seed_same_population() {
    let _guard = SERIAL.lock().unwrap();
    let cancel = CancellationToken::new();
    let first = runner::run_evolution(&bitstring_config(9), None, &cancel).unwrap();
    let second = runner::run_evolution(&bitstring_config(9), None, &cancel).unwrap();
    assert_eq!(fingerprint(&first), fingerprint(&second));

    let other = runner::run_evolution(&bitstring_config(10), None, &cancel).unwrap();
    assert_ne!(fingerprint(&first), fingerprint(&other));
}

#[test]
fn test_final_population_is_best_first() {
    let _guard = SERIAL.lock().unwrap();
    for seed in 0..10 {
        let (handler, records) = collect_metrics();
        let population =
            runner::run_evolution(&bitstring_config(seed), Some(handler), &CancellationToken::new())
                .unwrap();
        let fitness: Vec<f64> = population.iter().map(|i| i.fitness()).collect();
        assert!(fitness.is_sorted_by(|a, b| a >= b), "seed {seed}: {fitness:?}");
        let last = records.lock().unwrap().last().unwrap().clone();
        assert!((fitness[0] - last.best).abs() < f64::EPSILON, "seed {seed}");
        assert_eq!(population[0].describe(), last.best_description);
    }
}

#[test]
fn test_invalid_config_is_rejected_before_running() {
    let _guard = SERIAL.lock().unwrap();
    let mut config = bitstring_config(1);
    config.evolution.elitism_percentage = 0.0;
    let err = runner::run_evolution(&config, None, &CancellationToken::new()).unwrap_err();
    assert!(matches!(err, RunError::Config(_)));
}

/// Plays games of `steps` turns, each rewarding 1.
fn game_server(steps: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            thread::spawn(move || {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut writer = stream;
                let mut line = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 {
                        return;
                    }
                    if !line.contains(r#""type":"connect""#) {
                        continue;
                    }
                    let _ = writeln!(writer, r#"{{"type":"connected","message":"ok"}}"#);
                    let _ = writeln!(
                        writer,
                        r#"{{"type":"observation","observation":{{}},"reward":0,"info":[[false,false],[false,false]]}}"#
                    );
                    for step in 1..=steps {
                        line.clear();
                        if reader.read_line(&mut line).unwrap_or(0) == 0 {
                            return;
                        }
                        let done = step == steps;
                        let _ = writeln!(
                            writer,
                            r#"{{"type":"observation","observation":{{}},"reward":1.0,"terminated":{done}}}"#
                        );
                    }
                }
            });
        }
    });
    addr
}

fn action_tree_config(addr: &str, coevolve: bool) -> Config {
    config(json!({
        "evolution": {
            "population_size": 6,
            "crossover_point_count": 1,
            "mutation_rate": 0.1,
            "generations": 3,
            "elitism_percentage": 0.2,
            "seed": 5,
            "workers": 2
        },
        "tree": {
            "variable_set": [],
            "terminal_set": ["1", "2"],
            "max_depth": 3,
            "initial_depth": 2
        },
        "action_tree": {
            "enabled": true,
            "server_addr": addr,
            "max_steps": 20,
            "actions": [
                { "name": "pass", "value": 2 },
                { "name": "row", "value": 2 },
                { "name": "col", "value": 2 },
                { "name": "direction", "value": 4 },
                { "name": "split", "value": 2 }
            ],
            "weights_count": 4,
            "weights_column_count": 2,
            "switch_training_target_step": 2,
            "pool_size": 3,
            "test_case_count": 1,
            "timeout": "2s",
            "coevolve": coevolve,
            "partner_sample_size": 2
        }
    }))
}

#[test]
fn test_coevolved_agents_against_a_game_server() {
    let _guard = SERIAL.lock().unwrap();
    let addr = game_server(4);
    let (handler, records) = collect_metrics();
    let population = runner::run_evolution(
        &action_tree_config(&addr, true),
        Some(handler),
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(population.len(), 6);
    assert!(population.iter().all(|i| i.is_compound()));
    // every game earns 4 points, less 10 for each of the 5 action trees: without variables
    // they are all constant
    assert!(population.iter().all(|i| (i.fitness() + 46.0).abs() < 1e-9));
    assert_eq!(records.lock().unwrap().len(), 3);
}

#[test]
fn test_compound_agents_without_coevolution() {
    let _guard = SERIAL.lock().unwrap();
    let addr = game_server(3);
    let population = runner::run_evolution(
        &action_tree_config(&addr, false),
        None,
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(population.len(), 6);
    assert!(population.iter().all(|i| i.is_compound()));
    assert!(population.iter().all(|i| (i.fitness() + 47.0).abs() < 1e-9));

    let mut config = action_tree_config(&addr, false);
    config.action_tree.constant_action_penalty = 0.0;
    let population = runner::run_evolution(&config, None, &CancellationToken::new()).unwrap();
    assert!(population.iter().all(|i| (i.fitness() - 3.0).abs() < 1e-9));
}
