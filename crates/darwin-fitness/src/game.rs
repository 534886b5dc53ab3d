//! Game-playing fitness for agents made of weights and action trees.
//!
//! One *pairing* is a weight matrix together with a set of action trees. A pairing is
//! scored by playing `test_case_count` games on the server: each game's total reward is
//! shaped with `sign(r) * |r|^reward_exponent`, failed games are skipped, and the pairing
//! scores the mean over the games that completed (`0` if none did).
//!
//! Before shaping, a game's reward loses `constant_action_penalty` for every action
//! component whose tree has no variables, since such a tree cannot react to the game.
//! A game still running after `max_steps` turns is reset, so the pooled connection is
//! handed back without a game in progress.
//!
//! # Co-evolution
//!
//! When weights and action trees evolve as separate populations, an individual of one
//! side is paired with a sample of the other side. Its fitness is the mean of its best
//! `selection_percentage` share of pairing scores, which rewards individuals that work
//! well with strong partners.

use std::{
    cmp::Ordering,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use darwin_genome::{ActionSpec, ActionTrees, Individual, Tree, Weights, rng::GlobalRng};
use rand::seq::IndexedRandom;

use crate::{
    FitnessEvaluator,
    client::{ClientError, GameClient},
    executor::ActionExecutor,
    pool::{ConnectionPool, PoolError},
    validator::ActionValidator,
};

/// Failure of a single game.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum GameError {
    #[display("no connection available")]
    Pool(PoolError),
    #[display("game aborted")]
    Client(ClientError),
}

/// How games are played and scored.
#[derive(Debug, Clone)]
pub struct GameSettings {
    pub actions: Vec<ActionSpec>,
    pub opponent_type: String,
    pub max_steps: usize,
    /// Games per pairing.
    pub test_case_count: usize,
    /// Share of the best pairing scores averaged into a co-evolved fitness, in `(0, 1]`.
    pub selection_percentage: f64,
    /// Partners sampled per co-evolved individual; `0` pairs with every partner.
    pub partner_sample_size: usize,
    pub reward_exponent: f64,
    pub max_action_attempts: usize,
    pub constant_action_penalty: f64,
}

/// Scores agents by playing them on the game server.
#[derive(Debug)]
pub struct GameEvaluator {
    settings: GameSettings,
    pool: Arc<ConnectionPool>,
    games_played: AtomicU64,
}

impl GameEvaluator {
    #[must_use]
    pub fn new(settings: GameSettings, pool: Arc<ConnectionPool>) -> Self {
        Self {
            settings,
            pool,
            games_played: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    #[must_use]
    pub fn games_played(&self) -> u64 {
        self.games_played.load(AtomicOrdering::Relaxed)
    }

    /// Plays one game and returns its total reward.
    ///
    /// The connection goes back to the pool afterwards; a connection broken by the game
    /// is disconnected first, so the pool discards it.
    pub fn play_game(&self, weights: &Weights, trees: &ActionTrees) -> Result<f64, GameError> {
        let mut client = self.pool.get().map_err(GameError::Pool)?;
        let result = self.play_on(&mut client, weights, trees);
        if let Err(err) = &result
            && err.breaks_connection()
        {
            client.disconnect();
        }
        if let Err(err) = self.pool.return_client(client) {
            log::debug!("could not return connection: {err}");
        }
        self.games_played.fetch_add(1, AtomicOrdering::Relaxed);
        result.map_err(GameError::Client)
    }

    fn play_on(
        &self,
        client: &mut GameClient,
        weights: &Weights,
        trees: &ActionTrees,
    ) -> Result<f64, ClientError> {
        let executor = ActionExecutor::new(&self.settings.actions, self.settings.max_action_attempts);
        let connected = client.connect_to_game(&self.settings.opponent_type)?;
        log::debug!("game started: {}", connected.message);

        let mut observation = client.receive_observation()?;
        let mut validator = ActionValidator::default();
        validator.observe(&observation.info);
        let mut total = observation.reward;

        for step in 0..self.settings.max_steps {
            if observation.is_done() {
                break;
            }
            let action = executor.select(
                trees,
                weights,
                &observation.observation,
                &validator,
                observation.owned_cells.as_deref(),
                &mut GlobalRng,
            );
            client.send_action(action)?;
            observation = client.receive_observation()?;
            validator.observe(&observation.info);
            total += observation.reward;
            if step % 10 == 0 {
                log::debug!("step {step}: total reward {total:.3}");
            }
        }
        if !observation.is_done() {
            log::debug!("game cut off after {} steps", self.settings.max_steps);
            client.reset()?;
        }
        Ok(total - self.constant_action_penalty(trees))
    }

    /// Reward taken off each game for action components that ignore the game state.
    ///
    /// A component without a tree is scored `0` on every turn, so it counts as constant.
    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn constant_action_penalty(&self, trees: &ActionTrees) -> f64 {
        let constant = self
            .settings
            .actions
            .iter()
            .filter(|action| trees.get(&action.name).is_none_or(Tree::is_constant))
            .count();
        constant as f64 * self.settings.constant_action_penalty
    }

    /// Plays `test_case_count` games with one pairing and returns the shaped mean reward.
    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn score_pairing(&self, weights: &Weights, trees: &ActionTrees) -> f64 {
        let mut rewards = Vec::with_capacity(self.settings.test_case_count);
        for _ in 0..self.settings.test_case_count {
            match self.play_game(weights, trees) {
                Ok(reward) => rewards.push(shape_reward(reward, self.settings.reward_exponent)),
                Err(err) => log::warn!("game failed: {err}: {}", source_text(&err)),
            }
        }
        if rewards.is_empty() {
            return 0.0;
        }
        rewards.iter().sum::<f64>() / rewards.len() as f64
    }

    fn sample_partners<'p>(&self, partners: &'p [Arc<Individual>]) -> Vec<&'p Arc<Individual>> {
        let k = self.settings.partner_sample_size;
        if k == 0 || k >= partners.len() {
            partners.iter().collect()
        } else {
            partners.choose_multiple(&mut GlobalRng, k).collect()
        }
    }
}

fn source_text(err: &GameError) -> String {
    match err {
        GameError::Pool(PoolError::Client(source)) | GameError::Client(source) => {
            source.to_string()
        }
        GameError::Pool(PoolError::Closed) => PoolError::Closed.to_string(),
    }
}

/// `sign(r) * |r|^exponent`.
#[must_use]
pub fn shape_reward(reward: f64, exponent: f64) -> f64 {
    reward.signum() * reward.abs().powf(exponent)
}

/// Mean of the top `share` of `scores` (at least one).
#[must_use]
#[expect(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn top_share_mean(mut scores: Vec<f64>, share: f64) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    let keep = ((scores.len() as f64 * share).ceil() as usize).clamp(1, scores.len());
    scores[..keep].iter().sum::<f64>() / keep as f64
}

impl FitnessEvaluator for GameEvaluator {
    fn evaluate(&self, individual: &Individual) -> f64 {
        match individual {
            Individual::Compound(agent) => self.score_pairing(agent.weights(), agent.actions()),
            Individual::Weights(_) | Individual::ActionTrees(_) => {
                log::warn!("{} genome evaluated without partners", individual.kind());
                0.0
            }
            other => crate::unsupported("game evaluator", other),
        }
    }

    fn evaluate_against(&self, individual: &Individual, partners: &[Arc<Individual>]) -> f64 {
        let sampled = self.sample_partners(partners);
        if sampled.is_empty() {
            return self.evaluate(individual);
        }
        let scores: Vec<f64> = sampled
            .into_iter()
            .map(|partner| match (individual, partner.as_ref()) {
                (Individual::Weights(weights), Individual::ActionTrees(trees))
                | (Individual::ActionTrees(trees), Individual::Weights(weights)) => {
                    self.score_pairing(weights, trees)
                }
                (a, b) => panic!(
                    "cannot pair a {} genome with a {} genome",
                    a.kind(),
                    b.kind()
                ),
            })
            .collect();
        top_share_mean(scores, self.settings.selection_percentage)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, Write},
        sync::Mutex,
        thread,
        time::{Duration, Instant},
    };

    use darwin_genome::{Node, Tree, WeightsAndActions};

    use super::*;
    use crate::{client::tests::serve, pool::PoolConfig};

    /// A server that plays `steps` turns, rewarding 1.0 per turn, then ends the game.
    fn game_server(steps: usize) -> String {
        serve(move |mut reader, mut writer| {
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    return;
                }
                if !line.contains(r#""type":"connect""#) {
                    continue;
                }
                writeln!(writer, r#"{{"type":"connected","message":"ok"}}"#).unwrap();
                writeln!(
                    writer,
                    r#"{{"type":"observation","observation":{{"army":1}},"reward":0,"info":[[false,false],[false,false]]}}"#
                )
                .unwrap();
                for step in 1..=steps {
                    line.clear();
                    reader.read_line(&mut line).unwrap();
                    assert!(line.contains(r#""type":"action""#));
                    let done = step == steps;
                    writeln!(
                        writer,
                        r#"{{"type":"observation","observation":{{"army":1}},"reward":1.0,"terminated":{done}}}"#
                    )
                    .unwrap();
                }
            }
        })
    }

    fn settings() -> GameSettings {
        GameSettings {
            actions: ["pass", "row", "col", "direction", "split"]
                .iter()
                .zip([2, 2, 2, 4, 2])
                .map(|(name, value)| ActionSpec {
                    name: (*name).to_owned(),
                    value,
                })
                .collect(),
            opponent_type: "random".to_owned(),
            max_steps: 50,
            test_case_count: 2,
            selection_percentage: 0.5,
            partner_sample_size: 0,
            reward_exponent: 0.5,
            max_action_attempts: 4,
            constant_action_penalty: 10.0,
        }
    }

    fn evaluator(addr: String) -> GameEvaluator {
        let pool = ConnectionPool::new(PoolConfig {
            server_addr: addr,
            max_connections: 2,
            timeout: Duration::from_secs(2),
        });
        GameEvaluator::new(settings(), Arc::new(pool))
    }

    fn trees() -> ActionTrees {
        ActionTrees::from_trees(
            settings()
                .actions
                .iter()
                .map(|a| (a.name.clone(), Tree::new(Node::variable("w0"))))
                .collect(),
        )
    }

    #[test]
    fn test_reward_shaping_and_top_share() {
        assert!((shape_reward(4.0, 0.5) - 2.0).abs() < 1e-12);
        assert!((shape_reward(-9.0, 0.5) + 3.0).abs() < 1e-12);
        assert!(shape_reward(0.0, 0.5).abs() < f64::EPSILON);
        assert!((top_share_mean(vec![1.0, 4.0, 2.0, 3.0], 0.5) - 3.5).abs() < 1e-12);
        assert!((top_share_mean(vec![1.0, 4.0], 0.1) - 4.0).abs() < 1e-12);
        assert!(top_share_mean(Vec::new(), 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compound_agent_plays_games() {
        let evaluator = evaluator(game_server(4));
        let agent: Individual =
            WeightsAndActions::new(Weights::from_values(4, 1, vec![0.0, 1.0, 2.0, 3.0]), trees())
                .into();
        let fitness = evaluator.evaluate(&agent);
        // 4 turns of reward 1.0, shaped with exponent 0.5
        assert!((fitness - 2.0).abs() < 1e-9);
        assert_eq!(evaluator.games_played(), 2);
        assert_eq!(evaluator.pool().stats().active, 0);
    }

    #[test]
    fn test_coevolved_weights_scored_against_partners() {
        let evaluator = evaluator(game_server(1));
        let weights: Individual = Weights::from_values(4, 1, vec![0.0; 4]).into();
        let partners: Vec<Arc<Individual>> = (0..3).map(|_| Arc::new(trees().into())).collect();
        let fitness = evaluator.evaluate_against(&weights, &partners);
        assert!((fitness - 1.0).abs() < 1e-9);
        assert_eq!(evaluator.games_played(), 6);
    }

    #[test]
    fn test_unreachable_server_scores_zero() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let evaluator = evaluator(addr);
        let agent: Individual =
            WeightsAndActions::new(Weights::from_values(4, 1, vec![0.0; 4]), trees()).into();
        assert!(evaluator.evaluate(&agent).abs() < f64::EPSILON);
    }

    #[test]
    fn test_constant_action_trees_are_penalised() {
        let evaluator = evaluator(game_server(4));
        let mut partial = trees();
        for name in ["row", "col"] {
            partial = ActionTrees::from_trees(
                partial
                    .iter()
                    .map(|(n, tree)| {
                        let tree = if n == name {
                            Tree::new(Node::constant(1.0))
                        } else {
                            tree.clone()
                        };
                        (n.to_owned(), tree)
                    })
                    .collect(),
            );
        }
        assert!((evaluator.constant_action_penalty(&partial) - 20.0).abs() < f64::EPSILON);
        assert!(evaluator.constant_action_penalty(&trees()).abs() < f64::EPSILON);
        let only_pass =
            ActionTrees::from_trees(vec![("pass".to_owned(), Tree::new(Node::variable("army")))]);
        assert!((evaluator.constant_action_penalty(&only_pass) - 40.0).abs() < f64::EPSILON);

        let agent: Individual =
            WeightsAndActions::new(Weights::from_values(4, 1, vec![0.0; 4]), partial).into();
        // 4 - 20 = -16 per game, shaped to -4
        assert!((evaluator.evaluate(&agent) + 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_cut_off_game_is_reset_before_reuse() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        // never ends a game on its own
        let addr = serve(move |mut reader, mut writer| {
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    return;
                }
                let message: serde_json::Value = serde_json::from_str(&line).unwrap();
                let kind = message["type"].as_str().unwrap_or_default().to_owned();
                match kind.as_str() {
                    "connect" => {
                        writeln!(writer, r#"{{"type":"connected","message":"ok"}}"#).unwrap();
                        writeln!(writer, r#"{{"type":"observation","reward":0}}"#).unwrap();
                    }
                    "action" => {
                        writeln!(writer, r#"{{"type":"observation","reward":1.0}}"#).unwrap();
                    }
                    _ => {}
                }
                log.lock().unwrap().push(kind);
            }
        });
        let pool = ConnectionPool::new(PoolConfig {
            server_addr: addr,
            max_connections: 1,
            timeout: Duration::from_secs(2),
        });
        let evaluator = GameEvaluator::new(
            GameSettings {
                max_steps: 3,
                ..settings()
            },
            Arc::new(pool),
        );
        let agent: Individual =
            WeightsAndActions::new(Weights::from_values(4, 1, vec![0.0; 4]), trees()).into();
        let fitness = evaluator.evaluate(&agent);
        assert!((fitness - 3.0_f64.sqrt()).abs() < 1e-9);
        assert_eq!(evaluator.pool().stats().total_created, 1);

        let game = ["connect", "action", "action", "action", "reset"];
        let expected: Vec<&str> = game.iter().chain(&game).copied().collect();
        let deadline = Instant::now() + Duration::from_secs(2);
        while received.lock().unwrap().len() < expected.len() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*received.lock().unwrap(), expected);
    }

    #[test]
    #[should_panic(expected = "cannot pair a weights genome with a weights genome")]
    fn test_mismatched_partners_panic() {
        let evaluator = evaluator(game_server(1));
        let weights: Individual = Weights::from_values(1, 1, vec![0.0]).into();
        let partners = vec![Arc::new(weights.clone())];
        let _ = evaluator.evaluate_against(&weights, &partners);
    }
}
