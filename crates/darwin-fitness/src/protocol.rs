//! Wire messages of the game server protocol.
//!
//! Every message is one JSON object on its own line, tagged by a `"type"` field.
//!
//! # Outbound
//!
//! | type      | payload                          |
//! |-----------|----------------------------------|
//! | `connect` | `agent_type`, `opponent_type`    |
//! | `action`  | `action`: five integers          |
//! | `reset`   | none                             |
//!
//! # Inbound
//!
//! | type          | payload                                                       |
//! |---------------|---------------------------------------------------------------|
//! | `connected`   | `agent_id`, `opponent_id`, `message`                          |
//! | `observation` | `observation`, `reward`, `terminated`, `truncated`, `info`    |
//! | `game_over`   | `winner`, `final_rewards`, `reason`                           |
//! | `error`       | `message`, `details`                                          |
//!
//! Inbound messages of any other type decode as [`Response::Unknown`] and are skipped by
//! the client.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Agent type announced when connecting.
pub const AGENT_TYPE: &str = "human";

/// A move: `[pass, row, col, direction, split]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameAction([usize; 5]);

impl GameAction {
    /// The pass-turn action.
    pub const PASS: Self = Self([1, 0, 0, 0, 0]);

    #[must_use]
    pub fn new(components: [usize; 5]) -> Self {
        Self(components)
    }

    #[must_use]
    pub fn components(&self) -> [usize; 5] {
        self.0
    }

    #[must_use]
    pub fn pass(&self) -> usize {
        self.0[0]
    }

    #[must_use]
    pub fn row(&self) -> usize {
        self.0[1]
    }

    #[must_use]
    pub fn col(&self) -> usize {
        self.0[2]
    }

    #[must_use]
    pub fn direction(&self) -> usize {
        self.0[3]
    }

    #[must_use]
    pub fn split(&self) -> usize {
        self.0[4]
    }
}

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Connect {
        agent_type: String,
        opponent_type: String,
    },
    Action {
        action: GameAction,
    },
    Reset,
}

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Connected(Connected),
    Observation(Observation),
    GameOver(GameOver),
    Error(ServerError),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Connected {
    pub agent_id: serde_json::Value,
    pub opponent_id: serde_json::Value,
    pub message: String,
}

/// One step of the game as seen by the agent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Observation {
    /// Numeric features, bound as tree variables. Non-numeric entries are dropped;
    /// booleans become `0.0`/`1.0`.
    #[serde(deserialize_with = "numeric_map")]
    pub observation: HashMap<String, f64>,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    /// Mountain grid indexed `[col][row]`. Empty when the server sends none.
    #[serde(deserialize_with = "bool_grid")]
    pub info: Vec<Vec<bool>>,
    /// Cells owned by the agent, indexed like `info`, when the server reports them.
    pub owned_cells: Option<Vec<Vec<bool>>>,
}

impl Observation {
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GameOver {
    pub winner: serde_json::Value,
    pub final_rewards: serde_json::Value,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerError {
    pub message: String,
    pub details: Option<String>,
}

fn numeric_map<'de, D>(deserializer: D) -> Result<HashMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(name, value)| {
            let number = match value {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
                _ => None,
            };
            number.map(|n| (name, n))
        })
        .collect())
}

fn bool_grid<'de, D>(deserializer: D) -> Result<Vec<Vec<bool>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).unwrap_or_default())
}
