//! Events emitted by the game contract.

use serde::{Deserialize, Serialize};

use super::types::{Address, GameId};

/// Event classes the contract emits.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum EventKind {
    /// A new game was opened.
    GameCreated,
    /// An opponent joined an open game.
    GameJoined,
    /// A move was accepted.
    MoveMade,
    /// The contract recorded a result.
    GameFinished,
}

/// `GameCreated(gameId, player1)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCreated {
    /// New game id.
    pub game_id: GameId,
    /// Creator.
    pub player1: Address,
}

/// `GameJoined(gameId, player1, player2)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameJoined {
    /// Joined game id.
    pub game_id: GameId,
    /// Creator.
    pub player1: Address,
    /// Opponent.
    pub player2: Address,
}

/// `MoveMade(gameId, player, row, col, nextPlayer)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveMade {
    /// Game id.
    pub game_id: GameId,
    /// Acting address.
    pub player: Address,
    /// Zero-based row.
    pub row: usize,
    /// Zero-based column.
    pub col: usize,
    /// Address due to move next.
    pub next_player: Address,
}

/// `GameFinished(gameId, winner, isDraw)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameFinished {
    /// Game id.
    pub game_id: GameId,
    /// Winning address, unset on a draw.
    pub winner: Address,
    /// True when the board filled without a line.
    pub is_draw: bool,
}

/// A decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum ContractEvent {
    /// See [`GameCreated`].
    GameCreated(GameCreated),
    /// See [`GameJoined`].
    GameJoined(GameJoined),
    /// See [`MoveMade`].
    MoveMade(MoveMade),
    /// See [`GameFinished`].
    GameFinished(GameFinished),
}

impl ContractEvent {
    /// Event class.
    pub fn kind(&self) -> EventKind {
        match self {
            ContractEvent::GameCreated(_) => EventKind::GameCreated,
            ContractEvent::GameJoined(_) => EventKind::GameJoined,
            ContractEvent::MoveMade(_) => EventKind::MoveMade,
            ContractEvent::GameFinished(_) => EventKind::GameFinished,
        }
    }

    /// Game the event belongs to.
    pub fn game_id(&self) -> GameId {
        match self {
            ContractEvent::GameCreated(e) => e.game_id,
            ContractEvent::GameJoined(e) => e.game_id,
            ContractEvent::MoveMade(e) => e.game_id,
            ContractEvent::GameFinished(e) => e.game_id,
        }
    }

    /// Named arguments as stored in a log record.
    pub fn args(&self) -> serde_json::Value {
        let result = match self {
            ContractEvent::GameCreated(e) => serde_json::to_value(e),
            ContractEvent::GameJoined(e) => serde_json::to_value(e),
            ContractEvent::MoveMade(e) => serde_json::to_value(e),
            ContractEvent::GameFinished(e) => serde_json::to_value(e),
        };
        result.unwrap_or(serde_json::Value::Null)
    }
}

/// Indexed-argument filter for subscriptions and history queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    /// Restrict to one game, or match every game when `None`.
    pub game_id: Option<GameId>,
}

impl EventFilter {
    /// Matches every event.
    pub fn any() -> Self {
        Self { game_id: None }
    }

    /// Matches events of one game.
    pub fn game(game_id: GameId) -> Self {
        Self {
            game_id: Some(game_id),
        }
    }

    /// Returns true if `event` passes the filter.
    pub fn matches(&self, event: &ContractEvent) -> bool {
        self.game_id.is_none_or(|id| id == event.game_id())
    }
}
