//! Wire-level values exchanged with the ledger.

use serde::{Deserialize, Serialize};

use super::events::ContractEvent;
use crate::games::tictactoe::{Board, Player, Square};

/// Identifier the contract assigns to a game.
pub type GameId = u64;

/// Account address on the ledger.
///
/// Addresses compare case-insensitively; use [`Address::same_as`] rather
/// than `==` when matching players.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize, derive_more::Display)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// The all-zero address the contract stores for an unset player.
    pub const ZERO: &'static str = "0x0000000000000000000000000000000000000000";

    /// Wraps an address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The unset sentinel.
    pub fn zero() -> Self {
        Self(Self::ZERO.to_string())
    }

    /// Returns the address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty string or an all-zero hex address.
    pub fn is_unset(&self) -> bool {
        let hex = self.0.trim_start_matches("0x").trim_start_matches("0X");
        hex.chars().all(|c| c == '0')
    }

    /// Case-insensitive comparison.
    pub fn same_as(&self, other: &Address) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A confirmed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Transaction hash.
    pub tx_hash: String,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Events emitted by the transaction.
    #[serde(default)]
    pub logs: Vec<LogRecord>,
}

impl Receipt {
    /// Decodes every log, skipping records that are not contract events.
    pub fn events(&self) -> Vec<ContractEvent> {
        self.logs.iter().filter_map(LogRecord::decode).collect()
    }
}

/// A raw event record as stored by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Block that emitted the record.
    pub block_number: u64,
    /// Transaction that emitted the record.
    pub tx_hash: String,
    /// Event name.
    pub name: String,
    /// Named event arguments.
    pub args: serde_json::Value,
}

impl LogRecord {
    /// Builds a record from a typed event.
    pub fn from_event(event: &ContractEvent, block_number: u64, tx_hash: &str) -> Self {
        Self {
            block_number,
            tx_hash: tx_hash.to_string(),
            name: event.kind().to_string(),
            args: event.args(),
        }
    }

    /// Decodes the record into a typed event, `None` for unknown or
    /// malformed records.
    pub fn decode(&self) -> Option<ContractEvent> {
        let tagged = serde_json::json!({ "name": self.name, "args": self.args });
        match serde_json::from_value(tagged) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(name = %self.name, error = %e, "Skipping undecodable log");
                None
            }
        }
    }
}

/// Lobby listing entry returned by `getOpenGames` / `getActiveGamesForSender`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    /// Game identifier.
    pub id: GameId,
    /// Creator, plays X.
    pub player1: Address,
    /// Opponent, unset until someone joins.
    pub player2: Address,
    /// Address due to move.
    pub current_player: Address,
    /// Whether the contract recorded a result.
    pub is_finished: bool,
    /// Number of moves played.
    pub moves: u64,
}

impl GameSummary {
    /// True while nobody has joined.
    pub fn is_open(&self) -> bool {
        self.player2.is_unset() && !self.is_finished
    }
}

/// Player identities and completion flag, as returned by `games(gameId)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    /// Creator, plays X.
    pub player1: Address,
    /// Opponent, unset until someone joins.
    pub player2: Address,
    /// Whether the contract recorded a result.
    pub is_finished: bool,
}

/// Wire encoding of an unset cell.
pub const CELL_UNSET: u8 = 0;
/// Wire encoding of a player1 cell.
pub const CELL_PLAYER1: u8 = 1;
/// Wire encoding of a player2 cell.
pub const CELL_PLAYER2: u8 = 2;

/// Converts one wire cell to a square. Unknown codes read as empty.
pub fn square_from_wire(code: u8) -> Square {
    match code {
        CELL_PLAYER1 => Square::Occupied(Player::X),
        CELL_PLAYER2 => Square::Occupied(Player::O),
        _ => Square::Empty,
    }
}

/// Converts one square to its wire cell.
pub fn square_to_wire(square: Square) -> u8 {
    match square {
        Square::Empty => CELL_UNSET,
        Square::Occupied(Player::X) => CELL_PLAYER1,
        Square::Occupied(Player::O) => CELL_PLAYER2,
    }
}

/// Converts the `getGame` grid (rows of wire cells) into a board.
///
/// Returns `None` unless the grid is exactly `size`×`size`.
pub fn board_from_wire(size: usize, rows: &[Vec<u8>]) -> Option<Board> {
    if rows.len() != size || rows.iter().any(|row| row.len() != size) {
        return None;
    }
    let squares = rows
        .iter()
        .flat_map(|row| row.iter().copied().map(square_from_wire))
        .collect();
    Board::from_squares(size, squares)
}

/// Converts a board into the `getGame` grid.
pub fn board_to_wire(board: &Board) -> Vec<Vec<u8>> {
    board
        .squares()
        .chunks(board.size().max(1))
        .map(|row| row.iter().copied().map(square_to_wire).collect())
        .collect()
}
