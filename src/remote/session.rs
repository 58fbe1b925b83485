//! The remote game a backend is bound to.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::games::tictactoe::Player;
use crate::ledger::{Address, Cancellation, GameId, GameRecord};

/// Read-only view of the bound game, published to session listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Bound game id.
    pub game_id: GameId,
    /// Creator, plays X.
    pub player1: Address,
    /// Opponent, unset until someone joins.
    pub player2: Address,
    /// Whether the ledger recorded a result.
    pub is_finished: bool,
}

impl SessionInfo {
    /// Symbol `address` plays in this game, if any.
    pub fn symbol_for(&self, address: &Address) -> Option<Player> {
        if self.player1.same_as(address) {
            Some(Player::X)
        } else if !self.player2.is_unset() && self.player2.same_as(address) {
            Some(Player::O)
        } else {
            None
        }
    }

    /// True until an opponent joins.
    pub fn is_waiting_for_opponent(&self) -> bool {
        self.player2.is_unset()
    }
}

/// Binding to one remote game.
///
/// Owns every subscription and timer serving the binding; dropping the
/// session cancels them.
#[derive(Debug)]
pub(crate) struct GameSession {
    info: SessionInfo,
    epoch: u64,
    handles: Vec<Cancellation>,
}

impl GameSession {
    pub(crate) fn new(game_id: GameId, record: GameRecord, epoch: u64) -> Self {
        Self {
            info: SessionInfo {
                game_id,
                player1: record.player1,
                player2: record.player2,
                is_finished: record.is_finished,
            },
            epoch,
            handles: Vec::new(),
        }
    }

    pub(crate) fn game_id(&self) -> GameId {
        self.info.game_id
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub(crate) fn symbol_for(&self, address: &Address) -> Option<Player> {
        self.info.symbol_for(address)
    }

    /// Records the opponent. Returns true if anything changed.
    pub(crate) fn set_players(&mut self, player1: Address, player2: Address) -> bool {
        let changed = !self.info.player1.same_as(&player1) || !self.info.player2.same_as(&player2);
        self.info.player1 = player1;
        self.info.player2 = player2;
        changed
    }

    /// Marks the game finished. Returns true if it was not already.
    pub(crate) fn mark_finished(&mut self) -> bool {
        !std::mem::replace(&mut self.info.is_finished, true)
    }

    pub(crate) fn attach(&mut self, handle: Cancellation) {
        self.handles.push(handle);
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        debug!(
            game_id = self.info.game_id,
            handles = self.handles.len(),
            "Releasing game session"
        );
    }
}
