//! Ledger client capability.
//!
//! The game contract lives on an external ledger reached through a
//! [`LedgerClient`]. Two implementations ship with the crate: an in-process
//! [`SimulatedChain`] and a JSON-RPC gateway client, [`RpcLedgerClient`].

mod error;
mod events;
mod rpc;
mod simulated;
mod types;

pub use error::{LedgerError, LedgerErrorKind};
pub use events::{ContractEvent, EventFilter, EventKind, GameCreated, GameFinished, GameJoined, MoveMade};
pub use rpc::RpcLedgerClient;
pub use simulated::{DEFAULT_STAKE_WEI, SimulatedChain};
pub use types::{
    Address, CELL_PLAYER1, CELL_PLAYER2, CELL_UNSET, GameId, GameRecord, GameSummary, LogRecord, Receipt,
    board_from_wire, board_to_wire, square_from_wire, square_to_wire,
};

use std::sync::Arc;

/// Contract method names.
pub mod method {
    /// `createGame() payable`.
    pub const CREATE_GAME: &str = "createGame";
    /// `joinGame(gameId) payable`.
    pub const JOIN_GAME: &str = "joinGame";
    /// `makeMove(gameId, row, col)`.
    pub const MAKE_MOVE: &str = "makeMove";
    /// `getGame(gameId) -> board`.
    pub const GET_GAME: &str = "getGame";
    /// `games(gameId) -> {player1, player2, isFinished}`.
    pub const GAMES: &str = "games";
    /// `getOpenGames() -> Game[]`.
    pub const GET_OPEN_GAMES: &str = "getOpenGames";
    /// `getActiveGamesForSender() -> Game[]`.
    pub const GET_ACTIVE_GAMES: &str = "getActiveGamesForSender";
}

/// Callback receiving events delivered by a subscription.
pub type EventHandler = Arc<dyn Fn(ContractEvent) + Send + Sync>;

/// Async access to the game contract.
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync + std::fmt::Debug {
    /// Resolves the caller's account address.
    async fn connect(&self) -> Result<Address, LedgerError>;

    /// Read-only contract call.
    async fn call(&self, method: &str, args: Vec<serde_json::Value>) -> Result<serde_json::Value, LedgerError>;

    /// Submits a transaction, optionally carrying `value` wei.
    ///
    /// Signer refusals and pre-flight reverts fail here; reverts discovered
    /// at inclusion fail in [`PendingTransaction::wait`].
    async fn send_transaction(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
        value: Option<u64>,
    ) -> Result<Box<dyn PendingTransaction>, LedgerError>;

    /// Subscribes to one event class. Dropping or cancelling the returned
    /// handle stops delivery.
    fn subscribe_to_event(
        &self,
        kind: EventKind,
        filter: EventFilter,
        handler: EventHandler,
    ) -> Result<Cancellation, LedgerError>;

    /// Queries confirmed events in the inclusive block range.
    async fn query_past_events(
        &self,
        kind: EventKind,
        filter: EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogRecord>, LedgerError>;
}

/// A submitted, not yet confirmed transaction.
#[async_trait::async_trait]
pub trait PendingTransaction: Send {
    /// Transaction hash.
    fn hash(&self) -> &str;

    /// Waits for inclusion.
    async fn wait(self: Box<Self>) -> Result<Receipt, LedgerError>;
}

/// Handle that stops a subscription or background task.
///
/// Cancels on drop, so owning the handle is owning the subscription.
pub struct Cancellation {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Cancellation {
    /// Wraps a cancel action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancels a spawned task.
    pub fn abort_task<T: Send + 'static>(handle: tokio::task::JoinHandle<T>) -> Self {
        Self::new(move || handle.abort())
    }

    /// Cancels now.
    pub fn cancel(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Cancellation {
    fn drop(&mut self) {
        self.fire();
    }
}

impl std::fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancellation")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}
