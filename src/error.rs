//! Errors surfaced by game state managers and the store.

use crate::games::tictactoe::MoveError;
use crate::ledger::LedgerError;

/// Human-readable reason a submitted move transaction was refused.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum RejectReason {
    /// The oracle says the other player is due.
    #[display("not your turn")]
    NotYourTurn,
    /// The oracle's own validation found the square taken.
    #[display("cell already occupied")]
    CellOccupied,
    /// The oracle already recorded a result for this game.
    #[display("game already ended")]
    GameEnded,
    /// Anything else, including a signer refusal.
    #[display("transaction failed: {}", _0)]
    Failed(String),
}

/// Failure of a manager or store operation.
///
/// Operations return these as values; nothing on the move path panics.
#[derive(Debug, Clone, derive_more::Display)]
pub enum SyncError {
    /// Operation attempted before `initialize` or before a game was bound.
    #[display("Not initialized")]
    NotInitialized,

    /// Occupied square or out-of-range position.
    #[display("Invalid move: cell {} occupied or invalid", position)]
    InvalidMove {
        /// The rejected position.
        position: usize,
    },

    /// Move attempted on a finished game.
    #[display("Game already ended")]
    GameAlreadyEnded,

    /// No ledger client, or it could not be reached.
    #[display("Ledger unavailable: {}", _0)]
    OracleUnavailable(String),

    /// The ledger refused the move transaction.
    #[display("Move rejected: {}", _0)]
    SubmissionRejected(RejectReason),

    /// Neither the receipt nor the event history held the expected event.
    #[display("Expected {} event not found", event)]
    EventNotFound {
        /// Name of the missing event.
        event: String,
    },

    /// The confirmation wait elapsed; the transaction may still land.
    #[display("Transaction {} still pending", tx_hash)]
    ConfirmationPending {
        /// Hash of the unconfirmed transaction.
        tx_hash: String,
    },

    /// The bound game changed (reset or rebind) while the operation was in flight.
    #[display("Game session changed while the operation was in flight")]
    SessionChanged,

    /// A ledger read failed.
    #[display("{}", _0)]
    Ledger(LedgerError),

    /// The active backend does not support this operation.
    #[display("Unsupported: {}", _0)]
    Unsupported(&'static str),
}

impl std::error::Error for SyncError {}

impl From<LedgerError> for SyncError {
    fn from(err: LedgerError) -> Self {
        SyncError::Ledger(err)
    }
}

impl From<MoveError> for SyncError {
    fn from(err: MoveError) -> Self {
        match err {
            MoveError::SquareUnavailable(position) => SyncError::InvalidMove { position },
            MoveError::GameOver => SyncError::GameAlreadyEnded,
        }
    }
}
