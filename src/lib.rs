//! Strictly Ledger library - optimistic game state over an asynchronous ledger
//!
//! A tic-tac-toe game whose authoritative state may live in a smart contract.
//! The UI reads a locally consistent view while moves are confirmed, and
//! opponent moves arrive, asynchronously.
//!
//! # Architecture
//!
//! - **Games**: N×N board, win/draw evaluation, move legality
//! - **Manager**: the [`GameStateManager`] contract shared by all backends
//! - **Local**: in-process backend applying moves immediately
//! - **Remote**: ledger-backed backend reconciling events and polls
//! - **Store**: optimistic pending-move tracking and player identity
//! - **Ledger**: client capability, contract events, simulated chain, JSON-RPC client
//!
//! # Example
//!
//! ```no_run
//! use strictly_ledger::{GameStore, MoveOutcome};
//!
//! # async fn example() -> Result<(), strictly_ledger::SyncError> {
//! let store = GameStore::local(3);
//! store.initialize().await?;
//! assert!(matches!(store.make_move(4).await, MoveOutcome::Accepted));
//! println!("{}", store.view().game_state().board().display());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod config;
mod error;
mod games;
mod local;
mod manager;
mod remote;
mod store;

pub mod ledger;

// Crate-level exports - Configuration
pub use config::{CONTRACT_ENV, ConfigError, LedgerConfig, RPC_URL_ENV, SyncConfig, SyncMode};

// Crate-level exports - Errors
pub use error::{RejectReason, SyncError};

// Crate-level exports - Manager contract
pub use manager::{GameStateManager, Listener, Listeners, MoveResult, StateListener, Subscription};

// Crate-level exports - Backends
pub use local::LocalGameState;
pub use remote::{RemoteGameState, SessionInfo};

// Crate-level exports - Store
pub use store::{Backend, GameStore, LoadingFlags, MoveOutcome, SkipReason, StoreView};

// Crate-level exports - Game types (tic-tac-toe)
pub use games::tictactoe::{
    Board, BoardPosition, DEFAULT_BOARD_SIZE, Evaluation, GameState, GameStatus, Move, MoveError, Outcome,
    Player, Square, parse_square, rules, to_position, to_row_col,
};
