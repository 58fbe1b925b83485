//! Reconciling store between a UI and one game backend.
//!
//! The store keeps the last published [`GameState`], at most one pending
//! (optimistic) move, loading flags and the local player's identity. Views
//! are published through a `tokio::sync::watch` channel.

use std::sync::Arc;

use derive_getters::Getters;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SyncError;
use crate::games::tictactoe::{GameState, Player};
use crate::ledger::{Address, GameId};
use crate::local::LocalGameState;
use crate::manager::{GameStateManager, Subscription};
use crate::remote::{RemoteGameState, SessionInfo};

/// The backend a store drives.
#[derive(Debug, Clone)]
pub enum Backend {
    /// In-process game.
    Local(Arc<LocalGameState>),
    /// Ledger-backed game.
    Remote(Arc<RemoteGameState>),
}

impl Backend {
    /// The backend as a [`GameStateManager`].
    pub fn manager(&self) -> &dyn GameStateManager {
        match self {
            Backend::Local(local) => &**local,
            Backend::Remote(remote) => &**remote,
        }
    }

    /// The ledger backend, if that is the active one.
    pub fn remote(&self) -> Option<&Arc<RemoteGameState>> {
        match self {
            Backend::Remote(remote) => Some(remote),
            Backend::Local(_) => None,
        }
    }
}

/// Operations currently in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadingFlags {
    /// `initialize` running.
    pub initializing: bool,
    /// `load_game` running.
    pub loading_game: bool,
    /// `create_game` running.
    pub creating: bool,
    /// `join_game` running.
    pub joining: bool,
    /// A move is being submitted.
    pub moving: bool,
    /// `reset_game` running.
    pub resetting: bool,
}

/// Everything a UI renders.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct StoreView {
    /// Last state the backend published.
    game_state: GameState,
    /// Square of the submitted, unconfirmed move.
    pending_move: Option<usize>,
    /// Operations in flight.
    loading: LoadingFlags,
    /// Caller's ledger address.
    user_address: Option<Address>,
    /// Bound remote game.
    current_game_id: Option<GameId>,
    /// Symbol the caller places.
    player_symbol: Option<Player>,
    /// Caller created the bound game.
    is_player1: bool,
    /// Caller joined the bound game.
    is_player2: bool,
    /// Bound game has no opponent yet.
    is_waiting_for_opponent: bool,
    /// Message of the last failed operation.
    last_error: Option<String>,
}

impl StoreView {
    fn new(game_state: GameState) -> Self {
        Self {
            game_state,
            pending_move: None,
            loading: LoadingFlags::default(),
            user_address: None,
            current_game_id: None,
            player_symbol: None,
            is_player1: false,
            is_player2: false,
            is_waiting_for_opponent: false,
            last_error: None,
        }
    }

    /// Accepts a published state, resolving the pending move once its
    /// square is filled.
    fn sync_state(&mut self, state: &GameState) {
        if let Some(pending) = self.pending_move.filter(|p| !state.board().is_vacant(*p)) {
            debug!(position = pending, "Pending move confirmed");
            self.pending_move = None;
        }
        self.game_state = state.clone();
    }

    fn apply_session(&mut self, session: Option<&SessionInfo>) {
        match session {
            Some(info) => {
                let symbol = self.user_address.as_ref().and_then(|user| info.symbol_for(user));
                self.current_game_id = Some(info.game_id);
                self.player_symbol = symbol;
                self.is_player1 = symbol == Some(Player::X);
                self.is_player2 = symbol == Some(Player::O);
                self.is_waiting_for_opponent = info.is_waiting_for_opponent();
            }
            None => {
                self.current_game_id = None;
                self.player_symbol = None;
                self.is_player1 = false;
                self.is_player2 = false;
                self.is_waiting_for_opponent = false;
            }
        }
    }
}

/// Why `make_move` did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SkipReason {
    /// Another move awaits confirmation.
    #[display("a move is already pending")]
    MovePending,
    /// The square is taken or off the board.
    #[display("square unavailable")]
    SquareUnavailable,
    /// The game is over.
    #[display("game is over")]
    GameOver,
}

/// Result of [`GameStore::make_move`].
#[derive(Debug, Clone)]
pub enum MoveOutcome {
    /// The backend accepted the move.
    Accepted,
    /// The store refused the move without contacting the backend.
    Skipped(SkipReason),
    /// The backend refused the move.
    Rejected(SyncError),
}

impl MoveOutcome {
    /// True if the backend accepted the move.
    pub fn is_accepted(&self) -> bool {
        matches!(self, MoveOutcome::Accepted)
    }
}

/// The single consumer of a game backend.
pub struct GameStore {
    backend: Backend,
    view: Arc<watch::Sender<StoreView>>,
    subscriptions: Vec<Subscription>,
}

impl GameStore {
    /// Creates a store and subscribes it to `backend`.
    #[instrument(skip(backend))]
    pub fn new(backend: Backend) -> Self {
        let (view, _) = watch::channel(StoreView::new(backend.manager().read_state()));
        let view = Arc::new(view);
        let mut subscriptions = Vec::new();

        let state_view = Arc::clone(&view);
        subscriptions.push(backend.manager().subscribe(Arc::new(move |state: &GameState| {
            state_view.send_modify(|v| v.sync_state(state));
        })));

        if let Some(remote) = backend.remote() {
            let session_view = Arc::clone(&view);
            subscriptions.push(remote.on_session_change(Arc::new(move |session: &Option<SessionInfo>| {
                session_view.send_modify(|v| v.apply_session(session.as_ref()));
            })));
        }

        debug!(subscriptions = subscriptions.len(), "Store attached to backend");
        Self {
            backend,
            view,
            subscriptions,
        }
    }

    /// Store over a fresh local game.
    pub fn local(size: usize) -> Self {
        Self::new(Backend::Local(Arc::new(LocalGameState::new(size))))
    }

    /// Store over a ledger backend.
    pub fn remote(remote: RemoteGameState) -> Self {
        Self::new(Backend::Remote(Arc::new(remote)))
    }

    /// The driven backend.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> StoreView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn watch(&self) -> watch::Receiver<StoreView> {
        self.view.subscribe()
    }

    /// Initializes the backend and records the caller's address.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), SyncError> {
        self.set_loading(|l| l.initializing = true);
        let result = self.backend.manager().initialize().await;
        let user = self.backend.remote().and_then(|r| r.user_address());
        self.view.send_modify(|v| {
            v.loading.initializing = false;
            if user.is_some() {
                v.user_address = user;
            }
        });
        self.record(result)
    }

    /// Submits a move optimistically.
    ///
    /// Does nothing while another move is pending, on an unavailable square,
    /// or once the game is over. The pending marker is cleared when the
    /// backend answers, whatever the answer.
    #[instrument(skip(self))]
    pub async fn make_move(&self, position: usize) -> MoveOutcome {
        let mut skip = None;
        self.view.send_if_modified(|v| {
            skip = if v.pending_move.is_some() {
                Some(SkipReason::MovePending)
            } else if v.game_state.is_terminal() {
                Some(SkipReason::GameOver)
            } else if !v.game_state.board().is_vacant(position) {
                Some(SkipReason::SquareUnavailable)
            } else {
                None
            };
            if skip.is_some() {
                return false;
            }
            v.pending_move = Some(position);
            v.loading.moving = true;
            true
        });
        if let Some(reason) = skip {
            debug!(%reason, "Move skipped");
            return MoveOutcome::Skipped(reason);
        }

        let result = self.backend.manager().submit_move(position).await;
        self.view.send_modify(|v| {
            v.pending_move = None;
            v.loading.moving = false;
        });
        match self.record(result) {
            Ok(_) => MoveOutcome::Accepted,
            Err(e) => MoveOutcome::Rejected(e),
        }
    }

    /// Binds the ledger backend to an existing game.
    #[instrument(skip(self))]
    pub async fn load_game(&self, game_id: GameId) -> Result<(), SyncError> {
        let remote = self.require_remote("load_game")?;
        self.initialize().await?;
        self.set_loading(|l| l.loading_game = true);
        let result = remote.load_existing_game(game_id).await;
        self.set_loading(|l| l.loading_game = false);
        self.update_player_info();
        self.record(result)
    }

    /// Creates a ledger game and binds to it.
    #[instrument(skip(self))]
    pub async fn create_game(&self) -> Result<GameId, SyncError> {
        let remote = self.require_remote("create_game")?;
        self.initialize().await?;
        self.set_loading(|l| l.creating = true);
        let result = remote.create_game().await;
        self.set_loading(|l| l.creating = false);
        self.update_player_info();
        self.record(result)
    }

    /// Joins a ledger game and binds to it.
    #[instrument(skip(self))]
    pub async fn join_game(&self, game_id: GameId) -> Result<(), SyncError> {
        let remote = self.require_remote("join_game")?;
        self.initialize().await?;
        self.set_loading(|l| l.joining = true);
        let result = remote.join_game(game_id).await;
        self.set_loading(|l| l.joining = false);
        self.update_player_info();
        self.record(result)
    }

    /// Resets the backend and clears derived flags.
    #[instrument(skip(self))]
    pub async fn reset_game(&self) -> Result<(), SyncError> {
        self.set_loading(|l| l.resetting = true);
        let result = self.backend.manager().reset().await;
        let state = self.backend.manager().read_state();
        self.view.send_modify(|v| {
            v.loading.resetting = false;
            v.pending_move = None;
            v.last_error = None;
            v.apply_session(None);
            v.game_state = state;
        });
        info!("Store reset");
        self.record(result)
    }

    /// Re-derives identity flags from the backend's bound game.
    pub fn update_player_info(&self) {
        let Some(remote) = self.backend.remote() else {
            return;
        };
        let user = remote.user_address();
        let session = remote.session_info();
        self.view.send_modify(|v| {
            if user.is_some() {
                v.user_address = user;
            }
            v.apply_session(session.as_ref());
        });
    }

    fn require_remote(&self, operation: &'static str) -> Result<Arc<RemoteGameState>, SyncError> {
        match self.backend.remote() {
            Some(remote) => Ok(Arc::clone(remote)),
            None => {
                warn!(operation, "Operation needs the ledger backend");
                let err = SyncError::Unsupported(operation);
                self.view.send_modify(|v| v.last_error = Some(err.to_string()));
                Err(err)
            }
        }
    }

    fn set_loading(&self, update: impl FnOnce(&mut LoadingFlags)) {
        self.view.send_modify(|v| update(&mut v.loading));
    }

    /// Records the outcome in `last_error`.
    fn record<T>(&self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        match &result {
            Ok(_) => self.view.send_modify(|v| v.last_error = None),
            Err(e) => {
                error!(error = %e, "Store operation failed");
                let message = e.to_string();
                self.view.send_modify(|v| v.last_error = Some(message));
            }
        }
        result
    }
}

impl Drop for GameStore {
    fn drop(&mut self) {
        for subscription in std::mem::take(&mut self.subscriptions) {
            subscription.unsubscribe();
        }
    }
}

impl std::fmt::Debug for GameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameStore")
            .field("backend", &self.backend)
            .field("view", &*self.view.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_clears_filled_pending() {
        let mut view = StoreView::new(GameState::new(3));
        view.pending_move = Some(4);
        let mut state = GameState::new(3);
        state.apply_move(0);
        view.sync_state(&state);
        assert_eq!(view.pending_move, Some(4));

        state.apply_move(4);
        view.sync_state(&state);
        assert_eq!(view.pending_move, None);
        assert_eq!(view.game_state, state);
    }

    #[test]
    fn test_session_flags() {
        let mut view = StoreView::new(GameState::new(3));
        view.user_address = Some(Address::new("0xBEEF"));
        let info = SessionInfo {
            game_id: 4,
            player1: Address::new("0xbeef"),
            player2: Address::zero(),
            is_finished: false,
        };
        view.apply_session(Some(&info));
        assert!(view.is_player1);
        assert!(!view.is_player2);
        assert!(view.is_waiting_for_opponent);
        assert_eq!(view.player_symbol, Some(Player::X));

        view.apply_session(None);
        assert_eq!(view.current_game_id, None);
        assert!(!view.is_player1);
    }
}
