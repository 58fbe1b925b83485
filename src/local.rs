//! In-process game backend with no external oracle.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, instrument, warn};

use crate::error::SyncError;
use crate::games::tictactoe::{DEFAULT_BOARD_SIZE, GameState, Move};
use crate::manager::{GameStateManager, Listeners, MoveResult, StateListener, Subscription};

#[derive(Debug)]
struct LocalInner {
    initialized: bool,
    state: GameState,
}

/// Deterministic backend: moves are validated and applied immediately.
///
/// Each transition is applied and published under one lock, so listeners
/// observe states in order. A listener must not call back into
/// `submit_move`, `initialize` or `reset` on the same backend.
#[derive(Debug)]
pub struct LocalGameState {
    size: usize,
    inner: Mutex<LocalInner>,
    publish: Mutex<()>,
    listeners: Listeners<GameState>,
}

impl LocalGameState {
    /// Creates an uninitialized `size`×`size` game.
    #[instrument]
    pub fn new(size: usize) -> Self {
        debug!(size, "Creating local game");
        Self {
            size,
            inner: Mutex::new(LocalInner {
                initialized: false,
                state: GameState::new(size),
            }),
            publish: Mutex::new(()),
            listeners: Listeners::new(),
        }
    }

    /// Board edge length.
    pub fn size(&self) -> usize {
        self.size
    }

    fn publishing(&self) -> MutexGuard<'_, ()> {
        self.publish.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_fresh(&self) -> GameState {
        let fresh = GameState::new(self.size);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.initialized = true;
        inner.state = fresh.clone();
        fresh
    }
}

impl Default for LocalGameState {
    fn default() -> Self {
        Self::new(DEFAULT_BOARD_SIZE)
    }
}

#[async_trait::async_trait]
impl GameStateManager for LocalGameState {
    #[instrument(skip(self), fields(size = self.size))]
    async fn initialize(&self) -> Result<(), SyncError> {
        let _publish = self.publishing();
        let state = self.start_fresh();
        info!("Local game initialized");
        self.listeners.notify(&state);
        Ok(())
    }

    #[instrument(skip(self), fields(size = self.size))]
    async fn submit_move(&self, position: usize) -> MoveResult {
        let _publish = self.publishing();
        let state = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if !inner.initialized {
                warn!("Move before initialize");
                return Err(SyncError::NotInitialized);
            }
            if let Err(e) = Move::new(position).check(&inner.state) {
                warn!(error = %e, "Rejected local move");
                return Err(e.into());
            }
            inner.state.apply_move(position);
            inner.state.clone()
        };

        info!(
            position,
            next = %state.current_player(),
            status = ?state.status(),
            "Move applied"
        );
        self.listeners.notify(&state);
        Ok(Some(state))
    }

    fn read_state(&self) -> GameState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    #[instrument(skip(self), fields(size = self.size))]
    async fn reset(&self) -> Result<(), SyncError> {
        let _publish = self.publishing();
        let state = self.start_fresh();
        info!("Local game reset");
        self.listeners.notify(&state);
        Ok(())
    }

    fn subscribe(&self, listener: StateListener) -> Subscription {
        self.listeners.add(listener)
    }
}
