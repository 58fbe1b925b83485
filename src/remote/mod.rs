//! Game backend whose authoritative state lives on a ledger.
//!
//! The backend binds to one contract game at a time. Its own moves are
//! submitted as transactions; every state change, including the effect of
//! its own moves, arrives through contract events or board polling.
//!
//! Every binding gets a fresh epoch. Callbacks and confirmations carry the
//! epoch they were started under and are discarded once it is stale.
//! Attach requests (`create_game`, `join_game`, `load_existing_game`) take a
//! ticket; only the latest ticket may bind, and `reset` voids all of them.
//!
//! State is published under a single publication lock, so listeners see
//! transitions in the order they were applied. Listeners must not publish on
//! the same backend from inside a callback.

mod classify;
mod reconcile;
mod session;

pub use session::SessionInfo;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{LedgerConfig, SyncMode};
use crate::error::SyncError;
use crate::games::tictactoe::{Board, GameState, Move, Outcome, Player, to_position, to_row_col};
use crate::ledger::{
    Address, Cancellation, ContractEvent, EventFilter, EventKind, GameFinished, GameId, GameJoined, GameRecord,
    GameSummary, LedgerClient, LedgerError, MoveMade, Receipt, board_from_wire, method,
};
use crate::manager::{GameStateManager, Listener, Listeners, MoveResult, StateListener, Subscription};

use classify::classify_submission;
use reconcile::{apply_finished, apply_move, merge_snapshot, needs_line};
use session::GameSession;

/// Event classes a bound game listens to.
const GAME_EVENTS: [EventKind; 3] = [EventKind::GameJoined, EventKind::MoveMade, EventKind::GameFinished];

#[derive(Debug)]
struct RemoteCore {
    user: Option<Address>,
    epoch: u64,
    requests: u64,
    session: Option<GameSession>,
    state: GameState,
    verdict: Option<Outcome>,
}

impl RemoteCore {
    fn is_current(&self, epoch: u64, game_id: GameId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.epoch() == epoch && s.game_id() == game_id)
    }

    fn is_bound_to(&self, game_id: GameId) -> bool {
        self.session.as_ref().is_some_and(|s| s.game_id() == game_id)
    }
}

#[derive(Debug)]
struct RemoteInner {
    client: Option<Arc<dyn LedgerClient>>,
    size: usize,
    sync_mode: SyncMode,
    poll_interval: Duration,
    confirmation_timeout: Duration,
    stake: u64,
    core: Mutex<RemoteCore>,
    publish: Mutex<()>,
    listeners: Listeners<GameState>,
    session_listeners: Listeners<Option<SessionInfo>>,
}

/// Ledger-backed implementation of [`GameStateManager`].
#[derive(Debug)]
pub struct RemoteGameState {
    inner: Arc<RemoteInner>,
}

impl RemoteGameState {
    /// Creates a backend for `board_size`×`board_size` games.
    ///
    /// `client` may be `None`; operations needing the ledger then fail with
    /// [`SyncError::OracleUnavailable`].
    #[instrument(skip(client, config), fields(has_client = client.is_some(), sync_mode = %config.sync_mode()))]
    pub fn new(client: Option<Arc<dyn LedgerClient>>, board_size: usize, config: &LedgerConfig) -> Self {
        Self {
            inner: Arc::new(RemoteInner {
                client,
                size: board_size,
                sync_mode: config.sync_mode(),
                poll_interval: config.poll_interval(),
                confirmation_timeout: config.confirmation_timeout(),
                stake: config.stake_wei(),
                core: Mutex::new(RemoteCore {
                    user: None,
                    epoch: 0,
                    requests: 0,
                    session: None,
                    state: GameState::new(board_size),
                    verdict: None,
                }),
                publish: Mutex::new(()),
                listeners: Listeners::new(),
                session_listeners: Listeners::new(),
            }),
        }
    }

    /// Binds to an existing game and publishes its current state.
    ///
    /// Binding the game that is already bound does nothing.
    #[instrument(skip(self))]
    pub async fn load_existing_game(&self, game_id: GameId) -> Result<(), SyncError> {
        self.inner.client()?;
        self.inner.user()?;
        if self.inner.lock().is_bound_to(game_id) {
            debug!("Already bound to this game");
            return Ok(());
        }
        let ticket = self.inner.claim();
        self.inner.load(game_id, ticket).await
    }

    /// Opens a new game, binds to it, and returns its id.
    #[instrument(skip(self))]
    pub async fn create_game(&self) -> Result<GameId, SyncError> {
        let client = self.inner.client()?;
        let user = self.inner.user()?;
        let ticket = self.inner.claim();

        let receipt = self
            .inner
            .transact(&client, method::CREATE_GAME, vec![], Some(self.inner.stake))
            .await?;
        let game_id = find_event(&client, &receipt, EventKind::GameCreated, EventFilter::any(), |event| {
            matches!(event, ContractEvent::GameCreated(created) if created.player1.same_as(&user))
        })
        .await?
        .game_id();
        info!(game_id, "Game created");
        self.inner.check_ticket(ticket)?;

        self.inner.load(game_id, ticket).await?;
        Ok(game_id)
    }

    /// Joins an open game and binds to it.
    ///
    /// Joining the game that is already bound does nothing.
    #[instrument(skip(self))]
    pub async fn join_game(&self, game_id: GameId) -> Result<(), SyncError> {
        let client = self.inner.client()?;
        let user = self.inner.user()?;
        if self.inner.lock().is_bound_to(game_id) {
            debug!("Already bound to this game");
            return Ok(());
        }
        let ticket = self.inner.claim();

        let receipt = self
            .inner
            .transact(&client, method::JOIN_GAME, vec![json!(game_id)], Some(self.inner.stake))
            .await?;
        find_event(&client, &receipt, EventKind::GameJoined, EventFilter::game(game_id), |event| {
            matches!(event, ContractEvent::GameJoined(joined) if joined.player2.same_as(&user))
        })
        .await?;
        info!(game_id, "Game joined");
        self.inner.check_ticket(ticket)?;

        self.inner.load(game_id, ticket).await
    }

    /// Games waiting for an opponent.
    #[instrument(skip(self))]
    pub async fn open_games(&self) -> Result<Vec<GameSummary>, SyncError> {
        self.inner.list(method::GET_OPEN_GAMES).await
    }

    /// Unfinished games the user plays in.
    #[instrument(skip(self))]
    pub async fn active_games(&self) -> Result<Vec<GameSummary>, SyncError> {
        self.inner.list(method::GET_ACTIVE_GAMES).await
    }

    /// Registers a listener for binding changes. Receives `None` on reset.
    pub fn on_session_change(&self, listener: Listener<Option<SessionInfo>>) -> Subscription {
        self.inner.session_listeners.add(listener)
    }

    /// The caller's address once initialized.
    pub fn user_address(&self) -> Option<Address> {
        self.inner.lock().user.clone()
    }

    /// Id of the bound game.
    pub fn current_game_id(&self) -> Option<GameId> {
        self.inner.lock().session.as_ref().map(GameSession::game_id)
    }

    /// The bound game's identities.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.inner.lock().session.as_ref().map(|s| s.info().clone())
    }

    /// Symbol the caller plays in the bound game.
    pub fn user_symbol(&self) -> Option<Player> {
        let core = self.inner.lock();
        let user = core.user.as_ref()?;
        core.session.as_ref()?.symbol_for(user)
    }
}

#[async_trait::async_trait]
impl GameStateManager for RemoteGameState {
    #[instrument(skip(self))]
    async fn initialize(&self) -> Result<(), SyncError> {
        if self.inner.lock().user.is_some() {
            debug!("Already initialized");
            return Ok(());
        }
        let client = self.inner.client()?;
        let address = client.connect().await.map_err(|e| {
            error!(error = %e, "Could not connect to ledger");
            SyncError::OracleUnavailable(e.message)
        })?;

        let _publish = self.inner.publishing();
        let state = {
            let mut core = self.inner.lock();
            core.user = Some(address.clone());
            core.state.clone()
        };
        info!(address = %address, "Connected");
        self.inner.listeners.notify(&state);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn submit_move(&self, position: usize) -> MoveResult {
        let client = self.inner.client()?;
        let (epoch, game_id) = {
            let core = self.inner.lock();
            if core.user.is_none() {
                return Err(SyncError::NotInitialized);
            }
            let session = core.session.as_ref().ok_or(SyncError::NotInitialized)?;
            if let Err(e) = Move::new(position).check(&core.state) {
                warn!(error = %e, "Rejected move locally");
                return Err(e.into());
            }
            (core.epoch, session.game_id())
        };

        let target = to_row_col(position, self.inner.size);
        debug!(game_id, row = target.row, col = target.col, "Submitting move");
        let receipt = self
            .inner
            .transact(
                &client,
                method::MAKE_MOVE,
                vec![json!(game_id), json!(target.row), json!(target.col)],
                None,
            )
            .await?;

        if !self.inner.lock().is_current(epoch, game_id) {
            warn!(game_id, tx_hash = %receipt.tx_hash, "Confirmation arrived for a stale session");
            return Err(SyncError::SessionChanged);
        }
        info!(game_id, position, block = receipt.block_number, "Move confirmed");
        Ok(None)
    }

    fn read_state(&self) -> GameState {
        self.inner.lock().state.clone()
    }

    #[instrument(skip(self))]
    async fn reset(&self) -> Result<(), SyncError> {
        let _publish = self.inner.publishing();
        let (released, state) = {
            let mut core = self.inner.lock();
            core.epoch += 1;
            core.requests += 1;
            core.verdict = None;
            core.state = GameState::new(self.inner.size);
            (core.session.take(), core.state.clone())
        };
        if let Some(session) = released {
            info!(game_id = session.game_id(), "Unbinding game");
            drop(session);
        }
        self.inner.listeners.notify(&state);
        self.inner.session_listeners.notify(&None);
        Ok(())
    }

    fn subscribe(&self, listener: StateListener) -> Subscription {
        self.inner.listeners.add(listener)
    }
}

impl RemoteInner {
    fn lock(&self) -> MutexGuard<'_, RemoteCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializes state writes with their notification. Taken before `core`.
    fn publishing(&self) -> MutexGuard<'_, ()> {
        self.publish.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issues an attach ticket, voiding every earlier one.
    fn claim(&self) -> u64 {
        let mut core = self.lock();
        core.requests += 1;
        core.requests
    }

    fn check_ticket(&self, ticket: u64) -> Result<(), SyncError> {
        if self.lock().requests == ticket {
            return Ok(());
        }
        warn!(ticket, "Attach request superseded");
        Err(SyncError::SessionChanged)
    }

    fn client(&self) -> Result<Arc<dyn LedgerClient>, SyncError> {
        self.client
            .clone()
            .ok_or_else(|| SyncError::OracleUnavailable("no ledger client configured".to_string()))
    }

    fn user(&self) -> Result<Address, SyncError> {
        self.lock().user.clone().ok_or(SyncError::NotInitialized)
    }

    /// Sends a transaction and waits, bounded, for its receipt.
    #[instrument(skip(self, client, args))]
    async fn transact(
        &self,
        client: &Arc<dyn LedgerClient>,
        name: &str,
        args: Vec<serde_json::Value>,
        value: Option<u64>,
    ) -> Result<Receipt, SyncError> {
        let pending = client
            .send_transaction(name, args, value)
            .await
            .map_err(classify_submission)?;
        let tx_hash = pending.hash().to_string();
        debug!(%tx_hash, "Awaiting confirmation");

        match tokio::time::timeout(self.confirmation_timeout, pending.wait()).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => Err(classify_submission(e)),
            Err(_) => {
                warn!(%tx_hash, timeout = ?self.confirmation_timeout, "Confirmation still pending");
                Err(SyncError::ConfirmationPending { tx_hash })
            }
        }
    }

    async fn list(&self, name: &str) -> Result<Vec<GameSummary>, SyncError> {
        let client = self.client()?;
        let value = client.call(name, vec![]).await?;
        let games: Vec<GameSummary> = serde_json::from_value(value).map_err(LedgerError::from)?;
        debug!(count = games.len(), "Listed games");
        Ok(games)
    }

    /// Reads the game and binds to it if `ticket` is still the latest request.
    #[instrument(skip(self), fields(size = self.size))]
    async fn load(self: &Arc<Self>, game_id: GameId, ticket: u64) -> Result<(), SyncError> {
        let client = self.client()?;
        self.user()?;

        let record = fetch_record(&client, game_id).await?;
        let board = fetch_board(&client, game_id, self.size).await?;

        let epoch = {
            let _publish = self.publishing();
            let mut core = self.lock();
            if core.requests != ticket {
                warn!(game_id, ticket, "Attach request superseded before binding");
                return Err(SyncError::SessionChanged);
            }
            if core.is_bound_to(game_id) {
                debug!(game_id, "Game already bound");
                return Ok(());
            }
            core.epoch += 1;
            let epoch = core.epoch;
            let session = GameSession::new(game_id, record, epoch);
            let info = session.info().clone();
            let released = core.session.replace(session);
            core.verdict = None;
            core.state = GameState::from_board(board);
            let state = core.state.clone();
            drop(core);
            drop(released);
            info!(game_id, epoch, player1 = %info.player1, player2 = %info.player2, "Bound game");

            self.listeners.notify(&state);
            self.session_listeners.notify(&Some(info));
            epoch
        };
        self.start_sync(&client, epoch, game_id).await;
        Ok(())
    }

    /// Starts event subscriptions and/or polling for the binding.
    async fn start_sync(self: &Arc<Self>, client: &Arc<dyn LedgerClient>, epoch: u64, game_id: GameId) {
        let mut handles = Vec::new();
        let mut poll = self.sync_mode.uses_polling();

        if self.sync_mode.uses_events() {
            match self.subscribe_events(client, epoch, game_id) {
                Ok(subscriptions) => handles.extend(subscriptions),
                Err(e) => {
                    warn!(game_id, error = %e, "Event subscription failed, falling back to polling");
                    poll = true;
                }
            }
        }
        if poll {
            match self.spawn_poller(client, epoch, game_id) {
                Some(handle) => handles.push(handle),
                None => warn!(game_id, "No async runtime, polling disabled"),
            }
        }

        {
            let mut core = self.lock();
            if !core.is_current(epoch, game_id) {
                debug!(game_id, "Binding replaced before sync started");
                return;
            }
            if let Some(session) = core.session.as_mut() {
                for handle in handles {
                    session.attach(handle);
                }
                debug!(game_id, epoch, handles = session.handle_count(), poll, "Sync started");
            }
        }

        // Events emitted between the snapshot read and the subscription are
        // picked up by one catch-up read.
        if !poll {
            self.refresh(client, epoch, game_id).await;
        }
    }

    fn subscribe_events(
        self: &Arc<Self>,
        client: &Arc<dyn LedgerClient>,
        epoch: u64,
        game_id: GameId,
    ) -> Result<Vec<Cancellation>, LedgerError> {
        let mut handles = Vec::with_capacity(GAME_EVENTS.len());
        for kind in GAME_EVENTS {
            let weak = Arc::downgrade(self);
            let handler = Arc::new(move |event: ContractEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_event(epoch, event);
                }
            });
            // Earlier handles drop (and cancel) if a later kind fails.
            handles.push(client.subscribe_to_event(kind, EventFilter::game(game_id), handler)?);
        }
        Ok(handles)
    }

    fn spawn_poller(self: &Arc<Self>, client: &Arc<dyn LedgerClient>, epoch: u64, game_id: GameId) -> Option<Cancellation> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let weak = Arc::downgrade(self);
        let client = Arc::clone(client);
        let interval = self.poll_interval;
        let task = runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.lock().is_current(epoch, game_id) {
                    break;
                }
                inner.refresh(&client, epoch, game_id).await;
            }
            debug!(game_id, epoch, "Poller stopped");
        });
        Some(Cancellation::abort_task(task))
    }

    /// Reads the board and merges it. Failures are logged and swallowed.
    async fn refresh(&self, client: &Arc<dyn LedgerClient>, epoch: u64, game_id: GameId) {
        match fetch_board(client, game_id, self.size).await {
            Ok(board) => self.apply_snapshot(epoch, game_id, board),
            Err(e) => warn!(game_id, error = %e, "Board refresh failed"),
        }
    }

    fn apply_snapshot(&self, epoch: u64, game_id: GameId, board: Board) {
        let _publish = self.publishing();
        let merged = {
            let mut core = self.lock();
            if !core.is_current(epoch, game_id) {
                debug!(game_id, epoch, "Discarding snapshot for stale session");
                return;
            }
            match merge_snapshot(&core.state, board, core.verdict) {
                Some(merged) => {
                    core.state = merged.clone();
                    merged
                }
                None => return,
            }
        };
        debug!(game_id, occupied = merged.board().occupied_count(), status = ?merged.status(), "Snapshot applied");
        self.listeners.notify(&merged);
    }

    fn on_event(self: &Arc<Self>, epoch: u64, event: ContractEvent) {
        let game_id = event.game_id();
        debug!(game_id, epoch, event = %event.kind(), "Event received");
        match event {
            ContractEvent::MoveMade(made) => self.on_move(epoch, made),
            ContractEvent::GameFinished(finished) => self.on_finished(epoch, finished),
            ContractEvent::GameJoined(joined) => self.on_joined(epoch, joined),
            ContractEvent::GameCreated(_) => {}
        }
    }

    fn on_move(&self, epoch: u64, made: MoveMade) {
        let _publish = self.publishing();
        let next_state = {
            let mut core = self.lock();
            if !core.is_current(epoch, made.game_id) {
                debug!(game_id = made.game_id, "Discarding move for stale session");
                return;
            }
            let Some(session) = core.session.as_ref() else {
                return;
            };
            let Some(mark) = session.symbol_for(&made.player) else {
                warn!(player = %made.player, "Move by an address outside the game");
                return;
            };
            let next = session.symbol_for(&made.next_player);
            if made.row >= self.size || made.col >= self.size {
                warn!(row = made.row, col = made.col, "Move outside the board");
                return;
            }
            let position = to_position(made.row, made.col, self.size);
            match apply_move(&core.state, position, mark, next) {
                Ok(next_state) => {
                    core.state = next_state.clone();
                    next_state
                }
                Err(skip) => {
                    debug!(position, %mark, %skip, "Move event not applied");
                    return;
                }
            }
        };
        info!(
            game_id = made.game_id,
            player = %made.player,
            row = made.row,
            col = made.col,
            status = ?next_state.status(),
            "Move observed"
        );
        self.listeners.notify(&next_state);
    }

    fn on_finished(self: &Arc<Self>, epoch: u64, finished: GameFinished) {
        let game_id = finished.game_id;
        let publish = self.publishing();
        let (applied, awaiting_line, info) = {
            let mut core = self.lock();
            if !core.is_current(epoch, game_id) {
                debug!(game_id, "Discarding result for stale session");
                return;
            }
            let verdict = if finished.is_draw {
                Outcome::Draw
            } else {
                let winner = core.session.as_ref().and_then(|s| s.symbol_for(&finished.winner));
                match winner {
                    Some(player) => Outcome::Winner(player),
                    None => {
                        warn!(winner = %finished.winner, "Winner outside the game");
                        return;
                    }
                }
            };
            core.verdict = Some(verdict);
            let info = core
                .session
                .as_mut()
                .and_then(|s| s.mark_finished().then(|| s.info().clone()));
            let applied = apply_finished(&core.state, verdict);
            if let Some(state) = &applied {
                core.state = state.clone();
            }
            let awaiting_line = applied.as_ref().is_some_and(needs_line);
            (applied, awaiting_line, info)
        };

        if let Some(info) = info {
            self.session_listeners.notify(&Some(info));
        }
        match applied {
            Some(state) => {
                info!(game_id, status = ?state.status(), "Game finished");
                self.listeners.notify(&state);
            }
            None => debug!(game_id, "Result already reflected"),
        }
        drop(publish);

        if awaiting_line {
            info!(game_id, "Result ahead of board, refetching");
            self.spawn_refetch(epoch, game_id);
        }
    }

    fn on_joined(&self, epoch: u64, joined: GameJoined) {
        let _publish = self.publishing();
        let info = {
            let mut core = self.lock();
            if !core.is_current(epoch, joined.game_id) {
                return;
            }
            let Some(session) = core.session.as_mut() else {
                return;
            };
            if !session.set_players(joined.player1, joined.player2) {
                return;
            }
            session.info().clone()
        };
        info!(game_id = info.game_id, player2 = %info.player2, "Opponent joined");
        self.session_listeners.notify(&Some(info));
    }

    /// Re-reads the board until it shows the winning line or the binding ends.
    fn spawn_refetch(self: &Arc<Self>, epoch: u64, game_id: GameId) {
        let Ok(client) = self.client() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(game_id, "No async runtime, cannot refetch board");
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.poll_interval;
        let task = runtime.spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.refresh(&client, epoch, game_id).await;
                {
                    let core = inner.lock();
                    if !core.is_current(epoch, game_id) || !needs_line(&core.state) {
                        break;
                    }
                }
                drop(inner);
                tokio::time::sleep(interval).await;
            }
            debug!(game_id, epoch, "Refetch stopped");
        });

        let mut core = self.lock();
        if !core.is_current(epoch, game_id) {
            task.abort();
            return;
        }
        if let Some(session) = core.session.as_mut() {
            session.attach(Cancellation::abort_task(task));
        }
    }
}

async fn fetch_record(client: &Arc<dyn LedgerClient>, game_id: GameId) -> Result<GameRecord, LedgerError> {
    let value = client.call(method::GAMES, vec![json!(game_id)]).await?;
    Ok(serde_json::from_value(value)?)
}

async fn fetch_board(client: &Arc<dyn LedgerClient>, game_id: GameId, size: usize) -> Result<Board, LedgerError> {
    let value = client.call(method::GET_GAME, vec![json!(game_id)]).await?;
    let rows: Vec<Vec<u8>> = serde_json::from_value(value)?;
    board_from_wire(size, &rows).ok_or_else(|| LedgerError::decode(format!("board for game {} is not {}x{}", game_id, size, size)))
}

/// Finds the confirmation event of `receipt`.
///
/// Looks at the receipt's own logs first, then queries history for the
/// receipt's block.
#[instrument(skip(client, receipt, accept), fields(tx_hash = %receipt.tx_hash, block = receipt.block_number))]
async fn find_event(
    client: &Arc<dyn LedgerClient>,
    receipt: &Receipt,
    kind: EventKind,
    filter: EventFilter,
    accept: impl Fn(&ContractEvent) -> bool,
) -> Result<ContractEvent, SyncError> {
    if let Some(event) = receipt.events().into_iter().find(|e| e.kind() == kind && accept(e)) {
        return Ok(event);
    }
    debug!("Event missing from receipt, querying history");

    let history = client
        .query_past_events(kind, filter, receipt.block_number, receipt.block_number)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "History query failed");
            Vec::new()
        });
    let from_history = history
        .iter()
        .filter(|log| log.tx_hash == receipt.tx_hash)
        .chain(history.iter())
        .filter_map(|log| log.decode())
        .find(|e| accept(e));

    from_history.ok_or_else(|| {
        error!(event = %kind, "Confirmation event not found");
        SyncError::EventNotFound {
            event: kind.to_string(),
        }
    })
}
