//! In-process ledger that emulates the game contract.
//!
//! Transactions execute when submitted. Events go to subscribers straight
//! away unless confirmations are held, in which case events and receipts
//! are released together by [`SimulatedChain::release_confirmations`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::events::{ContractEvent, EventFilter, EventKind, GameCreated, GameFinished, GameJoined, MoveMade};
use super::types::{Address, GameId, GameRecord, GameSummary, LogRecord, Receipt, board_to_wire};
use super::{Cancellation, EventHandler, LedgerClient, LedgerError, LedgerErrorKind, PendingTransaction, method};
use crate::games::tictactoe::{Board, Outcome, Player, rules, to_position};

/// Stake the simulated contract charges to create or join (0.1 ETH).
pub const DEFAULT_STAKE_WEI: u64 = 100_000_000_000_000_000;

#[derive(Debug, Clone)]
struct SimGame {
    id: GameId,
    player1: Address,
    player2: Address,
    board: Board,
    current: Address,
    is_finished: bool,
    moves: u64,
}

impl SimGame {
    fn summary(&self) -> GameSummary {
        GameSummary {
            id: self.id,
            player1: self.player1.clone(),
            player2: self.player2.clone(),
            current_player: self.current.clone(),
            is_finished: self.is_finished,
            moves: self.moves,
        }
    }

    fn is_participant(&self, who: &Address) -> bool {
        self.player1.same_as(who) || (!self.player2.is_unset() && self.player2.same_as(who))
    }
}

struct Subscriber {
    id: u64,
    kind: EventKind,
    filter: EventFilter,
    handler: EventHandler,
}

#[derive(Debug, Default, Clone)]
struct Faults {
    strip_receipt_logs: bool,
    hide_event_history: bool,
    refuse_subscriptions: bool,
    fail_reads: bool,
    muted: Vec<EventKind>,
}

struct ChainState {
    board_size: usize,
    stake: u64,
    block: u64,
    tx_count: u64,
    next_game_id: GameId,
    games: BTreeMap<GameId, SimGame>,
    logs: Vec<LogRecord>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    held: bool,
    queued: Vec<ContractEvent>,
    faults: Faults,
}

struct ChainInner {
    state: Mutex<ChainState>,
    confirmed: watch::Sender<u64>,
}

impl ChainInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers events to the subscribers registered at delivery time.
    fn dispatch(&self, events: Vec<ContractEvent>) {
        for event in events {
            let handlers: Vec<EventHandler> = {
                let state = self.lock();
                if state.faults.muted.contains(&event.kind()) {
                    debug!(event = %event.kind(), game_id = event.game_id(), "Event muted");
                    continue;
                }
                state
                    .subscribers
                    .iter()
                    .filter(|s| s.kind == event.kind() && s.filter.matches(&event))
                    .map(|s| Arc::clone(&s.handler))
                    .collect()
            };
            debug!(event = %event.kind(), game_id = event.game_id(), handlers = handlers.len(), "Dispatching event");
            for handler in handlers {
                handler(event.clone());
            }
        }
    }
}

/// A shared simulated ledger. Cloning shares the chain.
#[derive(Clone)]
pub struct SimulatedChain {
    inner: Arc<ChainInner>,
}

impl SimulatedChain {
    /// Creates a chain hosting `board_size`×`board_size` games.
    #[instrument]
    pub fn new(board_size: usize) -> Self {
        info!(board_size, "Starting simulated chain");
        let (confirmed, _) = watch::channel(0);
        Self {
            inner: Arc::new(ChainInner {
                state: Mutex::new(ChainState {
                    board_size,
                    stake: DEFAULT_STAKE_WEI,
                    block: 0,
                    tx_count: 0,
                    next_game_id: 1,
                    games: BTreeMap::new(),
                    logs: Vec::new(),
                    subscribers: Vec::new(),
                    next_subscriber: 0,
                    held: false,
                    queued: Vec::new(),
                    faults: Faults::default(),
                }),
                confirmed,
            }),
        }
    }

    /// Sets the stake `createGame` and `joinGame` require.
    pub fn with_stake(self, stake: u64) -> Self {
        self.inner.lock().stake = stake;
        self
    }

    /// Returns a client signing as `address`.
    pub fn client(&self, address: impl Into<Address>) -> Arc<dyn LedgerClient> {
        Arc::new(SimulatedClient {
            chain: self.clone(),
            address: address.into(),
        })
    }

    /// Height of the last mined block.
    pub fn block_number(&self) -> u64 {
        self.inner.lock().block
    }

    /// Number of live event subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Stops delivering events and receipts until released.
    pub fn hold_confirmations(&self) {
        debug!("Holding confirmations");
        self.inner.lock().held = true;
    }

    /// Delivers queued events, then resolves every waiting receipt.
    #[instrument(skip(self))]
    pub fn release_confirmations(&self) {
        let (queued, block) = {
            let mut state = self.inner.lock();
            state.held = false;
            (std::mem::take(&mut state.queued), state.block)
        };
        debug!(events = queued.len(), block, "Releasing confirmations");
        self.inner.dispatch(queued);
        self.inner.confirmed.send_replace(block);
    }

    /// Omits logs from receipts, forcing history lookups.
    pub fn strip_receipt_logs(&self, on: bool) {
        self.inner.lock().faults.strip_receipt_logs = on;
    }

    /// Makes history queries return nothing.
    pub fn hide_event_history(&self, on: bool) {
        self.inner.lock().faults.hide_event_history = on;
    }

    /// Makes new subscriptions fail.
    pub fn refuse_subscriptions(&self, on: bool) {
        self.inner.lock().faults.refuse_subscriptions = on;
    }

    /// Makes read-only calls fail.
    pub fn fail_reads(&self, on: bool) {
        self.inner.lock().faults.fail_reads = on;
    }

    /// Stops pushing `kind` to subscribers. Logs and receipts still carry it.
    pub fn mute_events(&self, kind: EventKind, on: bool) {
        let mut state = self.inner.lock();
        state.faults.muted.retain(|k| *k != kind);
        if on {
            state.faults.muted.push(kind);
        }
    }

    fn read(&self, caller: &Address, name: &str, args: &[Value]) -> Result<Value, LedgerError> {
        let state = self.inner.lock();
        if state.faults.fail_reads {
            return Err(LedgerError::new(LedgerErrorKind::Transport, "simulated read failure"));
        }
        match name {
            method::GET_GAME => {
                let game = state.game(arg_u64(args, 0)?)?;
                Ok(json!(board_to_wire(&game.board)))
            }
            method::GAMES => {
                let game = state.game(arg_u64(args, 0)?)?;
                let record = GameRecord {
                    player1: game.player1.clone(),
                    player2: game.player2.clone(),
                    is_finished: game.is_finished,
                };
                Ok(serde_json::to_value(record)?)
            }
            method::GET_OPEN_GAMES => {
                let open: Vec<GameSummary> = state
                    .games
                    .values()
                    .filter(|g| g.player2.is_unset() && !g.is_finished)
                    .map(SimGame::summary)
                    .collect();
                Ok(serde_json::to_value(open)?)
            }
            method::GET_ACTIVE_GAMES => {
                let active: Vec<GameSummary> = state
                    .games
                    .values()
                    .filter(|g| !g.is_finished && g.is_participant(caller))
                    .map(SimGame::summary)
                    .collect();
                Ok(serde_json::to_value(active)?)
            }
            other => Err(LedgerError::reverted(format!("unknown method {}", other))),
        }
    }

    #[instrument(skip(self, caller, args), fields(caller = %caller))]
    fn execute(
        &self,
        caller: &Address,
        name: &str,
        args: &[Value],
        value: Option<u64>,
    ) -> Result<SimulatedTransaction, LedgerError> {
        let (events, pending, held) = {
            let mut state = self.inner.lock();
            let events = state.apply(caller, name, args, value.unwrap_or(0))?;

            state.block += 1;
            state.tx_count += 1;
            let block = state.block;
            let tx_hash = format!("0x{:064x}", state.tx_count);
            let logs: Vec<LogRecord> = events
                .iter()
                .map(|e| LogRecord::from_event(e, block, &tx_hash))
                .collect();
            state.logs.extend(logs.iter().cloned());

            let receipt = Receipt {
                tx_hash: tx_hash.clone(),
                block_number: block,
                logs: if state.faults.strip_receipt_logs { Vec::new() } else { logs },
            };
            let pending = SimulatedTransaction {
                hash: tx_hash,
                block,
                receipt,
                confirmed: self.inner.confirmed.subscribe(),
            };

            if state.held {
                state.queued.extend(events);
                (Vec::new(), pending, true)
            } else {
                (events, pending, false)
            }
        };

        info!(method = name, block = pending.block, tx_hash = %pending.hash, held, "Mined transaction");
        if !held {
            self.inner.dispatch(events);
            self.inner.confirmed.send_replace(pending.block);
        }
        Ok(pending)
    }

    fn subscribe(&self, kind: EventKind, filter: EventFilter, handler: EventHandler) -> Result<Cancellation, LedgerError> {
        let mut state = self.inner.lock();
        if state.faults.refuse_subscriptions {
            return Err(LedgerError::new(LedgerErrorKind::Unavailable, "event subscriptions unavailable"));
        }
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.push(Subscriber {
            id,
            kind,
            filter,
            handler,
        });
        debug!(subscriber = id, %kind, ?filter, "Subscribed");

        let weak: Weak<ChainInner> = Arc::downgrade(&self.inner);
        Ok(Cancellation::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().subscribers.retain(|s| s.id != id);
                debug!(subscriber = id, "Unsubscribed");
            }
        }))
    }

    fn history(&self, kind: EventKind, filter: EventFilter, from_block: u64, to_block: u64) -> Vec<LogRecord> {
        let state = self.inner.lock();
        if state.faults.hide_event_history {
            return Vec::new();
        }
        let name = kind.to_string();
        state
            .logs
            .iter()
            .filter(|log| log.block_number >= from_block && log.block_number <= to_block && log.name == name)
            .filter(|log| log.decode().is_some_and(|e| filter.matches(&e)))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for SimulatedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("SimulatedChain")
            .field("block", &state.block)
            .field("games", &state.games.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl ChainState {
    fn game(&self, id: GameId) -> Result<&SimGame, LedgerError> {
        self.games
            .get(&id)
            .ok_or_else(|| LedgerError::reverted("game does not exist"))
    }

    fn apply(&mut self, caller: &Address, name: &str, args: &[Value], value: u64) -> Result<Vec<ContractEvent>, LedgerError> {
        match name {
            method::CREATE_GAME => self.create_game(caller, value),
            method::JOIN_GAME => self.join_game(caller, arg_u64(args, 0)?, value),
            method::MAKE_MOVE => {
                let id = arg_u64(args, 0)?;
                let row = arg_u64(args, 1)? as usize;
                let col = arg_u64(args, 2)? as usize;
                self.make_move(caller, id, row, col)
            }
            other => Err(LedgerError::reverted(format!("unknown method {}", other))),
        }
    }

    fn create_game(&mut self, caller: &Address, value: u64) -> Result<Vec<ContractEvent>, LedgerError> {
        if value != self.stake {
            return Err(LedgerError::reverted("incorrect stake"));
        }
        let id = self.next_game_id;
        self.next_game_id += 1;
        self.games.insert(
            id,
            SimGame {
                id,
                player1: caller.clone(),
                player2: Address::zero(),
                board: Board::empty(self.board_size),
                current: caller.clone(),
                is_finished: false,
                moves: 0,
            },
        );
        Ok(vec![ContractEvent::GameCreated(GameCreated {
            game_id: id,
            player1: caller.clone(),
        })])
    }

    fn join_game(&mut self, caller: &Address, id: GameId, value: u64) -> Result<Vec<ContractEvent>, LedgerError> {
        let stake = self.stake;
        let game = self
            .games
            .get_mut(&id)
            .ok_or_else(|| LedgerError::reverted("game does not exist"))?;
        if !game.player2.is_unset() || game.is_finished || game.player1.same_as(caller) {
            return Err(LedgerError::reverted("game not joinable"));
        }
        if value != stake {
            return Err(LedgerError::reverted("incorrect stake"));
        }
        game.player2 = caller.clone();
        Ok(vec![ContractEvent::GameJoined(GameJoined {
            game_id: id,
            player1: game.player1.clone(),
            player2: caller.clone(),
        })])
    }

    fn make_move(&mut self, caller: &Address, id: GameId, row: usize, col: usize) -> Result<Vec<ContractEvent>, LedgerError> {
        let game = self
            .games
            .get_mut(&id)
            .ok_or_else(|| LedgerError::reverted("game does not exist"))?;
        if game.player2.is_unset() {
            return Err(LedgerError::reverted("game not started"));
        }
        if game.is_finished {
            return Err(LedgerError::reverted("game already finished"));
        }
        if !game.current.same_as(caller) {
            return Err(LedgerError::reverted("not your turn"));
        }
        let size = game.board.size();
        if row >= size || col >= size {
            return Err(LedgerError::reverted("position out of range"));
        }
        let position = to_position(row, col, size);
        if !game.board.is_vacant(position) {
            return Err(LedgerError::reverted("cell already occupied"));
        }

        let (mark, next) = if game.player1.same_as(caller) {
            (Player::X, game.player2.clone())
        } else {
            (Player::O, game.player1.clone())
        };
        game.board.place(position, mark);
        game.moves += 1;
        game.current = next.clone();

        let mut events = vec![ContractEvent::MoveMade(MoveMade {
            game_id: id,
            player: caller.clone(),
            row,
            col,
            next_player: next,
        })];

        if let Some(evaluation) = rules::evaluate(&game.board) {
            game.is_finished = true;
            let (winner, is_draw) = match evaluation.outcome() {
                Outcome::Winner(_) => (caller.clone(), false),
                Outcome::Draw => (Address::zero(), true),
            };
            events.push(ContractEvent::GameFinished(GameFinished {
                game_id: id,
                winner,
                is_draw,
            }));
        }
        Ok(events)
    }
}

fn arg_u64(args: &[Value], index: usize) -> Result<u64, LedgerError> {
    args.get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| LedgerError::decode(format!("argument {} is not an unsigned integer", index)))
}

#[derive(Debug)]
struct SimulatedClient {
    chain: SimulatedChain,
    address: Address,
}

#[async_trait::async_trait]
impl LedgerClient for SimulatedClient {
    async fn connect(&self) -> Result<Address, LedgerError> {
        Ok(self.address.clone())
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, LedgerError> {
        self.chain.read(&self.address, method, &args)
    }

    async fn send_transaction(
        &self,
        method: &str,
        args: Vec<Value>,
        value: Option<u64>,
    ) -> Result<Box<dyn PendingTransaction>, LedgerError> {
        match self.chain.execute(&self.address, method, &args, value) {
            Ok(tx) => Ok(Box::new(tx)),
            Err(e) => {
                warn!(method, error = %e, "Simulated transaction reverted");
                Err(e)
            }
        }
    }

    fn subscribe_to_event(
        &self,
        kind: EventKind,
        filter: EventFilter,
        handler: EventHandler,
    ) -> Result<Cancellation, LedgerError> {
        self.chain.subscribe(kind, filter, handler)
    }

    async fn query_past_events(
        &self,
        kind: EventKind,
        filter: EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogRecord>, LedgerError> {
        Ok(self.chain.history(kind, filter, from_block, to_block))
    }
}

struct SimulatedTransaction {
    hash: String,
    block: u64,
    receipt: Receipt,
    confirmed: watch::Receiver<u64>,
}

#[async_trait::async_trait]
impl PendingTransaction for SimulatedTransaction {
    fn hash(&self) -> &str {
        &self.hash
    }

    async fn wait(mut self: Box<Self>) -> Result<Receipt, LedgerError> {
        let block = self.block;
        self.confirmed
            .wait_for(|confirmed| *confirmed >= block)
            .await
            .map_err(|_| LedgerError::new(LedgerErrorKind::Unavailable, "simulated chain shut down"))?;
        Ok(self.receipt)
    }
}
