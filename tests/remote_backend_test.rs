//! Tests for the ledger-backed game against the simulated chain.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use strictly_ledger::ledger::{Address, EventKind, GameId, SimulatedChain, method};
use strictly_ledger::{
    GameState, GameStateManager, GameStatus, LedgerConfig, Player, RejectReason, RemoteGameState, SessionInfo,
    Square, SyncError, SyncMode,
};

const ALICE: &str = "0xA11CE00000000000000000000000000000000001";
const BOB: &str = "0xB0B0000000000000000000000000000000000002";

fn config(mode: SyncMode) -> LedgerConfig {
    LedgerConfig::default()
        .with_sync_mode(mode)
        .with_poll_interval_ms(10)
}

fn backend(chain: &SimulatedChain, address: &str, mode: SyncMode) -> RemoteGameState {
    RemoteGameState::new(Some(chain.client(address)), 3, &config(mode))
}

async fn paired(chain: &SimulatedChain, mode: SyncMode) -> (Arc<RemoteGameState>, Arc<RemoteGameState>, GameId) {
    let alice = Arc::new(backend(chain, ALICE, mode));
    let bob = Arc::new(backend(chain, BOB, mode));
    alice.initialize().await.unwrap();
    bob.initialize().await.unwrap();
    let id = alice.create_game().await.unwrap();
    bob.join_game(id).await.unwrap();
    (alice, bob, id)
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn counter(game: &RemoteGameState) -> Arc<Mutex<usize>> {
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    let _ = game.subscribe(Arc::new(move |_: &GameState| {
        *sink.lock().unwrap() += 1;
    }));
    count
}

#[tokio::test]
async fn test_create_and_join_assign_symbols() {
    let chain = SimulatedChain::new(3);
    let (alice, bob, id) = paired(&chain, SyncMode::Events).await;

    assert_eq!(alice.current_game_id(), Some(id));
    assert_eq!(bob.current_game_id(), Some(id));
    assert_eq!(alice.user_symbol(), Some(Player::X));
    assert_eq!(bob.user_symbol(), Some(Player::O));

    // Alice learned about Bob through the join event
    let info = alice.session_info().unwrap();
    assert!(info.player2.same_as(&Address::from(BOB)));
    assert!(!info.is_waiting_for_opponent());
}

#[tokio::test]
async fn test_own_move_arrives_through_events() {
    let chain = SimulatedChain::new(3);
    let (alice, bob, _) = paired(&chain, SyncMode::Events).await;

    let result = alice.submit_move(4).await.unwrap();
    assert!(result.is_none());

    for game in [&alice, &bob] {
        let state = game.read_state();
        assert_eq!(state.board().get(4), Some(Square::Occupied(Player::X)));
        assert_eq!(state.current_player(), Player::O);
    }
}

#[tokio::test]
async fn test_full_game_reaches_both_players() {
    let chain = SimulatedChain::new(3);
    let (alice, bob, _) = paired(&chain, SyncMode::Events).await;

    for (player, pos) in [(&alice, 0), (&bob, 3), (&alice, 1), (&bob, 4), (&alice, 2)] {
        player.submit_move(pos).await.unwrap();
    }

    for game in [&alice, &bob] {
        let state = game.read_state();
        assert_eq!(state.status(), GameStatus::Won(Player::X));
        assert_eq!(state.winning_line(), &[0, 1, 2]);
        assert!(game.session_info().unwrap().is_finished);
    }
    assert!(matches!(bob.submit_move(8).await, Err(SyncError::GameAlreadyEnded)));
}

#[tokio::test]
async fn test_out_of_turn_move_is_rejected_by_ledger() {
    let chain = SimulatedChain::new(3);
    let (_alice, bob, _) = paired(&chain, SyncMode::Events).await;

    let err = bob.submit_move(0).await.unwrap_err();
    assert!(matches!(err, SyncError::SubmissionRejected(RejectReason::NotYourTurn)));
    assert_eq!(bob.read_state(), GameState::new(3));
}

#[tokio::test]
async fn test_occupied_square_rejected_before_submission() {
    let chain = SimulatedChain::new(3);
    let (alice, bob, _) = paired(&chain, SyncMode::Events).await;
    alice.submit_move(4).await.unwrap();
    let block = chain.block_number();

    assert!(matches!(
        bob.submit_move(4).await,
        Err(SyncError::InvalidMove { position: 4 })
    ));
    assert_eq!(chain.block_number(), block);
}

#[tokio::test]
async fn test_missing_client_is_unavailable() {
    let game = RemoteGameState::new(None, 3, &LedgerConfig::default());
    assert!(matches!(game.initialize().await, Err(SyncError::OracleUnavailable(_))));
    assert!(matches!(game.submit_move(0).await, Err(SyncError::OracleUnavailable(_))));
    assert!(matches!(game.create_game().await, Err(SyncError::OracleUnavailable(_))));
}

#[tokio::test]
async fn test_move_without_bound_game_is_not_initialized() {
    let chain = SimulatedChain::new(3);
    let alice = backend(&chain, ALICE, SyncMode::Events);
    assert!(matches!(alice.submit_move(0).await, Err(SyncError::NotInitialized)));
    alice.initialize().await.unwrap();
    assert!(matches!(alice.submit_move(0).await, Err(SyncError::NotInitialized)));
}

#[tokio::test]
async fn test_observer_sees_move_made_elsewhere() {
    let chain = SimulatedChain::new(3);
    let (_alice, bob, id) = paired(&chain, SyncMode::Events).await;

    // Alice plays from another device
    chain
        .client(ALICE)
        .send_transaction(method::MAKE_MOVE, vec![json!(id), json!(0), json!(0)], None)
        .await
        .unwrap();

    let state = bob.read_state();
    assert_eq!(state.board().get(0), Some(Square::Occupied(Player::X)));
    assert_eq!(state.current_player(), Player::O);
}

#[tokio::test]
async fn test_confirmation_after_reset_is_discarded() {
    let chain = SimulatedChain::new(3);
    let (alice, _bob, _) = paired(&chain, SyncMode::Events).await;
    let block = chain.block_number();

    chain.hold_confirmations();
    let submitting = {
        let alice = Arc::clone(&alice);
        tokio::spawn(async move { alice.submit_move(4).await })
    };
    while chain.block_number() == block {
        tokio::task::yield_now().await;
    }

    alice.reset().await.unwrap();
    chain.release_confirmations();

    let result = submitting.await.unwrap();
    assert!(matches!(result, Err(SyncError::SessionChanged)));
    assert_eq!(alice.read_state(), GameState::new(3));
    assert_eq!(alice.current_game_id(), None);
}

#[tokio::test]
async fn test_create_confirmed_after_reset_does_not_bind() {
    let chain = SimulatedChain::new(3);
    let alice = Arc::new(backend(&chain, ALICE, SyncMode::Events));
    alice.initialize().await.unwrap();
    let block = chain.block_number();

    chain.hold_confirmations();
    let creating = {
        let alice = Arc::clone(&alice);
        tokio::spawn(async move { alice.create_game().await })
    };
    while chain.block_number() == block {
        tokio::task::yield_now().await;
    }

    alice.reset().await.unwrap();
    chain.release_confirmations();

    assert!(matches!(creating.await.unwrap(), Err(SyncError::SessionChanged)));
    assert_eq!(alice.current_game_id(), None);
    assert!(alice.session_info().is_none());
    assert_eq!(alice.read_state(), GameState::new(3));
    assert_eq!(chain.subscription_count(), 0);
}

#[tokio::test]
async fn test_join_confirmed_after_reset_does_not_bind() {
    let chain = SimulatedChain::new(3);
    let alice = backend(&chain, ALICE, SyncMode::Events);
    let bob = Arc::new(backend(&chain, BOB, SyncMode::Events));
    alice.initialize().await.unwrap();
    bob.initialize().await.unwrap();
    let id = alice.create_game().await.unwrap();
    let subscriptions = chain.subscription_count();
    let block = chain.block_number();

    chain.hold_confirmations();
    let joining = {
        let bob = Arc::clone(&bob);
        tokio::spawn(async move { bob.join_game(id).await })
    };
    while chain.block_number() == block {
        tokio::task::yield_now().await;
    }

    bob.reset().await.unwrap();
    chain.release_confirmations();

    assert!(matches!(joining.await.unwrap(), Err(SyncError::SessionChanged)));
    assert_eq!(bob.current_game_id(), None);
    assert_eq!(bob.user_symbol(), None);
    assert_eq!(chain.subscription_count(), subscriptions);
}

#[tokio::test]
async fn test_latest_of_overlapping_creates_binds() {
    let chain = SimulatedChain::new(3);
    let alice = Arc::new(backend(&chain, ALICE, SyncMode::Events));
    alice.initialize().await.unwrap();

    chain.hold_confirmations();
    let mut tasks = Vec::new();
    for _ in 0..2 {
        let block = chain.block_number();
        let alice = Arc::clone(&alice);
        tasks.push(tokio::spawn(async move { alice.create_game().await }));
        while chain.block_number() == block {
            tokio::task::yield_now().await;
        }
    }
    chain.release_confirmations();

    let second = tasks.pop().unwrap().await.unwrap().unwrap();
    let first = tasks.pop().unwrap().await.unwrap();
    assert!(matches!(first, Err(SyncError::SessionChanged)));
    assert_eq!(alice.current_game_id(), Some(second));
    assert_eq!(chain.subscription_count(), 3);
}

#[tokio::test]
async fn test_finish_result_ends_game_before_board_catches_up() {
    let chain = SimulatedChain::new(3);
    let (alice, bob, _) = paired(&chain, SyncMode::Events).await;
    for (player, pos) in [(&alice, 0), (&bob, 3), (&alice, 1), (&bob, 4)] {
        player.submit_move(pos).await.unwrap();
    }

    // Only the result reaches the observers, and the board cannot be read
    chain.mute_events(EventKind::MoveMade, true);
    chain.fail_reads(true);
    alice.submit_move(2).await.unwrap();

    let state = bob.read_state();
    assert_eq!(state.status(), GameStatus::Won(Player::X));
    assert!(state.is_terminal());
    assert!(state.board().is_vacant(2));
    assert!(bob.session_info().unwrap().is_finished);
    assert!(matches!(bob.submit_move(8).await, Err(SyncError::GameAlreadyEnded)));

    chain.fail_reads(false);
    assert!(eventually(|| bob.read_state().winning_line() == &[0, 1, 2]).await);
    let state = bob.read_state();
    assert_eq!(state.status(), GameStatus::Won(Player::X));
    assert_eq!(state.board().get(2), Some(Square::Occupied(Player::X)));
}

#[tokio::test]
async fn test_confirmation_timeout_reports_pending() {
    let chain = SimulatedChain::new(3);
    let patient = config(SyncMode::Events).with_confirmation_timeout_secs(0);
    let alice = RemoteGameState::new(Some(chain.client(ALICE)), 3, &patient);
    let bob = backend(&chain, BOB, SyncMode::Events);
    alice.initialize().await.unwrap();
    bob.initialize().await.unwrap();
    let id = alice.create_game().await.unwrap();
    bob.join_game(id).await.unwrap();

    chain.hold_confirmations();
    let err = alice.submit_move(0).await.unwrap_err();
    assert!(matches!(err, SyncError::ConfirmationPending { .. }));

    // The transaction still lands
    chain.release_confirmations();
    assert_eq!(alice.read_state().board().get(0), Some(Square::Occupied(Player::X)));
}

#[tokio::test]
async fn test_rebinding_same_game_is_noop() {
    let chain = SimulatedChain::new(3);
    let (alice, _bob, id) = paired(&chain, SyncMode::Events).await;
    let subscriptions = chain.subscription_count();

    alice.load_existing_game(id).await.unwrap();
    alice.join_game(id).await.unwrap();
    assert_eq!(chain.subscription_count(), subscriptions);

    let count = counter(&alice);
    alice.submit_move(4).await.unwrap();
    assert_eq!(*count.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_reset_releases_subscriptions() {
    let chain = SimulatedChain::new(3);
    let (alice, _bob, _) = paired(&chain, SyncMode::Events).await;
    assert_eq!(chain.subscription_count(), 6);

    alice.reset().await.unwrap();
    assert_eq!(chain.subscription_count(), 3);
    assert!(alice.session_info().is_none());
}

#[tokio::test]
async fn test_previous_game_events_are_ignored() {
    let chain = SimulatedChain::new(3);
    let (alice, _bob, first) = paired(&chain, SyncMode::Events).await;

    let second = alice.create_game().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(alice.current_game_id(), Some(second));

    chain
        .client(ALICE)
        .send_transaction(method::MAKE_MOVE, vec![json!(first), json!(1), json!(1)], None)
        .await
        .unwrap();
    assert_eq!(alice.read_state(), GameState::new(3));
}

#[tokio::test]
async fn test_receipt_without_logs_uses_history() {
    let chain = SimulatedChain::new(3);
    chain.strip_receipt_logs(true);
    let alice = backend(&chain, ALICE, SyncMode::Events);
    alice.initialize().await.unwrap();

    let id = alice.create_game().await.unwrap();
    assert_eq!(alice.current_game_id(), Some(id));
}

#[tokio::test]
async fn test_missing_creation_event_is_reported() {
    let chain = SimulatedChain::new(3);
    chain.strip_receipt_logs(true);
    chain.hide_event_history(true);
    let alice = backend(&chain, ALICE, SyncMode::Events);
    alice.initialize().await.unwrap();

    let err = alice.create_game().await.unwrap_err();
    assert!(matches!(err, SyncError::EventNotFound { ref event } if event == "GameCreated"));
    assert_eq!(alice.current_game_id(), None);
}

#[tokio::test]
async fn test_refused_subscriptions_fall_back_to_polling() {
    let chain = SimulatedChain::new(3);
    chain.refuse_subscriptions(true);
    let (alice, bob, _) = paired(&chain, SyncMode::Events).await;
    assert_eq!(chain.subscription_count(), 0);

    alice.submit_move(4).await.unwrap();
    assert!(eventually(|| !bob.read_state().board().is_vacant(4)).await);
    assert!(eventually(|| !alice.read_state().board().is_vacant(4)).await);
    assert_eq!(bob.read_state().current_player(), Player::O);
}

#[tokio::test]
async fn test_polling_mode_finishes_game() {
    let chain = SimulatedChain::new(3);
    let (alice, bob, _) = paired(&chain, SyncMode::Polling).await;
    assert_eq!(chain.subscription_count(), 0);

    for (player, pos) in [(&alice, 0), (&bob, 3), (&alice, 1), (&bob, 4), (&alice, 2)] {
        player.submit_move(pos).await.unwrap();
        assert!(eventually(|| !bob.read_state().board().is_vacant(pos)).await);
    }
    assert!(eventually(|| alice.read_state().status() == GameStatus::Won(Player::X)).await);
    assert_eq!(bob.read_state().winning_line(), &[0, 1, 2]);
}

#[tokio::test]
async fn test_hybrid_mode_applies_each_move_once() {
    let chain = SimulatedChain::new(3);
    let (alice, bob, _) = paired(&chain, SyncMode::Hybrid).await;
    let count = counter(&bob);

    alice.submit_move(0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*count.lock().unwrap(), 1);
    assert_eq!(bob.read_state().board().occupied_count(), 1);
}

#[tokio::test]
async fn test_lobby_listings() {
    let chain = SimulatedChain::new(3);
    let alice = backend(&chain, ALICE, SyncMode::Events);
    let bob = backend(&chain, BOB, SyncMode::Events);
    alice.initialize().await.unwrap();
    bob.initialize().await.unwrap();

    let id = alice.create_game().await.unwrap();
    let open = bob.open_games().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, id);
    assert!(bob.active_games().await.unwrap().is_empty());

    bob.join_game(id).await.unwrap();
    assert!(bob.open_games().await.unwrap().is_empty());
    assert_eq!(alice.active_games().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_session_listeners_follow_binding() {
    let chain = SimulatedChain::new(3);
    let alice = backend(&chain, ALICE, SyncMode::Events);
    let bob = backend(&chain, BOB, SyncMode::Events);
    alice.initialize().await.unwrap();
    bob.initialize().await.unwrap();

    let seen: Arc<Mutex<Vec<Option<SessionInfo>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _ = alice.on_session_change(Arc::new(move |info: &Option<SessionInfo>| {
        sink.lock().unwrap().push(info.clone());
    }));

    let id = alice.create_game().await.unwrap();
    bob.join_game(id).await.unwrap();
    alice.reset().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].as_ref().is_some_and(SessionInfo::is_waiting_for_opponent));
    assert!(seen[1].as_ref().is_some_and(|info| !info.is_waiting_for_opponent()));
    assert!(seen[2].is_none());
}
