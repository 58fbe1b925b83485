//! Tests for the reconciling store over both backends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use strictly_ledger::ledger::{SimulatedChain, method};
use strictly_ledger::{
    GameState, GameStatus, GameStore, LedgerConfig, MoveOutcome, Player, RejectReason, RemoteGameState, SkipReason,
    Square, StoreView, SyncError, SyncMode,
};

const ALICE: &str = "0xA11CE00000000000000000000000000000000001";
const BOB: &str = "0xB0B0000000000000000000000000000000000002";

fn remote_store(chain: &SimulatedChain, address: &str, mode: SyncMode) -> Arc<GameStore> {
    let config = LedgerConfig::default()
        .with_sync_mode(mode)
        .with_poll_interval_ms(10);
    Arc::new(GameStore::remote(RemoteGameState::new(
        Some(chain.client(address)),
        3,
        &config,
    )))
}

async fn paired(chain: &SimulatedChain, mode: SyncMode) -> (Arc<GameStore>, Arc<GameStore>) {
    let alice = remote_store(chain, ALICE, mode);
    let bob = remote_store(chain, BOB, mode);
    let id = alice.create_game().await.unwrap();
    bob.join_game(id).await.unwrap();
    (alice, bob)
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

#[tokio::test]
async fn test_local_store_plays_to_a_win() {
    let store = GameStore::local(3);
    store.initialize().await.unwrap();

    for pos in [0, 3, 1, 4, 2] {
        assert!(store.make_move(pos).await.is_accepted());
    }

    let view = store.view();
    assert_eq!(view.game_state().status(), GameStatus::Won(Player::X));
    assert_eq!(view.game_state().winning_line(), &[0, 1, 2]);
    assert_eq!(*view.pending_move(), None);
    assert!(!view.loading().moving);
}

#[tokio::test]
async fn test_unavailable_moves_are_skipped() {
    let store = GameStore::local(3);
    store.initialize().await.unwrap();
    store.make_move(4).await;

    assert!(matches!(
        store.make_move(4).await,
        MoveOutcome::Skipped(SkipReason::SquareUnavailable)
    ));
    assert!(matches!(
        store.make_move(9).await,
        MoveOutcome::Skipped(SkipReason::SquareUnavailable)
    ));

    for pos in [0, 3, 1, 5, 2] {
        store.make_move(pos).await;
    }
    assert!(store.view().game_state().is_terminal());
    assert!(matches!(store.make_move(8).await, MoveOutcome::Skipped(SkipReason::GameOver)));
}

#[tokio::test]
async fn test_ledger_operations_unsupported_locally() {
    let store = GameStore::local(3);
    store.initialize().await.unwrap();

    assert!(matches!(store.load_game(1).await, Err(SyncError::Unsupported(_))));
    assert!(matches!(store.create_game().await, Err(SyncError::Unsupported(_))));
    assert!(store.view().last_error().is_some());
}

#[tokio::test]
async fn test_reset_clears_local_board() {
    let store = GameStore::local(3);
    store.initialize().await.unwrap();
    store.make_move(0).await;

    store.reset_game().await.unwrap();
    let view = store.view();
    assert_eq!(*view.game_state(), GameState::new(3));
    assert_eq!(*view.pending_move(), None);
    assert_eq!(*view.last_error(), None);
}

#[tokio::test]
async fn test_second_move_skipped_while_pending() {
    let chain = SimulatedChain::new(3);
    let (alice, _bob) = paired(&chain, SyncMode::Events).await;

    chain.hold_confirmations();
    let first = {
        let alice = Arc::clone(&alice);
        tokio::spawn(async move { alice.make_move(4).await })
    };
    while alice.view().pending_move().is_none() {
        tokio::task::yield_now().await;
    }
    assert!(alice.view().loading().moving);

    let block = chain.block_number();
    assert!(matches!(alice.make_move(0).await, MoveOutcome::Skipped(SkipReason::MovePending)));
    assert_eq!(chain.block_number(), block);

    chain.release_confirmations();
    assert!(first.await.unwrap().is_accepted());

    let view = alice.view();
    assert_eq!(*view.pending_move(), None);
    assert_eq!(view.game_state().board().get(4), Some(Square::Occupied(Player::X)));
    assert!(view.game_state().board().is_vacant(0));
}

#[tokio::test]
async fn test_published_state_resolves_pending_before_confirmation() {
    let chain = SimulatedChain::new(3);
    let (alice, _bob) = paired(&chain, SyncMode::Polling).await;

    chain.hold_confirmations();
    let submitting = {
        let alice = Arc::clone(&alice);
        tokio::spawn(async move { alice.make_move(4).await })
    };

    // The poller reads the mined board while the receipt is still held
    assert!(eventually(|| alice.view().game_state().board().get(4) == Some(Square::Occupied(Player::X))).await);
    assert_eq!(*alice.view().pending_move(), None);
    assert!(!submitting.is_finished());

    chain.release_confirmations();
    assert!(submitting.await.unwrap().is_accepted());
}

#[tokio::test]
async fn test_identity_flags_follow_the_game() {
    let chain = SimulatedChain::new(3);
    let alice = remote_store(&chain, ALICE, SyncMode::Events);
    let bob = remote_store(&chain, BOB, SyncMode::Events);

    let id = alice.create_game().await.unwrap();
    let view = alice.view();
    assert_eq!(*view.current_game_id(), Some(id));
    assert_eq!(*view.player_symbol(), Some(Player::X));
    assert!(*view.is_player1());
    assert!(*view.is_waiting_for_opponent());
    assert!(view.user_address().is_some());

    bob.join_game(id).await.unwrap();
    assert!(!*alice.view().is_waiting_for_opponent());

    let view = bob.view();
    assert_eq!(*view.player_symbol(), Some(Player::O));
    assert!(*view.is_player2());
    assert!(!*view.is_player1());
}

#[tokio::test]
async fn test_reset_unbinds_remote_game() {
    let chain = SimulatedChain::new(3);
    let (alice, _bob) = paired(&chain, SyncMode::Events).await;
    alice.make_move(4).await;

    alice.reset_game().await.unwrap();
    let view = alice.view();
    assert_eq!(*view.current_game_id(), None);
    assert_eq!(*view.player_symbol(), None);
    assert!(!*view.is_player1());
    assert_eq!(*view.game_state(), GameState::new(3));
}

#[tokio::test]
async fn test_ledger_rejection_is_reported() {
    let chain = SimulatedChain::new(3);
    let (_alice, bob) = paired(&chain, SyncMode::Events).await;

    let outcome = bob.make_move(0).await;
    assert!(matches!(
        outcome,
        MoveOutcome::Rejected(SyncError::SubmissionRejected(RejectReason::NotYourTurn))
    ));
    let view = bob.view();
    assert_eq!(*view.pending_move(), None);
    assert!(view.last_error().as_deref().is_some_and(|e| e.contains("not your turn")));
}

#[tokio::test]
async fn test_watchers_see_opponent_moves() {
    let chain = SimulatedChain::new(3);
    let (alice, bob) = paired(&chain, SyncMode::Events).await;
    let mut watcher = bob.watch();
    watcher.borrow_and_update();

    alice.make_move(0).await;
    assert!(watcher.has_changed().unwrap());
    assert_eq!(
        watcher.borrow_and_update().game_state().board().get(0),
        Some(Square::Occupied(Player::X))
    );
}

#[tokio::test]
async fn test_opponent_move_keeps_own_pending_move() {
    let chain = SimulatedChain::new(3);
    let (alice, bob) = paired(&chain, SyncMode::Events).await;
    let id = alice.view().current_game_id().unwrap();

    // Alice plays from another device; the event waits in the queue
    chain.hold_confirmations();
    chain
        .client(ALICE)
        .send_transaction(method::MAKE_MOVE, vec![json!(id), json!(0), json!(0)], None)
        .await
        .unwrap();

    let submitting = {
        let bob = Arc::clone(&bob);
        tokio::spawn(async move { bob.make_move(4).await })
    };
    while bob.view().pending_move().is_none() {
        tokio::task::yield_now().await;
    }

    let first_view: Arc<Mutex<Option<StoreView>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&first_view);
    let watcher = bob.watch();
    let _sub = bob.backend().manager().subscribe(Arc::new(move |_: &GameState| {
        let mut first = sink.lock().unwrap();
        if first.is_none() {
            *first = Some(watcher.borrow().clone());
        }
    }));

    chain.release_confirmations();
    assert!(submitting.await.unwrap().is_accepted());

    let view = first_view.lock().unwrap().clone().expect("listener ran");
    assert_eq!(view.game_state().board().get(0), Some(Square::Occupied(Player::X)));
    assert_eq!(view.game_state().current_player(), Player::O);
    assert_eq!(*view.pending_move(), Some(4));

    let view = bob.view();
    assert_eq!(*view.pending_move(), None);
    assert_eq!(view.game_state().board().get(4), Some(Square::Occupied(Player::O)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_view_matches_backend_after_concurrent_moves() {
    let store = Arc::new(GameStore::local(8));
    store.initialize().await.unwrap();

    let tasks: Vec<_> = (0..64)
        .map(|pos| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.backend().manager().submit_move(pos).await })
        })
        .collect();
    for task in tasks {
        let _ = task.await.unwrap();
    }

    assert_eq!(*store.view().game_state(), store.backend().manager().read_state());
}
