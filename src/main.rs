//! Strictly Ledger - Unified CLI
//!
//! Plays tic-tac-toe on the local backend, a simulated chain, or a contract
//! behind a JSON-RPC gateway.

#![warn(missing_docs)]

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use strictly_ledger::ledger::{LedgerClient, RpcLedgerClient, SimulatedChain};
use strictly_ledger::{
    GameState, GameStateManager, GameStatus, GameStore, LedgerConfig, MoveOutcome, RemoteGameState, StoreView,
    SyncConfig, SyncMode, parse_square,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument, warn};

const HUMAN_ADDRESS: &str = "0x00000000000000000000000000000000000a11ce";
const OPPONENT_ADDRESS: &str = "0x0000000000000000000000000000000000000b0b";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    initialize_tracing()?;

    match cli.command {
        Command::Local { size } => run_local(size).await,
        Command::Sim { size, sync_mode } => run_sim(size, sync_mode).await,
        Command::Remote {
            config,
            game_id,
            create,
            join,
        } => run_remote(&config, game_id, create, join).await,
        Command::Lobby { config } => run_lobby(&config).await,
    }
}

/// Logs to a file so the board on stdout stays readable.
fn initialize_tracing() -> Result<()> {
    let log_file = std::fs::File::create("strictly_ledger.log")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(Arc::new(log_file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("could not install log subscriber: {e}"))?;
    Ok(())
}

/// Hot-seat play on the local backend
#[instrument]
async fn run_local(size: usize) -> Result<()> {
    info!("Starting local game");
    let store = Arc::new(GameStore::local(size));
    store.initialize().await?;
    play(store).await
}

/// Play against an automatic opponent on a simulated chain
#[instrument]
async fn run_sim(size: usize, sync_mode: SyncMode) -> Result<()> {
    info!("Starting simulated chain");
    let chain = SimulatedChain::new(size);
    let ledger = LedgerConfig::default()
        .with_sync_mode(sync_mode)
        .with_poll_interval_ms(200);

    let human = Arc::new(GameStore::remote(RemoteGameState::new(
        Some(chain.client(HUMAN_ADDRESS)),
        size,
        &ledger,
    )));
    let opponent = Arc::new(GameStore::remote(RemoteGameState::new(
        Some(chain.client(OPPONENT_ADDRESS)),
        size,
        &ledger,
    )));

    let game_id = human.create_game().await?;
    println!("Created game {game_id}, waiting for the opponent to join");
    opponent.join_game(game_id).await?;

    let auto = tokio::spawn(auto_play(Arc::clone(&opponent)));
    let result = play(human).await;
    auto.abort();
    result
}

/// Play on a contract behind a JSON-RPC gateway
#[instrument(skip_all, fields(config_path = %config_path.display()))]
async fn run_remote(config_path: &Path, game_id: Option<u64>, create: bool, join: Option<u64>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = Arc::new(GameStore::remote(connect(&config)));

    if create {
        let id = store.create_game().await?;
        println!("Created game {id}, waiting for an opponent");
    } else if let Some(id) = join {
        store.join_game(id).await?;
        println!("Joined game {id}");
    } else if let Some(id) = game_id {
        store.load_game(id).await?;
        println!("Loaded game {id}");
    } else {
        anyhow::bail!("pass --game-id, --create or --join");
    }

    play(store).await
}

/// List open games and the caller's active games
#[instrument(skip_all, fields(config_path = %config_path.display()))]
async fn run_lobby(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let remote = connect(&config);
    remote.initialize().await?;

    if let Some(user) = remote.user_address() {
        println!("Account {user}");
    }

    let open = remote.open_games().await?;
    println!("Open games ({}):", open.len());
    for game in &open {
        println!("  #{} created by {}", game.id, game.player1);
    }

    let active = remote.active_games().await?;
    println!("Your active games ({}):", active.len());
    for game in &active {
        let opponent = if game.is_open() {
            "waiting for opponent".to_string()
        } else {
            format!("{} vs {}", game.player1, game.player2)
        };
        println!("  #{} {} after {} moves", game.id, opponent, game.moves);
    }

    Ok(())
}

#[instrument(skip(config_path))]
fn load_config(config_path: &Path) -> Result<SyncConfig> {
    let config = if config_path.exists() {
        SyncConfig::from_file(config_path)?
    } else {
        info!("Config file not found at {}, using defaults", config_path.display());
        SyncConfig::default()
    };
    Ok(config.apply_env())
}

fn connect(config: &SyncConfig) -> RemoteGameState {
    let ledger = config.ledger();
    info!(rpc_url = %ledger.rpc_url(), contract = %ledger.contract(), "Connecting to ledger gateway");
    let client: Arc<dyn LedgerClient> = Arc::new(RpcLedgerClient::new(
        ledger.rpc_url().clone(),
        ledger.contract().clone(),
        ledger.poll_interval(),
    ));
    RemoteGameState::new(Some(client), config.board_size(), ledger)
}

/// Reads moves from stdin and redraws whenever the published state changes.
async fn play(store: Arc<GameStore>) -> Result<()> {
    let mut view = store.watch();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let mut shown = view.borrow_and_update().game_state().clone();
    render(&store.view());

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                if *current.game_state() != shown {
                    shown = current.game_state().clone();
                    render(&current);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "q" => break,
                    "r" => {
                        if let Err(e) = store.reset_game().await {
                            println!("Reset failed: {e}");
                        }
                    }
                    input => submit(&store, input).await,
                }
            }
        }
    }

    info!("Leaving game");
    Ok(())
}

async fn submit(store: &GameStore, input: &str) {
    let size = store.view().game_state().board().size();
    let Some(position) = parse_square(input, size) else {
        println!("Enter a square 1-{}, r to reset, q to quit", size * size);
        return;
    };
    match store.make_move(position).await {
        MoveOutcome::Accepted => debug!(position, "Move accepted"),
        MoveOutcome::Skipped(reason) => println!("Skipped: {reason}"),
        MoveOutcome::Rejected(err) => {
            warn!(error = %err, "Move rejected");
            println!("Rejected: {err}");
        }
    }
}

fn render(view: &StoreView) {
    let state = view.game_state();
    println!("\n{}", state.board().display());
    println!("{}", status_line(state, view));
}

fn status_line(state: &GameState, view: &StoreView) -> String {
    match state.status() {
        GameStatus::Won(player) => format!("{player} wins (r to reset, q to quit)"),
        GameStatus::Draw => "Draw (r to reset, q to quit)".to_string(),
        GameStatus::InProgress if *view.is_waiting_for_opponent() => "Waiting for an opponent".to_string(),
        GameStatus::InProgress => match view.player_symbol() {
            Some(me) if *me == state.current_player() => format!("Your move ({me})"),
            Some(_) => format!("Waiting for {}", state.current_player()),
            None => format!("{} to move", state.current_player()),
        },
    }
}

/// Plays the first vacant square whenever it is the opponent's turn.
async fn auto_play(store: Arc<GameStore>) {
    let mut view = store.watch();
    loop {
        let snapshot = view.borrow_and_update().clone();
        let state = snapshot.game_state();
        let my_turn = !state.is_terminal()
            && snapshot.pending_move().is_none()
            && *snapshot.player_symbol() == Some(state.current_player());
        if my_turn {
            if let Some(position) = (0..state.board().len()).find(|p| state.board().is_vacant(*p)) {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let outcome = store.make_move(position).await;
                debug!(position, ?outcome, "Opponent moved");
            }
        }
        if view.changed().await.is_err() {
            break;
        }
    }
}
