//! Command-line interface for strictly_ledger.

use clap::{Parser, Subcommand};
use strictly_ledger::{DEFAULT_BOARD_SIZE, SyncMode};

/// Strictly Ledger - tic-tac-toe over an asynchronous ledger
#[derive(Parser, Debug)]
#[command(name = "strictly_ledger")]
#[command(about = "Tic-tac-toe with optimistic state over a ledger", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play hot-seat on the local backend
    Local {
        /// Board edge length
        #[arg(short, long, default_value_t = DEFAULT_BOARD_SIZE, value_parser = parse_board_size)]
        size: usize,
    },

    /// Play against an automatic opponent on an in-process simulated chain
    Sim {
        /// Board edge length
        #[arg(short, long, default_value_t = DEFAULT_BOARD_SIZE, value_parser = parse_board_size)]
        size: usize,

        /// How opponent moves are observed (events, polling, hybrid)
        #[arg(long, default_value = "events")]
        sync_mode: SyncMode,
    },

    /// Play on a contract reached through a JSON-RPC gateway
    Remote {
        /// Path to configuration file
        #[arg(short, long, default_value = "strictly_ledger.toml")]
        config: std::path::PathBuf,

        /// Bind an existing game
        #[arg(long, conflicts_with_all = ["create", "join"])]
        game_id: Option<u64>,

        /// Create a new game and wait for an opponent
        #[arg(long)]
        create: bool,

        /// Join an open game
        #[arg(long, conflicts_with = "create")]
        join: Option<u64>,
    },

    /// List open games and the caller's active games
    Lobby {
        /// Path to configuration file
        #[arg(short, long, default_value = "strictly_ledger.toml")]
        config: std::path::PathBuf,
    },
}

/// Parses a board edge length; an empty board is not playable.
fn parse_board_size(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("board size must be at least 1".to_string()),
        Ok(size) => Ok(size),
        Err(e) => Err(format!("invalid board size: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        assert!(Cli::try_parse_from(["strictly_ledger", "local", "--size", "0"]).is_err());
        assert!(Cli::try_parse_from(["strictly_ledger", "sim", "-s", "0"]).is_err());
    }

    #[test]
    fn test_size_accepted() {
        let cli = Cli::try_parse_from(["strictly_ledger", "local", "--size", "4"]).unwrap();
        assert!(matches!(cli.command, Command::Local { size: 4 }));

        let cli = Cli::try_parse_from(["strictly_ledger", "sim"]).unwrap();
        assert!(matches!(cli.command, Command::Sim { size, .. } if size == DEFAULT_BOARD_SIZE));
    }
}
