//! TOML configuration for the synchronisation engine.

use std::path::Path;
use std::time::Duration;

use derive_getters::Getters;
use derive_more::{Display, Error};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::games::tictactoe::DEFAULT_BOARD_SIZE;
use crate::ledger::DEFAULT_STAKE_WEI;

/// Environment variable overriding [`LedgerConfig::rpc_url`].
pub const RPC_URL_ENV: &str = "STRICTLY_LEDGER_RPC_URL";
/// Environment variable overriding [`LedgerConfig::contract`].
pub const CONTRACT_ENV: &str = "STRICTLY_LEDGER_CONTRACT";

/// How the remote backend learns about changes it did not cause.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncMode {
    /// Contract event subscriptions, falling back to polling if they fail.
    #[default]
    Events,
    /// Full board refetch on a fixed interval.
    Polling,
    /// Both at once.
    Hybrid,
}

impl SyncMode {
    /// Whether event subscriptions are attempted.
    pub fn uses_events(self) -> bool {
        matches!(self, SyncMode::Events | SyncMode::Hybrid)
    }

    /// Whether polling always runs.
    pub fn uses_polling(self) -> bool {
        matches!(self, SyncMode::Polling | SyncMode::Hybrid)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Getters, Setters, Serialize, Deserialize)]
#[setters(prefix = "with_")]
pub struct SyncConfig {
    /// Board edge length.
    #[serde(default = "default_board_size")]
    #[getter(skip)]
    board_size: usize,

    /// Ledger connection settings.
    #[serde(default)]
    ledger: LedgerConfig,
}

/// `[ledger]` table.
#[derive(Debug, Clone, PartialEq, Getters, Setters, Serialize, Deserialize)]
#[setters(prefix = "with_")]
pub struct LedgerConfig {
    /// JSON-RPC gateway URL.
    #[serde(default = "default_rpc_url")]
    #[setters(into)]
    rpc_url: String,

    /// Game contract address.
    #[serde(default)]
    #[setters(into)]
    contract: String,

    /// Reconciliation mechanism.
    #[serde(default)]
    #[getter(skip)]
    sync_mode: SyncMode,

    /// Polling period in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    #[getter(skip)]
    poll_interval_ms: u64,

    /// Upper bound on a confirmation wait, in seconds.
    #[serde(default = "default_confirmation_timeout_secs")]
    #[getter(skip)]
    confirmation_timeout_secs: u64,

    /// Value sent with `createGame` and `joinGame`, in wei.
    #[serde(default = "default_stake_wei")]
    #[getter(skip)]
    stake_wei: u64,
}

fn default_board_size() -> usize {
    DEFAULT_BOARD_SIZE
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_stake_wei() -> u64 {
    DEFAULT_STAKE_WEI
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            board_size: default_board_size(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            contract: String::new(),
            sync_mode: SyncMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            stake_wei: default_stake_wei(),
        }
    }
}

impl SyncConfig {
    /// Loads configuration from a TOML file. Missing keys take defaults.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;

        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))?;
        config.validate()?;

        info!(
            board_size = config.board_size,
            sync_mode = %config.ledger.sync_mode,
            "Config loaded successfully"
        );
        Ok(config)
    }

    /// Applies `STRICTLY_LEDGER_*` environment overrides.
    #[instrument(skip(self))]
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            debug!(%url, "RPC URL overridden from environment");
            self.ledger.rpc_url = url;
        }
        if let Ok(contract) = std::env::var(CONTRACT_ENV) {
            debug!(%contract, "Contract overridden from environment");
            self.ledger.contract = contract;
        }
        self
    }

    /// Board edge length.
    pub fn board_size(&self) -> usize {
        self.board_size
    }

    /// Rejects values no game can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.board_size < 1 {
            return Err(ConfigError::new("board_size must be at least 1".to_string()));
        }
        if self.ledger.poll_interval_ms == 0 {
            return Err(ConfigError::new("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

impl LedgerConfig {
    /// Reconciliation mechanism.
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// Polling period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on a confirmation wait.
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// Stake in wei.
    pub fn stake_wei(&self) -> u64 {
        self.stake_wei
    }
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}
