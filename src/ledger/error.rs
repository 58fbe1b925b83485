//! Ledger client error types.

use derive_more::{Display, Error};
use tracing::instrument;

/// Broad category of a ledger failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LedgerErrorKind {
    /// No client, no account, or the node refused the connection.
    #[display("unavailable")]
    Unavailable,
    /// The transaction was mined and reverted by the contract.
    #[display("reverted")]
    Reverted,
    /// The signer refused to sign or send.
    #[display("rejected")]
    Rejected,
    /// Transport-level failure talking to the node.
    #[display("transport")]
    Transport,
    /// The node answered with something we could not decode.
    #[display("decode")]
    Decode,
}

/// Ledger error with location tracking.
#[derive(Debug, Clone, Display, Error)]
#[display("Ledger {} error: {} at {}:{}", kind, message, file, line)]
pub struct LedgerError {
    /// Error category.
    pub kind: LedgerErrorKind,
    /// Error message (for reverts, the contract's reason string).
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl LedgerError {
    /// Creates a new ledger error with caller location tracking.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(kind: LedgerErrorKind, message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            kind,
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }

    /// Shorthand for a contract revert with the given reason.
    #[track_caller]
    pub fn reverted(reason: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::Reverted, reason)
    }

    /// Shorthand for a decode failure.
    #[track_caller]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::Decode, message)
    }
}

impl From<serde_json::Error> for LedgerError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::decode(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for LedgerError {
    #[track_caller]
    fn from(err: reqwest::Error) -> Self {
        Self::new(LedgerErrorKind::Transport, format!("HTTP error: {}", err))
    }
}
