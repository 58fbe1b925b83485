//! Maps raw ledger failures to user-facing move errors.

use tracing::{instrument, warn};

use crate::error::{RejectReason, SyncError};
use crate::ledger::{LedgerError, LedgerErrorKind};

/// Classifies a failed submission or confirmation.
///
/// Connectivity failures become [`SyncError::OracleUnavailable`]; anything
/// the ledger or signer refused becomes [`SyncError::SubmissionRejected`].
#[instrument(skip(err), fields(kind = %err.kind))]
pub(crate) fn classify_submission(err: LedgerError) -> SyncError {
    warn!(message = %err.message, "Transaction failed");
    match err.kind {
        LedgerErrorKind::Unavailable | LedgerErrorKind::Transport => SyncError::OracleUnavailable(err.message),
        LedgerErrorKind::Rejected => SyncError::SubmissionRejected(RejectReason::Failed(err.message)),
        LedgerErrorKind::Reverted | LedgerErrorKind::Decode => {
            SyncError::SubmissionRejected(reject_reason(&err.message))
        }
    }
}

/// Reads the contract's revert reason.
pub(crate) fn reject_reason(message: &str) -> RejectReason {
    let lowered = message.to_lowercase();
    if lowered.contains("not your turn") {
        RejectReason::NotYourTurn
    } else if lowered.contains("occupied") {
        RejectReason::CellOccupied
    } else if lowered.contains("finished") || lowered.contains("ended") {
        RejectReason::GameEnded
    } else {
        RejectReason::Failed(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_reasons() {
        assert_eq!(reject_reason("execution reverted: Not your turn"), RejectReason::NotYourTurn);
        assert_eq!(reject_reason("cell already occupied"), RejectReason::CellOccupied);
        assert_eq!(reject_reason("game already finished"), RejectReason::GameEnded);
        assert_eq!(reject_reason("Game has ended"), RejectReason::GameEnded);
    }

    #[test]
    fn test_unknown_reason_is_generic() {
        assert_eq!(
            reject_reason("position out of range"),
            RejectReason::Failed("position out of range".to_string())
        );
    }

    #[test]
    fn test_connectivity_is_unavailable() {
        let err = LedgerError::new(LedgerErrorKind::Transport, "connection refused");
        assert!(matches!(classify_submission(err), SyncError::OracleUnavailable(_)));
    }

    #[test]
    fn test_signer_refusal_is_generic_rejection() {
        let err = LedgerError::new(LedgerErrorKind::Rejected, "user denied");
        assert!(matches!(
            classify_submission(err),
            SyncError::SubmissionRejected(RejectReason::Failed(_))
        ));
    }
}
