//! Merging ledger observations into the last known state.
//!
//! Pure functions; the backend decides whether an observation still belongs
//! to the bound game before calling them.

use crate::games::tictactoe::{Board, Evaluation, GameState, GameStatus, Outcome, Player, Square, rules};

/// Why an incremental move was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub(crate) enum MoveSkip {
    /// The state is terminal.
    #[display("game already over")]
    Terminal,
    /// The square already holds this mark (duplicate delivery).
    #[display("already applied")]
    Duplicate,
    /// The square holds the other mark; a snapshot will correct it.
    #[display("square held by the other player")]
    Conflict,
    /// Row or column outside the board.
    #[display("position off the board")]
    OffBoard,
}

/// Places `mark` at `position` and evaluates.
pub(crate) fn apply_move(
    state: &GameState,
    position: usize,
    mark: Player,
    next: Option<Player>,
) -> Result<GameState, MoveSkip> {
    if state.is_terminal() {
        return Err(MoveSkip::Terminal);
    }
    match state.board().get(position) {
        None => Err(MoveSkip::OffBoard),
        Some(Square::Occupied(owner)) if owner == mark => Err(MoveSkip::Duplicate),
        Some(Square::Occupied(_)) => Err(MoveSkip::Conflict),
        Some(Square::Empty) => {
            let mut next_state = state.clone();
            next_state.apply_move_as(position, mark, next);
            Ok(next_state)
        }
    }
}

/// Marks the state terminal with the ledger's verdict.
///
/// The verdict wins over local evaluation. Returns `None` when the state
/// already carries it. A winner whose line is not on the local board yet is
/// recorded with an empty line; see [`needs_line`].
pub(crate) fn apply_finished(state: &GameState, verdict: Outcome) -> Option<GameState> {
    if state.outcome() == Some(verdict) {
        return None;
    }
    Some(settle(state, verdict))
}

/// True for a won state whose winning line has not been located yet.
pub(crate) fn needs_line(state: &GameState) -> bool {
    matches!(state.status(), GameStatus::Won(_)) && state.winning_line().is_empty()
}

/// Merges a full board snapshot.
///
/// Returns `None` when the snapshot adds nothing: it is identical, older
/// (fewer occupied squares), of another size, or would turn a terminal
/// state back into a running one. A known `verdict` always overrides the
/// snapshot's own evaluation.
pub(crate) fn merge_snapshot(current: &GameState, board: Board, verdict: Option<Outcome>) -> Option<GameState> {
    if board.size() != current.board().size() {
        return None;
    }
    if board.occupied_count() < current.board().occupied_count() {
        return None;
    }

    let mut fetched = GameState::from_board(board);
    if let Some(v) = verdict.filter(|v| fetched.outcome() != Some(*v)) {
        fetched = settle(&fetched, v);
    }

    if current.is_terminal() && !fetched.is_terminal() {
        return None;
    }
    (fetched != *current).then_some(fetched)
}

fn settle(state: &GameState, verdict: Outcome) -> GameState {
    let evaluation = match verdict {
        Outcome::Draw => Evaluation::draw(),
        Outcome::Winner(player) => {
            Evaluation::won(player, rules::line_for(state.board(), player).unwrap_or_default())
        }
    };
    let mut finished = state.clone();
    finished.finish(evaluation);
    finished
}
