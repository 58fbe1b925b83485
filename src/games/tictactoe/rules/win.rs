//! Win detection for N×N tic-tac-toe.

use super::super::{Board, Evaluation, Player, Square};
use super::draw::is_full;
use tracing::instrument;

/// Generates every candidate line for a `size`×`size` board.
///
/// Always `2 * size + 2` lines, in a fixed order: rows top to bottom,
/// columns left to right, then the main diagonal and the anti-diagonal.
#[instrument]
pub fn winning_lines(size: usize) -> Vec<Vec<usize>> {
    let mut lines = Vec::with_capacity(2 * size + 2);

    // Rows
    for row in 0..size {
        lines.push((0..size).map(|col| row * size + col).collect());
    }

    // Columns
    for col in 0..size {
        lines.push((0..size).map(|row| row * size + col).collect());
    }

    // Diagonals
    lines.push((0..size).map(|i| i * size + i).collect());
    lines.push((0..size).map(|i| i * size + (size - 1 - i)).collect());

    lines
}

/// Returns the player occupying every square of `line`, if any.
fn line_owner(board: &Board, line: &[usize]) -> Option<Player> {
    let first = board.get(*line.first()?)?.player()?;
    line.iter()
        .all(|&i| board.get(i) == Some(Square::Occupied(first)))
        .then_some(first)
}

/// Evaluates the board.
///
/// The first fully-matching line in [`winning_lines`] order wins, so a move
/// completing two lines at once reports the earlier one. With no completed
/// line a full board is a draw; otherwise the game continues (`None`).
#[instrument(skip(board), fields(size = board.size()))]
pub fn evaluate(board: &Board) -> Option<Evaluation> {
    for line in winning_lines(board.size()) {
        if let Some(player) = line_owner(board, &line) {
            return Some(Evaluation::won(player, line));
        }
    }

    is_full(board).then(Evaluation::draw)
}

/// Returns the first completed line belonging to `player`.
#[instrument(skip(board), fields(size = board.size()))]
pub fn line_for(board: &Board, player: Player) -> Option<Vec<usize>> {
    winning_lines(board.size())
        .into_iter()
        .find(|line| line_owner(board, line) == Some(player))
}
