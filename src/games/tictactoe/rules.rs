//! Game rules for N×N tic-tac-toe.
//!
//! Pure functions over [`Board`](super::Board). They never fail on a
//! well-formed board and never consult whose turn it is.

pub mod draw;
pub mod win;

pub use draw::is_full;
pub use win::{evaluate, line_for, winning_lines};

use super::Board;
use tracing::instrument;

/// Returns true iff `pos` is on the board and unoccupied.
///
/// Does not check terminality; callers check the game status separately.
#[instrument(skip(board), fields(size = board.size()))]
pub fn is_legal_move(board: &Board, pos: usize) -> bool {
    board.is_vacant(pos)
}

#[cfg(test)]
mod tests {
    use super::super::Player;
    use super::*;

    #[test]
    fn test_legal_on_empty_square() {
        let board = Board::empty(3);
        assert!((0..9).all(|p| is_legal_move(&board, p)));
    }

    #[test]
    fn test_illegal_when_occupied_or_out_of_range() {
        let mut board = Board::empty(3);
        board.place(4, Player::O);
        assert!(!is_legal_move(&board, 4));
        assert!(!is_legal_move(&board, 9));
    }
}
