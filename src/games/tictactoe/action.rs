//! Moves as first-class values.
//!
//! A move is only the intent to occupy a square; legality depends on the
//! state it is applied to.

use super::{GameState, rules};
use serde::{Deserialize, Serialize};

/// A request to occupy `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_new::new)]
pub struct Move {
    /// Linear position in `[0, N²)`.
    pub position: usize,
}

impl Move {
    /// Checks the move against a state.
    ///
    /// Terminality is reported before occupancy.
    pub fn check(&self, state: &GameState) -> Result<(), MoveError> {
        if state.is_terminal() {
            return Err(MoveError::GameOver);
        }
        if !rules::is_legal_move(state.board(), self.position) {
            return Err(MoveError::SquareUnavailable(self.position));
        }
        Ok(())
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "square {}", self.position + 1)
    }
}

/// Why a move cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum MoveError {
    /// The square is occupied or off the board.
    #[display("Square {} is occupied or invalid", _0)]
    SquareUnavailable(usize),

    /// The game is already over.
    #[display("Game is already over")]
    GameOver,
}

impl std::error::Error for MoveError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_occupied() {
        let mut state = GameState::new(3);
        state.apply_move(4);
        assert_eq!(Move::new(4).check(&state), Err(MoveError::SquareUnavailable(4)));
        assert_eq!(Move::new(9).check(&state), Err(MoveError::SquareUnavailable(9)));
        assert!(Move::new(0).check(&state).is_ok());
    }

    #[test]
    fn test_check_terminal_first() {
        let mut state = GameState::new(3);
        for pos in [0, 3, 1, 4, 2] {
            state.apply_move(pos);
        }
        assert!(state.is_terminal());
        assert_eq!(Move::new(0).check(&state), Err(MoveError::GameOver));
    }
}
