//! Result types produced by board evaluation.

use serde::{Deserialize, Serialize};

/// Outcome of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Player won the game.
    Winner(super::Player),
    /// Game ended in a draw.
    Draw,
}

impl Outcome {
    /// Returns the winner if there is one.
    pub fn winner(&self) -> Option<super::Player> {
        match self {
            Outcome::Winner(player) => Some(*player),
            Outcome::Draw => None,
        }
    }

    /// Returns true if the game was a draw.
    pub fn is_draw(&self) -> bool {
        matches!(self, Outcome::Draw)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Winner(player) => write!(f, "Player {player} wins"),
            Outcome::Draw => write!(f, "Draw"),
        }
    }
}

/// Verdict of [`evaluate`](super::rules::evaluate) on a board that is no
/// longer in play.
///
/// `line` holds the completed row, column, or diagonal for a win and is
/// empty for a draw.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evaluation {
    outcome: Outcome,
    line: Vec<usize>,
}

impl Evaluation {
    /// A win along `line`.
    pub fn won(player: super::Player, line: Vec<usize>) -> Self {
        Self {
            outcome: Outcome::Winner(player),
            line,
        }
    }

    /// A full board with no completed line.
    pub fn draw() -> Self {
        Self {
            outcome: Outcome::Draw,
            line: Vec::new(),
        }
    }

    /// The outcome.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// The winning line (empty for a draw).
    pub fn line(&self) -> &[usize] {
        &self.line
    }
}
