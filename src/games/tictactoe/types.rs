//! Core domain types for N×N tic-tac-toe.

use serde::{Deserialize, Serialize};

use super::phases::{Evaluation, Outcome};

/// Board edge length used when nothing else is configured.
pub const DEFAULT_BOARD_SIZE: usize = 3;

/// Player in the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum Player {
    /// Player X (goes first, the ledger's `player1`).
    X,
    /// Player O (goes second, the ledger's `player2`).
    O,
}

impl Player {
    /// Returns the opponent player.
    pub fn opponent(self) -> Self {
        match self {
            Player::X => Player::O,
            Player::O => Player::X,
        }
    }
}

/// A square on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Square {
    /// Empty square.
    Empty,
    /// Square occupied by a player.
    Occupied(Player),
}

impl Square {
    /// Returns true if nobody has played here.
    pub fn is_empty(self) -> bool {
        matches!(self, Square::Empty)
    }

    /// Returns the occupying player, if any.
    pub fn player(self) -> Option<Player> {
        match self {
            Square::Empty => None,
            Square::Occupied(p) => Some(p),
        }
    }
}

/// N×N board stored in row-major order.
///
/// The number of squares is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Board {
    size: usize,
    squares: Vec<Square>,
}

impl Board {
    /// Creates an empty `size`×`size` board.
    pub fn empty(size: usize) -> Self {
        Self {
            size,
            squares: vec![Square::Empty; size * size],
        }
    }

    /// Builds a board from row-major squares.
    ///
    /// Returns `None` unless `squares.len() == size * size`.
    pub fn from_squares(size: usize, squares: Vec<Square>) -> Option<Self> {
        (squares.len() == size * size).then_some(Self { size, squares })
    }

    /// Edge length of the board.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total number of squares (N²).
    pub fn len(&self) -> usize {
        self.squares.len()
    }

    /// Returns true for a zero-sized board.
    pub fn is_empty(&self) -> bool {
        self.squares.is_empty()
    }

    /// Gets the square at the given position.
    pub fn get(&self, pos: usize) -> Option<Square> {
        self.squares.get(pos).copied()
    }

    /// Returns true if the position is on the board and unoccupied.
    pub fn is_vacant(&self, pos: usize) -> bool {
        matches!(self.get(pos), Some(Square::Empty))
    }

    /// Places a player's mark.
    ///
    /// Returns false and leaves the board untouched if `pos` is off the board.
    pub(crate) fn place(&mut self, pos: usize, player: Player) -> bool {
        match self.squares.get_mut(pos) {
            Some(square) => {
                *square = Square::Occupied(player);
                true
            }
            None => false,
        }
    }

    /// Returns all squares as a slice.
    pub fn squares(&self) -> &[Square] {
        &self.squares
    }

    /// Number of occupied squares.
    pub fn occupied_count(&self) -> usize {
        self.squares.iter().filter(|s| !s.is_empty()).count()
    }

    /// Formats the board as a human-readable grid.
    ///
    /// Empty squares show their 1-based index.
    pub fn display(&self) -> String {
        let width = self.len().to_string().len();
        let mut result = String::new();
        for row in 0..self.size {
            for col in 0..self.size {
                let pos = row * self.size + col;
                let symbol = match self.squares[pos] {
                    Square::Empty => (pos + 1).to_string(),
                    Square::Occupied(player) => player.to_string(),
                };
                result.push_str(&format!("{symbol:^width$}"));
                if col + 1 < self.size {
                    result.push('|');
                }
            }
            if row + 1 < self.size {
                result.push('\n');
                let rule = vec!["-".repeat(width); self.size].join("+");
                result.push_str(&rule);
                result.push('\n');
            }
        }
        result
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::empty(DEFAULT_BOARD_SIZE)
    }
}

/// Current status of the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameStatus {
    /// Game is ongoing.
    InProgress,
    /// Game ended in a win.
    Won(Player),
    /// Game ended in a draw.
    Draw,
}

impl From<Outcome> for GameStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Winner(p) => GameStatus::Won(p),
            Outcome::Draw => GameStatus::Draw,
        }
    }
}

/// Complete, value-comparable game snapshot published by every backend.
///
/// `winning_line` is non-empty only for a won game.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameState {
    board: Board,
    current_player: Player,
    status: GameStatus,
    winning_line: Vec<usize>,
}

impl GameState {
    /// Creates a fresh game with X to move.
    pub fn new(size: usize) -> Self {
        Self {
            board: Board::empty(size),
            current_player: Player::X,
            status: GameStatus::InProgress,
            winning_line: Vec::new(),
        }
    }

    /// Derives a state from a board alone.
    ///
    /// X moves when an even number of squares is filled. On a finished board
    /// `current_player` stays with whoever made the last move.
    pub fn from_board(board: Board) -> Self {
        let filled = board.occupied_count();
        let last_mover = if filled % 2 == 1 { Player::X } else { Player::O };
        match super::rules::evaluate(&board) {
            Some(evaluation) => {
                let mut state = Self {
                    board,
                    current_player: last_mover,
                    status: GameStatus::InProgress,
                    winning_line: Vec::new(),
                };
                state.finish(evaluation);
                state
            }
            None => Self {
                board,
                current_player: last_mover.opponent(),
                status: GameStatus::InProgress,
                winning_line: Vec::new(),
            },
        }
    }

    /// Returns the board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Returns the player to move (or the last mover once finished).
    pub fn current_player(&self) -> Player {
        self.current_player
    }

    /// Returns the game status.
    pub fn status(&self) -> GameStatus {
        self.status
    }

    /// Returns the indices of the completed line, empty unless won.
    pub fn winning_line(&self) -> &[usize] {
        &self.winning_line
    }

    /// Returns the final outcome, `None` while in progress.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.status {
            GameStatus::InProgress => None,
            GameStatus::Won(p) => Some(Outcome::Winner(p)),
            GameStatus::Draw => Some(Outcome::Draw),
        }
    }

    /// Returns true once the game has a result.
    pub fn is_terminal(&self) -> bool {
        self.status != GameStatus::InProgress
    }

    /// Places the current player's mark, evaluates, and toggles the turn
    /// unless the move ended the game.
    ///
    /// Callers validate legality first.
    pub(crate) fn apply_move(&mut self, pos: usize) {
        let player = self.current_player;
        self.apply_move_as(pos, player, None);
    }

    /// Places `player`'s mark and evaluates.
    ///
    /// `next` overrides the toggled turn when the oracle names the next mover.
    pub(crate) fn apply_move_as(&mut self, pos: usize, player: Player, next: Option<Player>) {
        if !self.board.place(pos, player) {
            return;
        }
        match super::rules::evaluate(&self.board) {
            Some(evaluation) => {
                self.current_player = player;
                self.finish(evaluation);
            }
            None => self.current_player = next.unwrap_or_else(|| player.opponent()),
        }
    }

    /// Marks the game terminal with the given evaluation.
    pub(crate) fn finish(&mut self, evaluation: Evaluation) {
        self.status = evaluation.outcome().into();
        self.winning_line = match evaluation.outcome() {
            Outcome::Winner(_) => evaluation.line().to_vec(),
            Outcome::Draw => Vec::new(),
        };
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(DEFAULT_BOARD_SIZE)
    }
}
