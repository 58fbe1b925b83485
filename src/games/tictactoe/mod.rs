mod action;
mod phases;
mod position;
mod types;

pub mod rules;

pub use action::{Move, MoveError};
pub use phases::{Evaluation, Outcome};
pub use position::{BoardPosition, parse_square, to_position, to_row_col};
pub use types::{Board, DEFAULT_BOARD_SIZE, GameState, GameStatus, Player, Square};
