//! Linear index ⇄ row/column mapping.
//!
//! Squares are numbered left-to-right, top-to-bottom. The ledger addresses
//! squares by `(row, col)` while the UI and backends use linear positions.

use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Row and column of a square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoardPosition {
    /// Zero-based row.
    pub row: usize,
    /// Zero-based column.
    pub col: usize,
}

impl BoardPosition {
    /// Creates a row/column pair.
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for BoardPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Converts a linear position to row/column on a `size`-wide board.
#[instrument]
pub fn to_row_col(position: usize, size: usize) -> BoardPosition {
    BoardPosition {
        row: position / size,
        col: position % size,
    }
}

/// Converts row/column back to a linear position on a `size`-wide board.
#[instrument]
pub fn to_position(row: usize, col: usize, size: usize) -> usize {
    row * size + col
}

/// Parses a 1-based square number typed by a user into a linear position.
#[instrument]
pub fn parse_square(input: &str, size: usize) -> Option<usize> {
    let n: usize = input.trim().parse().ok()?;
    (1..=size * size).contains(&n).then(|| n - 1)
}
