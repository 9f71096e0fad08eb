//! Grid positions and moves.
//!
//! The maze is a discrete grid: `x` grows to the east, `y` grows to the south.
//! A move is one of the four cardinal steps or `Stay`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A cell on the maze grid.
///
/// Implements Ord so it can key BTreeMap/BTreeSet (deterministic iteration).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Column, 0 = west border.
    pub x: i32,
    /// Row, 0 = north border.
    pub y: i32,
}

impl Position {
    /// Create a position.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to another position.
    #[inline]
    pub fn manhattan(self, other: Position) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Squared Euclidean distance to another position.
    #[inline]
    pub fn euclidean_sq(self, other: Position) -> u64 {
        let dx = u64::from(self.x.abs_diff(other.x));
        let dy = u64::from(self.y.abs_diff(other.y));
        dx * dx + dy * dy
    }

    /// Position reached by applying `mv`.
    #[inline]
    pub fn step(self, mv: Move) -> Position {
        let (dx, dy) = mv.delta();
        Position::new(self.x + dx, self.y + dy)
    }

    /// The move that leads from `self` to an adjacent `target`, if any.
    pub fn move_towards(self, target: Position) -> Option<Move> {
        Move::ALL.into_iter().find(|mv| self.step(*mv) == target)
    }
}

impl From<(i32, i32)> for Position {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A single bot move.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Move {
    /// Stay on the current cell.
    #[default]
    Stay,
    /// y - 1
    North,
    /// y + 1
    South,
    /// x + 1
    East,
    /// x - 1
    West,
}

impl Move {
    /// All moves, `Stay` first.
    pub const ALL: [Move; 5] = [Move::Stay, Move::North, Move::South, Move::East, Move::West];

    /// The four cardinal moves.
    pub const CARDINAL: [Move; 4] = [Move::North, Move::South, Move::East, Move::West];

    /// Grid offset `(dx, dy)` of this move.
    #[inline]
    pub const fn delta(self) -> (i32, i32) {
        match self {
            Move::Stay => (0, 0),
            Move::North => (0, -1),
            Move::South => (0, 1),
            Move::East => (1, 0),
            Move::West => (-1, 0),
        }
    }

    /// Index used when hashing.
    #[inline]
    pub const fn index(self) -> u8 {
        match self {
            Move::Stay => 0,
            Move::North => 1,
            Move::South => 2,
            Move::East => 3,
            Move::West => 4,
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Move::Stay => "stay",
            Move::North => "north",
            Move::South => "south",
            Move::East => "east",
            Move::West => "west",
        };
        f.write_str(name)
    }
}
