//! Maze Grid and Layout Parsing
//!
//! A layout is a rectangular block of text enclosed by walls:
//!
//! ```text
//! ################
//! #0  .      #  1#
//! #2 ##   .    3 #
//! ################
//! ```
//!
//! - `#` wall
//! - `.` food pellet
//! - ` ` free cell
//! - `0`..`9` bot start position (bot `i` plays for team `i % 2`)
//!
//! The width must be even so the midline splits the grid into two home zones
//! of equal size: team 0 owns `x < width / 2`, team 1 owns the rest.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::position::{Move, Position};

/// Maximum number of bots a layout can place (single digit ids).
pub const MAX_BOTS: usize = 10;

/// Errors raised while parsing a layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// No rows at all.
    #[error("layout is empty")]
    Empty,

    /// A row differs in width from the first row.
    #[error("row {row} has width {found}, expected {expected}")]
    NotRectangular {
        /// Row index.
        row: usize,
        /// Width of the first row.
        expected: usize,
        /// Width of this row.
        found: usize,
    },

    /// Width must be even.
    #[error("layout width must be even (found {0})")]
    OddWidth(usize),

    /// The border of the grid contains a non-wall cell.
    #[error("layout must be enclosed by walls (cell {0})")]
    NotEnclosed(Position),

    /// Unknown layout character.
    #[error("unknown character {ch:?} at {pos}")]
    InvalidChar {
        /// The character found.
        ch: char,
        /// Its position.
        pos: Position,
    },

    /// The same bot id appears twice.
    #[error("bot {0} placed more than once")]
    DuplicateBot(usize),

    /// Bot ids must be contiguous from 0.
    #[error("bot {0} is missing")]
    MissingBot(usize),

    /// Each team needs the same number of bots.
    #[error("bot count must be even and non-zero (found {0})")]
    BadBotCount(usize),
}

/// Immutable wall grid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maze {
    width: usize,
    height: usize,
    /// Row-major: `walls[y * width + x]`.
    walls: Vec<bool>,
}

impl Maze {
    /// Build a maze from a row-major wall vector.
    pub fn new(width: usize, height: usize, walls: Vec<bool>) -> Result<Self, LayoutError> {
        if width == 0 || height == 0 {
            return Err(LayoutError::Empty);
        }
        if walls.len() != width * height {
            return Err(LayoutError::NotRectangular {
                row: walls.len() / width,
                expected: width,
                found: walls.len() % width,
            });
        }
        if width % 2 != 0 {
            return Err(LayoutError::OddWidth(width));
        }
        Ok(Self { width, height, walls })
    }

    /// Grid width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Grid height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Whether `pos` lies on the grid.
    #[inline]
    pub fn in_bounds(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as usize) < self.width && (pos.y as usize) < self.height
    }

    /// Whether `pos` is a wall. Out-of-bounds cells count as walls.
    #[inline]
    pub fn is_wall(&self, pos: Position) -> bool {
        if !self.in_bounds(pos) {
            return true;
        }
        self.walls[pos.y as usize * self.width + pos.x as usize]
    }

    /// Whether a bot may stand on `pos`.
    #[inline]
    pub fn is_passable(&self, pos: Position) -> bool {
        !self.is_wall(pos)
    }

    /// First x coordinate of team 1's half.
    #[inline]
    pub fn midline(&self) -> i32 {
        (self.width / 2) as i32
    }

    /// Team whose home zone contains column `x`.
    #[inline]
    pub fn zone_owner(&self, x: i32) -> usize {
        if x < self.midline() {
            0
        } else {
            1
        }
    }

    /// Moves from `pos` that do not run into a wall, `Stay` first.
    pub fn legal_moves(&self, pos: Position) -> Vec<Move> {
        Move::ALL
            .into_iter()
            .filter(|mv| self.is_passable(pos.step(*mv)))
            .collect()
    }

    /// Passable neighbours of `pos` (excluding `pos` itself).
    pub fn neighbors(&self, pos: Position) -> Vec<Position> {
        Move::CARDINAL
            .into_iter()
            .map(|mv| pos.step(mv))
            .filter(|p| self.is_passable(*p))
            .collect()
    }

    /// All passable cells in row-major order.
    pub fn passable_positions(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.height).flat_map(move |y| {
            (0..self.width).filter_map(move |x| {
                let pos = Position::new(x as i32, y as i32);
                self.is_passable(pos).then_some(pos)
            })
        })
    }
}

/// Parsed layout: walls, food and bot start positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Wall grid.
    pub maze: Maze,
    /// Initial food.
    pub food: BTreeSet<Position>,
    /// Start position of bot `i` at index `i`.
    pub bot_positions: Vec<Position>,
}

impl Layout {
    /// Grid dimensions `(width, height)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.maze.width(), self.maze.height())
    }

    /// Render back to layout text.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity((self.maze.width() + 1) * self.maze.height());
        for y in 0..self.maze.height() {
            for x in 0..self.maze.width() {
                let pos = Position::new(x as i32, y as i32);
                let ch = if self.maze.is_wall(pos) {
                    '#'
                } else if let Some(id) = self.bot_positions.iter().position(|p| *p == pos) {
                    char::from_digit(id as u32, 10).unwrap_or('?')
                } else if self.food.contains(&pos) {
                    '.'
                } else {
                    ' '
                };
                out.push(ch);
            }
            out.push('\n');
        }
        out
    }
}

impl FromStr for Layout {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_layout(s)
    }
}

/// Parse layout text.
///
/// Blank lines before and after the grid are ignored, as is trailing
/// whitespace on each row.
pub fn parse_layout(text: &str) -> Result<Layout, LayoutError> {
    let rows: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .skip_while(|row| row.is_empty())
        .collect();
    let rows: Vec<&str> = match rows.iter().rposition(|row| !row.is_empty()) {
        Some(last) => rows[..=last].to_vec(),
        None => return Err(LayoutError::Empty),
    };

    let width = rows[0].chars().count();
    let height = rows.len();

    let mut walls = Vec::with_capacity(width * height);
    let mut food = BTreeSet::new();
    let mut bots: [Option<Position>; MAX_BOTS] = [None; MAX_BOTS];

    for (y, row) in rows.iter().enumerate() {
        let found = row.chars().count();
        if found != width {
            return Err(LayoutError::NotRectangular {
                row: y,
                expected: width,
                found,
            });
        }
        for (x, ch) in row.chars().enumerate() {
            let pos = Position::new(x as i32, y as i32);
            let on_border = x == 0 || y == 0 || x + 1 == width || y + 1 == height;
            if on_border && ch != '#' {
                return Err(LayoutError::NotEnclosed(pos));
            }
            match ch {
                '#' => walls.push(true),
                '.' => {
                    walls.push(false);
                    food.insert(pos);
                }
                ' ' => walls.push(false),
                '0'..='9' => {
                    walls.push(false);
                    let id = ch as usize - '0' as usize;
                    if bots[id].is_some() {
                        return Err(LayoutError::DuplicateBot(id));
                    }
                    bots[id] = Some(pos);
                }
                _ => return Err(LayoutError::InvalidChar { ch, pos }),
            }
        }
    }

    let maze = Maze::new(width, height, walls)?;

    let count = bots.iter().rposition(Option::is_some).map_or(0, |last| last + 1);
    let mut bot_positions = Vec::with_capacity(count);
    for (id, slot) in bots.iter().take(count).enumerate() {
        match slot {
            Some(pos) => bot_positions.push(*pos),
            None => return Err(LayoutError::MissingBot(id)),
        }
    }
    if count == 0 || count % 2 != 0 {
        return Err(LayoutError::BadBotCount(count));
    }

    Ok(Layout {
        maze,
        food,
        bot_positions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = "
########
#0 .. 1#
#2    3#
########
";

    #[test]
    fn test_parse_small_layout() {
        let layout = parse_layout(SMALL).unwrap();
        assert_eq!(layout.dimensions(), (8, 4));
        assert_eq!(layout.bot_positions.len(), 4);
        assert_eq!(layout.bot_positions[0], Position::new(1, 1));
        assert_eq!(layout.bot_positions[3], Position::new(6, 2));
        assert_eq!(layout.food.len(), 2);
        assert!(layout.food.contains(&Position::new(3, 1)));
        assert!(layout.maze.is_wall(Position::new(0, 0)));
        assert!(layout.maze.is_passable(Position::new(1, 1)));
    }

    #[test]
    fn test_round_trip_text() {
        let layout = parse_layout(SMALL).unwrap();
        let text = layout.to_text();
        assert_eq!(parse_layout(&text).unwrap(), layout);
    }

    #[test]
    fn test_zone_owner() {
        let layout = parse_layout(SMALL).unwrap();
        assert_eq!(layout.maze.midline(), 4);
        assert_eq!(layout.maze.zone_owner(3), 0);
        assert_eq!(layout.maze.zone_owner(4), 1);
    }

    #[test]
    fn test_legal_moves_exclude_walls() {
        let layout = parse_layout(SMALL).unwrap();
        let moves = layout.maze.legal_moves(Position::new(1, 1));
        assert_eq!(moves, vec![Move::Stay, Move::South, Move::East]);
    }

    #[test]
    fn test_layout_errors() {
        assert_eq!(parse_layout("\n\n"), Err(LayoutError::Empty));
        assert_eq!(
            parse_layout("#######\n#0   1#\n#######"),
            Err(LayoutError::OddWidth(7))
        );
        assert!(matches!(
            parse_layout("########\n#0   1#\n########"),
            Err(LayoutError::NotRectangular { row: 1, .. })
        ));
        assert!(matches!(
            parse_layout("########\n 0    1#\n########"),
            Err(LayoutError::NotEnclosed(_))
        ));
        assert!(matches!(
            parse_layout("########\n#0 x  1#\n########"),
            Err(LayoutError::InvalidChar { ch: 'x', .. })
        ));
        assert_eq!(
            parse_layout("########\n#0 0  1#\n########"),
            Err(LayoutError::DuplicateBot(0))
        );
        assert_eq!(
            parse_layout("########\n#0    2#\n########"),
            Err(LayoutError::MissingBot(1))
        );
        assert_eq!(
            parse_layout("########\n#0 1  2#\n########"),
            Err(LayoutError::BadBotCount(3))
        );
        assert_eq!(
            parse_layout("########\n#      #\n########"),
            Err(LayoutError::BadBotCount(0))
        );
    }
}
