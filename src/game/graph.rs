//! Adjacency graph of the passable cells and breadth-first path search.
//!
//! Used by the reference players. The referee itself never searches paths.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use thiserror::Error;

use crate::core::position::Position;
use crate::game::maze::Maze;

/// No route between the requested cells.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no path from {from} to any target")]
pub struct NoPath {
    /// Start cell of the failed search.
    pub from: Position,
}

/// Passable cells and their passable neighbours.
#[derive(Clone, Debug)]
pub struct AdjacencyGraph {
    edges: BTreeMap<Position, Vec<Position>>,
}

impl AdjacencyGraph {
    /// Build the graph of a maze.
    pub fn from_maze(maze: &Maze) -> Self {
        let edges = maze
            .passable_positions()
            .map(|pos| (pos, maze.neighbors(pos)))
            .collect();
        Self { edges }
    }

    /// Number of passable cells.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the maze has no passable cell.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Whether `pos` is a node.
    pub fn contains(&self, pos: Position) -> bool {
        self.edges.contains_key(&pos)
    }

    /// Shortest path from `from` to `to`, excluding `from`, including `to`.
    ///
    /// An empty path means `from == to`.
    pub fn shortest_path(&self, from: Position, to: Position) -> Result<Vec<Position>, NoPath> {
        self.shortest_path_to_any(from, &BTreeSet::from([to]))
    }

    /// Shortest path to the nearest of `targets`.
    ///
    /// Ties are broken by neighbour order, so the result is deterministic.
    pub fn shortest_path_to_any(
        &self,
        from: Position,
        targets: &BTreeSet<Position>,
    ) -> Result<Vec<Position>, NoPath> {
        if !self.contains(from) {
            return Err(NoPath { from });
        }
        if targets.contains(&from) {
            return Ok(Vec::new());
        }

        let mut parent: BTreeMap<Position, Position> = BTreeMap::new();
        let mut queue = VecDeque::from([from]);
        parent.insert(from, from);

        while let Some(current) = queue.pop_front() {
            let Some(neighbors) = self.edges.get(&current) else {
                continue;
            };
            for next in neighbors {
                if parent.contains_key(next) {
                    continue;
                }
                parent.insert(*next, current);
                if targets.contains(next) {
                    return Ok(unwind(&parent, from, *next));
                }
                queue.push_back(*next);
            }
        }

        Err(NoPath { from })
    }

    /// Maze distance between two cells.
    pub fn distance(&self, from: Position, to: Position) -> Result<usize, NoPath> {
        self.shortest_path(from, to).map(|path| path.len())
    }
}

fn unwind(parent: &BTreeMap<Position, Position>, from: Position, to: Position) -> Vec<Position> {
    let mut path = vec![to];
    let mut current = to;
    while let Some(prev) = parent.get(&current) {
        if *prev == from {
            break;
        }
        path.push(*prev);
        current = *prev;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::maze::parse_layout;

    const LAYOUT: &str = "
########
#0 #  1#
#2 # #3#
#    # #
########
";

    fn graph() -> AdjacencyGraph {
        AdjacencyGraph::from_maze(&parse_layout(LAYOUT).unwrap().maze)
    }

    #[test]
    fn test_path_around_wall() {
        let g = graph();
        let path = g.shortest_path(Position::new(1, 1), Position::new(4, 1)).unwrap();
        assert_eq!(path[0], Position::new(1, 2));
        assert_eq!(path.last(), Some(&Position::new(4, 1)));
        // (1,1) -> down to row 3, across to x=4, up to row 1
        assert_eq!(path.len(), 7);
        for pair in path.windows(2) {
            assert_eq!(pair[0].manhattan(pair[1]), 1);
        }
    }

    #[test]
    fn test_same_cell_is_empty_path() {
        let g = graph();
        let start = Position::new(2, 2);
        assert_eq!(g.shortest_path(start, start), Ok(Vec::new()));
        assert_eq!(g.distance(start, start), Ok(0));
    }

    #[test]
    fn test_unreachable_cell() {
        let g = graph();
        // Walls are not nodes
        let err = g.shortest_path(Position::new(1, 1), Position::new(0, 0)).unwrap_err();
        assert_eq!(err.from, Position::new(1, 1));
        assert!(g.shortest_path(Position::new(0, 0), Position::new(1, 1)).is_err());
    }

    #[test]
    fn test_nearest_of_many() {
        let g = graph();
        let targets = BTreeSet::from([Position::new(6, 3), Position::new(2, 1)]);
        let path = g.shortest_path_to_any(Position::new(1, 1), &targets).unwrap();
        assert_eq!(path, vec![Position::new(2, 1)]);
    }
}
