mod conflict;

pub use conflict::{Conflict, ConflictCounts, ConflictKind, Hotspot, Signature};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid cell as (row, col).
pub type Position = (usize, usize);

/// One position per step, starting at the agent's start position.
pub type Path = Vec<Position>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: usize,
    pub start: Position,
    pub goal: Position,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Path,
}

impl Agent {
    pub fn new(id: usize, start: Position, goal: Position) -> Self {
        Agent {
            id,
            start,
            goal,
            path: Vec::new(),
        }
    }

    /// Position occupied at `step`, `None` once the known path has ended.
    pub fn position_at(&self, step: usize) -> Option<Position> {
        self.path.get(step).copied()
    }
}

/// Undirected grid edge, stored smaller endpoint first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge(Position, Position);

impl Edge {
    pub fn new(u: Position, v: Position) -> Self {
        if u <= v {
            Edge(u, v)
        } else {
            Edge(v, u)
        }
    }

    pub fn first(&self) -> Position {
        self.0
    }

    pub fn second(&self) -> Position {
        self.1
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}-{:?}", self.0, self.1)
    }
}

/// Step at which a path reaches its last element for good; waits at the end are free.
pub fn arrival<T: PartialEq>(path: &[T]) -> usize {
    match path.last() {
        Some(last) => path.iter().rposition(|p| p != last).map_or(0, |i| i + 1),
        None => 0,
    }
}

pub fn manhattan(a: Position, b: Position) -> usize {
    a.0.abs_diff(b.0) + a.1.abs_diff(b.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_is_direction_agnostic() {
        let forward = Edge::new((1, 2), (1, 3));
        let backward = Edge::new((1, 3), (1, 2));
        assert_eq!(forward, backward);
        assert_eq!(forward.first(), (1, 2));
        assert_eq!(forward.second(), (1, 3));
    }

    #[test]
    fn test_arrival() {
        assert_eq!(arrival(&[0, 1, 2, 2, 2]), 2);
        assert_eq!(arrival(&[3, 3]), 0);
        assert_eq!(arrival(&[0, 1, 0]), 2);
        assert_eq!(arrival(&[(0, 0), (0, 1), (0, 1)]), 1);
        assert_eq!(arrival::<Position>(&[]), 0);
    }

    #[test]
    fn test_manhattan() {
        assert_eq!(manhattan((0, 0), (3, 4)), 7);
        assert_eq!(manhattan((5, 1), (2, 1)), 3);
    }
}
