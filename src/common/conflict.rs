use super::{Edge, Position};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Collision between two or more agents on the doubled timeline.
///
/// Even ticks sample positions, odd ticks sample edge traversals. Agent ids
/// are kept sorted so equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Conflict {
    Position {
        time: usize,
        position: Position,
        agents: Vec<usize>,
    },
    Edge {
        time: usize,
        edge: Edge,
        agents: Vec<usize>,
    },
    /// A run of at least three positions that every agent traverses together,
    /// the first one at `time`.
    Path {
        time: usize,
        path: Vec<Position>,
        agents: Vec<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictKind {
    Path,
    Edge,
    Position,
}

/// Spatial payload of a conflict, independent of when it happens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hotspot {
    Position(Position),
    Edge(Edge),
    Path(Vec<Position>),
}

/// Identifies the same collision recurring at the same place between the same agents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub hotspot: Hotspot,
    pub agents: Vec<usize>,
}

fn normalized(mut agents: Vec<usize>) -> Vec<usize> {
    agents.sort_unstable();
    agents.dedup();
    agents
}

impl Conflict {
    pub fn position(time: usize, position: Position, agents: Vec<usize>) -> Self {
        Conflict::Position {
            time,
            position,
            agents: normalized(agents),
        }
    }

    pub fn edge(time: usize, edge: Edge, agents: Vec<usize>) -> Self {
        Conflict::Edge {
            time,
            edge,
            agents: normalized(agents),
        }
    }

    pub fn path(time: usize, path: Vec<Position>, agents: Vec<usize>) -> Self {
        Conflict::Path {
            time,
            path,
            agents: normalized(agents),
        }
    }

    pub fn kind(&self) -> ConflictKind {
        match self {
            Conflict::Position { .. } => ConflictKind::Position,
            Conflict::Edge { .. } => ConflictKind::Edge,
            Conflict::Path { .. } => ConflictKind::Path,
        }
    }

    pub fn time(&self) -> usize {
        match self {
            Conflict::Position { time, .. }
            | Conflict::Edge { time, .. }
            | Conflict::Path { time, .. } => *time,
        }
    }

    pub fn agents(&self) -> &[usize] {
        match self {
            Conflict::Position { agents, .. }
            | Conflict::Edge { agents, .. }
            | Conflict::Path { agents, .. } => agents,
        }
    }

    /// Tick of the last position involved; path conflicts span `2 * len` ticks.
    pub fn last_tick(&self) -> usize {
        match self {
            Conflict::Path { time, path, .. } => time + 2 * path.len(),
            Conflict::Edge { time, .. } | Conflict::Position { time, .. } => *time,
        }
    }

    /// Resolution order: earliest last tick first, then path, edge, position.
    pub fn sort_key(&self) -> (usize, ConflictKind) {
        (self.last_tick(), self.kind())
    }

    pub fn signature(&self) -> Signature {
        let hotspot = match self {
            Conflict::Position { position, .. } => Hotspot::Position(*position),
            Conflict::Edge { edge, .. } => Hotspot::Edge(*edge),
            Conflict::Path { path, .. } => Hotspot::Path(path.clone()),
        };
        Signature {
            hotspot,
            agents: self.agents().to_vec(),
        }
    }

    /// Grid cells the conflict is anchored on.
    pub fn positions(&self) -> Vec<Position> {
        match self {
            Conflict::Position { position, .. } => vec![*position],
            Conflict::Edge { edge, .. } => vec![edge.first(), edge.second()],
            Conflict::Path { path, .. } => path.clone(),
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Position {
                time,
                position,
                agents,
            } => write!(f, "{{ position {time} {agents:?} {position:?} }}"),
            Conflict::Edge { time, edge, agents } => {
                write!(f, "{{ edge {time} {agents:?} {edge} }}")
            }
            Conflict::Path { time, path, agents } => {
                write!(f, "{{ path {time} {agents:?} {path:?} }}")
            }
        }
    }
}

/// Number of conflicts per kind, recorded once per repair iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictCounts {
    pub position: usize,
    pub edge: usize,
    pub path: usize,
}

impl ConflictCounts {
    pub fn from_conflicts<'a>(conflicts: impl IntoIterator<Item = &'a Conflict>) -> Self {
        let mut counts = ConflictCounts::default();
        for conflict in conflicts {
            match conflict.kind() {
                ConflictKind::Position => counts.position += 1,
                ConflictKind::Edge => counts.edge += 1,
                ConflictKind::Path => counts.path += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.position + self.edge + self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agents_are_normalized() {
        let conflict = Conflict::position(4, (1, 1), vec![3, 1, 3]);
        assert_eq!(conflict.agents(), &[1, 3]);
        assert_eq!(conflict, Conflict::position(4, (1, 1), vec![1, 3]));
    }

    #[test]
    fn test_sort_key_prefers_path_then_edge_on_ties() {
        let path = Conflict::path(1, vec![(0, 0), (0, 1), (0, 2)], vec![0, 1]);
        let edge = Conflict::edge(7, Edge::new((0, 0), (0, 1)), vec![0, 1]);
        let position = Conflict::position(7, (2, 2), vec![2, 3]);

        assert_eq!(path.last_tick(), 7);
        let mut conflicts = vec![position.clone(), edge.clone(), path.clone()];
        conflicts.sort_by_key(Conflict::sort_key);
        assert_eq!(conflicts, vec![path, edge, position]);
    }

    #[test]
    fn test_signature_ignores_time() {
        let early = Conflict::edge(3, Edge::new((1, 0), (2, 0)), vec![0, 1]);
        let late = Conflict::edge(9, Edge::new((2, 0), (1, 0)), vec![1, 0]);
        assert_ne!(early, late);
        assert_eq!(early.signature(), late.signature());
    }

    #[test]
    fn test_counts() {
        let conflicts = vec![
            Conflict::position(0, (0, 0), vec![0, 1]),
            Conflict::position(2, (0, 1), vec![0, 1]),
            Conflict::edge(3, Edge::new((0, 1), (0, 2)), vec![0, 1]),
        ];
        let counts = ConflictCounts::from_conflicts(&conflicts);
        assert_eq!(counts.position, 2);
        assert_eq!(counts.edge, 1);
        assert_eq!(counts.path, 0);
        assert_eq!(counts.total(), 3);
    }
}
