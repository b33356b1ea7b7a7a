use super::{bucket_ranks, construct_path, EdgeUsage};
use crate::common::{manhattan, Path, Position};
use crate::map::Map;
use crate::stat::Stats;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, instrument, trace};

/// Immutable snapshot pushed into the open list.
#[derive(Clone, Debug, Eq, PartialEq)]
struct OpenNode {
    position: Position,
    priority: usize,
    g_cost: usize,
}

// Lower priority first, then shorter distance from start; BinaryHeap is a max-heap.
impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.g_cost.cmp(&self.g_cost))
            .then_with(|| other.position.cmp(&self.position))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct Vertex {
    g_cost: usize,
    explored: bool,
}

/// Best-first search on the grid with Manhattan heuristic and unit step cost.
///
/// With `usage` the priority also carries a per-expansion neighbour rank that
/// favours neighbours closer to the goal and edges fewer earlier agents took.
/// Returns an empty path when the goal is unreachable.
#[instrument(skip_all, name = "a_star", fields(start = format!("{:?}", start), goal = format!("{:?}", goal), congestion = usage.is_some()), level = "debug")]
pub fn a_star_search(
    map: &Map,
    start: Position,
    goal: Position,
    usage: Option<&EdgeUsage>,
    stats: &mut Stats,
) -> Path {
    if !map.is_free(start) || !map.is_free(goal) {
        debug!("start or goal is blocked");
        return Vec::new();
    }

    let mut open_list = BinaryHeap::new();
    let mut vertices: HashMap<Position, Vertex> = HashMap::new();
    let mut predecessors: HashMap<Position, Position> = HashMap::new();

    vertices.insert(
        start,
        Vertex {
            g_cost: 0,
            explored: false,
        },
    );
    open_list.push(OpenNode {
        position: start,
        priority: manhattan(start, goal),
        g_cost: 0,
    });

    while let Some(current) = open_list.pop() {
        trace!("expand node: {current:?}");

        if current.position == goal {
            return construct_path(&predecessors, goal);
        }

        // A position can sit in the open list several times; only the first pop expands it.
        let g_cost = match vertices.get_mut(&current.position) {
            Some(vertex) if !vertex.explored => {
                vertex.explored = true;
                vertex.g_cost
            }
            _ => continue,
        };
        stats.search_expanded_nodes += 1;

        let tentative_g_cost = g_cost + 1;
        let neighbors = map.neighbors(current.position);
        let ranks = match usage {
            Some(usage) => rank_neighbors(current.position, neighbors, usage, goal),
            None => vec![0; neighbors.len()],
        };

        for (neighbor, rank) in neighbors.iter().zip(ranks) {
            match vertices.get_mut(neighbor) {
                None => {
                    vertices.insert(
                        *neighbor,
                        Vertex {
                            g_cost: tentative_g_cost,
                            explored: false,
                        },
                    );
                }
                Some(vertex) if !vertex.explored && vertex.g_cost > tentative_g_cost => {
                    vertex.g_cost = tentative_g_cost;
                }
                Some(_) => continue,
            }
            predecessors.insert(*neighbor, current.position);
            open_list.push(OpenNode {
                position: *neighbor,
                priority: tentative_g_cost + manhattan(*neighbor, goal) + rank,
                g_cost: tentative_g_cost,
            });
        }
    }

    debug!("cannot find path");
    Vec::new()
}

/// Sum of two bucket ranks per neighbour: by heuristic to the goal, then by
/// how often the directed edge from `position` was already used.
fn rank_neighbors(
    position: Position,
    neighbors: &[Position],
    usage: &EdgeUsage,
    goal: Position,
) -> Vec<usize> {
    let heuristics: Vec<usize> = neighbors
        .iter()
        .map(|neighbor| manhattan(*neighbor, goal))
        .collect();
    let uses: Vec<usize> = neighbors
        .iter()
        .map(|neighbor| usage.count(position, *neighbor))
        .collect();

    bucket_ranks(&heuristics)
        .into_iter()
        .zip(bucket_ranks(&uses))
        .map(|(by_heuristic, by_use)| by_heuristic + by_use)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber;

    // Helper function to setup tracing
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    }

    fn assert_valid(map: &Map, path: &Path, start: Position, goal: Position) {
        assert_eq!(path.first(), Some(&start));
        assert_eq!(path.last(), Some(&goal));
        for step in path.windows(2) {
            assert!(map.are_adjacent(step[0], step[1]), "{step:?} not adjacent");
        }
    }

    #[test]
    fn test_a_star_open_grid() {
        init_tracing();
        let map = Map::from_rows(&["....", "....", "....", "...."]);
        let path = a_star_search(&map, (0, 0), (3, 0), None, &mut Stats::default());
        assert_eq!(path, vec![(0, 0), (1, 0), (2, 0), (3, 0)]);
    }

    #[test]
    fn test_a_star_detours_around_wall() {
        init_tracing();
        let map = Map::from_rows(&[".....", ".@@@.", ".@...", ".@.@.", "...@."]);
        let mut stats = Stats::default();
        let path = a_star_search(&map, (2, 2), (4, 0), None, &mut stats);
        assert_valid(&map, &path, (2, 2), (4, 0));
        assert_eq!(path, vec![(2, 2), (3, 2), (4, 2), (4, 1), (4, 0)]);
        assert!(stats.search_expanded_nodes > 0);
    }

    #[test]
    fn test_a_star_start_is_goal() {
        let map = Map::from_rows(&["..", ".."]);
        let path = a_star_search(&map, (1, 1), (1, 1), None, &mut Stats::default());
        assert_eq!(path, vec![(1, 1)]);
    }

    #[test]
    fn test_a_star_unreachable_goal() {
        init_tracing();
        let map = Map::from_rows(&["....@.", "...@.@", "....@."]);
        let mut usage = EdgeUsage::new();
        usage.record(&[(0, 0), (0, 1)]);
        assert!(a_star_search(&map, (0, 0), (1, 4), None, &mut Stats::default()).is_empty());
        assert!(
            a_star_search(&map, (0, 0), (1, 4), Some(&usage), &mut Stats::default()).is_empty()
        );
    }

    #[test]
    fn test_rank_neighbors() {
        let mut usage = EdgeUsage::new();
        usage.record(&[(1, 1), (1, 2)]);
        usage.record(&[(1, 1), (1, 2)]);
        usage.record(&[(1, 1), (2, 1)]);

        // Goal to the bottom right: (2, 1) and (1, 2) are closer than (0, 1) and (1, 0).
        let neighbors = [(0, 1), (2, 1), (1, 0), (1, 2)];
        let ranks = rank_neighbors((1, 1), &neighbors, &usage, (3, 3));
        assert_eq!(ranks, vec![1, 1, 1, 2]);
    }

    #[test]
    fn test_congestion_spreads_repeated_routes() {
        init_tracing();
        let map = Map::from_rows(&["...", "...", "..."]);
        let mut usage = EdgeUsage::new();
        let mut stats = Stats::default();

        let first = a_star_search(&map, (0, 0), (2, 2), Some(&usage), &mut stats);
        assert_valid(&map, &first, (0, 0), (2, 2));
        assert_eq!(first.len(), 5);
        usage.record(&first);

        let second = a_star_search(&map, (0, 0), (2, 2), Some(&usage), &mut stats);
        assert_valid(&map, &second, (0, 0), (2, 2));
        assert_eq!(second.len(), 5);
        assert_ne!(first[1], second[1]);
    }
}
