use super::LocalGraph;
use crate::common::{manhattan, Agent, Position};
use crate::map::Map;

/// Up to two neighbours closest to `target` that are not on the conflict path.
fn closest_off_path(
    target: Position,
    neighbors: &[Position],
    conflict_path: &[Position],
) -> Vec<Position> {
    let mut candidates: Vec<Position> = neighbors
        .iter()
        .copied()
        .filter(|neighbor| !conflict_path.contains(neighbor))
        .collect();
    candidates.sort_by_key(|neighbor| manhattan(*neighbor, target));
    candidates.truncate(2);
    candidates
}

/// Corridor around a path conflict: each agent's position at `start_step`,
/// the conflict path, and `trailing` steps of every agent after it, each
/// widened by the neighbours closest to where the agent heads next.
pub(super) fn path_submap(
    conflict_path: &[Position],
    conflict_agents: &[usize],
    agents: &[Agent],
    map: &Map,
    start_step: usize,
    trailing: usize,
) -> LocalGraph {
    let mut graph = LocalGraph::new();
    let involved: Vec<&Agent> = conflict_agents
        .iter()
        .filter_map(|id| agents.get(*id))
        .collect();

    if let Some(&entry) = conflict_path.first() {
        for agent in &involved {
            if let Some(position) = agent.position_at(start_step) {
                let widening = closest_off_path(entry, map.neighbors(position), conflict_path);
                graph.add_with_neighbors(position, &widening);
            }
        }
    }

    for (j, &position) in conflict_path.iter().enumerate() {
        let next = conflict_path.get(j + 1).copied().unwrap_or(position);
        let widening = closest_off_path(next, map.neighbors(position), conflict_path);
        graph.add_with_neighbors(position, &widening);
    }

    let first = start_step + conflict_path.len();
    for step in first..first + trailing {
        for agent in &involved {
            if let Some(position) = agent.position_at(step) {
                let next = agent.position_at(step + 1).unwrap_or(position);
                let widening = closest_off_path(next, map.neighbors(position), conflict_path);
                graph.add_with_neighbors(position, &widening);
            }
        }
    }

    graph
}

/// Breadth-first ball around `seeds`.
///
/// Expansion stops at `min_radius`; while fewer than `min_size` cells are
/// included the radius grows one level at a time, never past `max_radius`.
/// Returns the graph and the deepest level reached.
pub(super) fn radius_submap(
    seeds: &[Position],
    map: &Map,
    min_radius: usize,
    min_size: usize,
    max_radius: usize,
) -> (LocalGraph, usize) {
    let mut graph = LocalGraph::new();
    let mut frontier = Vec::new();
    for &seed in seeds {
        if !graph.contains(seed) {
            graph.insert(seed);
            frontier.push(seed);
        }
    }

    let mut radius = min_radius;
    let mut level = 0;
    loop {
        if level >= radius {
            if graph.len() < min_size && radius < max_radius {
                radius += 1;
            } else {
                break;
            }
        }
        if level >= max_radius {
            break;
        }

        let mut next = Vec::new();
        for position in &frontier {
            for neighbor in map.neighbors(*position) {
                if !graph.contains(*neighbor) {
                    graph.insert(*neighbor);
                    next.push(*neighbor);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
        level += 1;
    }

    (graph, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closest_off_path() {
        let neighbors = [(0, 1), (2, 1), (1, 0), (1, 2)];
        let widening = closest_off_path((1, 3), &neighbors, &[(1, 1), (1, 2)]);
        assert_eq!(widening, vec![(0, 1), (2, 1)]);
    }

    #[test]
    fn test_radius_submap_stops_at_min_radius_when_large_enough() {
        let map = Map::from_rows(&["....", "....", "....", "...."]);
        let (graph, radius) = radius_submap(&[(1, 0), (2, 0)], &map, 2, 10, 3);
        assert_eq!(radius, 2);
        assert_eq!(graph.len(), 10);
        assert!(!graph.contains((0, 2)));
        assert!(graph.contains((2, 2)));
    }

    #[test]
    fn test_radius_submap_grows_in_narrow_corridor() {
        let map = Map::from_rows(&["........."]);
        let (graph, radius) = radius_submap(&[(0, 4)], &map, 1, 5, 10);
        assert_eq!(radius, 2);
        assert_eq!(graph.len(), 5);
    }

    #[test]
    fn test_radius_submap_respects_max_radius() {
        let map = Map::from_rows(&["........."]);
        let (graph, radius) = radius_submap(&[(0, 4)], &map, 1, 9, 3);
        assert_eq!(radius, 3);
        assert_eq!(graph.len(), 7);
    }

    #[test]
    fn test_radius_submap_small_component() {
        let map = Map::from_rows(&["..@...."]);
        let (graph, radius) = radius_submap(&[(0, 0)], &map, 2, 10, 5);
        assert_eq!(radius, 1);
        assert_eq!(graph.len(), 2);
    }
}
