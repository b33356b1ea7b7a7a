//! Collision detection over agent paths on the doubled timeline.
//!
//! Tick `2i` samples every agent's position at step `i`, tick `2i + 1` the
//! edge it traverses between steps `i` and `i + 1`. Raw collisions are merged
//! into path conflicts when a group of agents moves together along a run of
//! edges, and position collisions already explained by such a run are dropped.

use crate::common::{Agent, Conflict, Edge, Position};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// Agents crowding one position at one (even) tick.
type PositionTable = BTreeMap<(Position, usize), Vec<usize>>;

/// Agents sharing one edge at one (odd) tick, in either direction.
type EdgeTable = BTreeMap<(Edge, usize), Vec<usize>>;

#[derive(Debug, Clone)]
struct RawEdge {
    time: usize,
    edge: Edge,
    agents: Vec<usize>,
}

/// Agents moving the same way along a run of positions, `path[0]` at even tick `time`.
#[derive(Debug, Clone)]
struct PathBuild {
    time: usize,
    path: Vec<Position>,
    agents: Vec<usize>,
}

impl PathBuild {
    fn tail_tick(&self) -> usize {
        self.time + 2 * (self.path.len() - 1)
    }
}

/// Longest known path among all agents.
pub fn max_path_length(agents: &[Agent]) -> usize {
    agents.iter().map(|agent| agent.path.len()).max().unwrap_or(0)
}

/// Pads every non-empty path with its last position up to `max_length` steps.
pub fn stay_at_destination(agents: &mut [Agent], max_length: usize) {
    for agent in agents {
        if let Some(&last) = agent.path.last() {
            agent.path.resize(max_length, last);
        }
    }
}

/// Stable sort into resolution order, see [`Conflict::sort_key`].
pub fn reorder_conflicts(conflicts: &mut [Conflict]) {
    conflicts.sort_by_key(Conflict::sort_key);
}

/// Finds all conflicts among `agents` (indexed by id) over the first
/// `max_length` steps, in resolution order.
pub fn detect_conflicts(agents: &[Agent], max_length: usize) -> Vec<Conflict> {
    let (positions, edges) = raw_collisions(agents, max_length);
    trace!(
        "raw collisions: {} positions, {} edges",
        positions.len(),
        edges.len()
    );

    let mut conflicts = synthesize(agents, positions, edges);
    reorder_conflicts(&mut conflicts);
    debug!("detect {} conflicts", conflicts.len());
    conflicts
}

fn raw_collisions(agents: &[Agent], max_length: usize) -> (PositionTable, Vec<RawEdge>) {
    let mut positions = PositionTable::new();
    let mut edges = Vec::new();

    for tick in 0..(2 * max_length).saturating_sub(1) {
        if tick % 2 == 0 {
            let step = tick / 2;
            let mut groups: BTreeMap<Position, Vec<usize>> = BTreeMap::new();
            for (id, agent) in agents.iter().enumerate() {
                if let Some(position) = agent.position_at(step) {
                    groups.entry(position).or_default().push(id);
                }
            }
            for (position, ids) in groups {
                if ids.len() > 1 {
                    positions.insert((position, tick), ids);
                }
            }
        } else {
            let step = (tick + 1) / 2;
            // Edges keep the order in which agents first reach them; path
            // synthesis extends with the first matching seed.
            let mut groups: Vec<(Edge, Vec<usize>)> = Vec::new();
            let mut index: HashMap<Edge, usize> = HashMap::new();
            for (id, agent) in agents.iter().enumerate() {
                if let (Some(from), Some(to)) =
                    (agent.position_at(step - 1), agent.position_at(step))
                {
                    // Waiting is not a traversal.
                    if from != to {
                        let edge = Edge::new(from, to);
                        let slot = *index.entry(edge).or_insert_with(|| {
                            groups.push((edge, Vec::new()));
                            groups.len() - 1
                        });
                        groups[slot].1.push(id);
                    }
                }
            }
            for (edge, ids) in groups {
                if ids.len() > 1 {
                    edges.push(RawEdge {
                        time: tick,
                        edge,
                        agents: ids,
                    });
                }
            }
        }
    }

    (positions, edges)
}

/// Splits the agents of an edge collision into those moving first -> second
/// and those moving second -> first.
fn split_by_direction(raw: &RawEdge, agents: &[Agent]) -> (Vec<usize>, Vec<usize>) {
    let step = (raw.time - 1) / 2;
    raw.agents
        .iter()
        .partition(|&&id| agents[id].position_at(step) == Some(raw.edge.first()))
}

fn synthesize(
    agents: &[Agent],
    mut positions: PositionTable,
    edges: Vec<RawEdge>,
) -> Vec<Conflict> {
    let mut seeds = VecDeque::new();
    let mut edge_table = EdgeTable::new();

    for raw in edges {
        let (forward, backward) = split_by_direction(&raw, agents);
        if forward.len() > 1 {
            seeds.push_back(PathBuild {
                time: raw.time - 1,
                path: vec![raw.edge.first(), raw.edge.second()],
                agents: forward.clone(),
            });
        }
        if backward.len() > 1 {
            seeds.push_back(PathBuild {
                time: raw.time - 1,
                path: vec![raw.edge.second(), raw.edge.first()],
                agents: backward.clone(),
            });
        }
        // Opposite directions: a genuine head-on swap.
        if !forward.is_empty() && !backward.is_empty() {
            edge_table.insert((raw.edge, raw.time), raw.agents);
        }
    }

    let mut conflicts = Vec::new();
    let mut stack: Vec<PathBuild> = Vec::new();
    let mut finished: HashSet<(Position, Position, usize, Vec<usize>)> = HashSet::new();

    loop {
        // Grow the most recent build first, seeds are only taken once the stack drains.
        while let Some(build) = stack.pop() {
            let n = build.path.len();
            let last_hop = (
                build.path[n - 2],
                build.path[n - 1],
                build.tail_tick() - 1,
                build.agents.clone(),
            );
            if !finished.insert(last_hop) {
                continue;
            }

            match extend(&build, &mut seeds) {
                Some(extended) => stack.push(extended),
                None => finish(build, &mut conflicts, &mut edge_table, &mut positions),
            }
        }

        match seeds.pop_front() {
            Some(seed) => stack.push(seed),
            None => break,
        }
    }

    conflicts.extend(
        positions
            .into_iter()
            .map(|((position, time), ids)| Conflict::position(time, position, ids)),
    );
    conflicts.extend(
        edge_table
            .into_iter()
            .map(|((edge, time), ids)| Conflict::edge(time, edge, ids)),
    );
    conflicts
}

/// Appends the first seed leaving the build's tail at its tail tick that
/// shares more than one agent with it. The seed is consumed when all of its
/// agents continue with the build.
fn extend(build: &PathBuild, seeds: &mut VecDeque<PathBuild>) -> Option<PathBuild> {
    let tail = *build.path.last()?;
    let tick = build.tail_tick();

    let (index, seed) = seeds.iter().enumerate().find(|(_, seed)| {
        seed.path[0] == tail
            && seed.time == tick
            && seed
                .agents
                .iter()
                .filter(|id| build.agents.contains(id))
                .count()
                > 1
    })?;

    let shared: Vec<usize> = build
        .agents
        .iter()
        .filter(|id| seed.agents.contains(id))
        .copied()
        .collect();
    let mut path = build.path.clone();
    path.push(seed.path[1]);
    let consumed = shared.len() == seed.agents.len();

    if consumed {
        seeds.remove(index);
    }
    Some(PathBuild {
        time: build.time,
        path,
        agents: shared,
    })
}

fn finish(
    build: PathBuild,
    conflicts: &mut Vec<Conflict>,
    edge_table: &mut EdgeTable,
    positions: &mut PositionTable,
) {
    if build.agents.len() > 1 {
        if build.path.len() > 2 {
            conflicts.push(Conflict::path(
                build.time,
                build.path.clone(),
                build.agents.clone(),
            ));
        } else {
            let key = (Edge::new(build.path[0], build.path[1]), build.time + 1);
            let merged = edge_table.entry(key).or_default();
            for id in &build.agents {
                if !merged.contains(id) {
                    merged.push(*id);
                }
            }
        }
    }

    // Agents moving as a unit along the run already explain their shared positions.
    for (i, position) in build.path.iter().enumerate() {
        let key = (*position, build.time + 2 * i);
        if let Some(ids) = positions.get_mut(&key) {
            ids.retain(|id| !build.agents.contains(id));
            if ids.len() < 2 {
                positions.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ConflictKind;

    fn agent_with_path(id: usize, path: Vec<Position>) -> Agent {
        let mut agent = Agent::new(id, path[0], *path.last().unwrap());
        agent.path = path;
        agent
    }

    fn detect(agents: &mut [Agent]) -> Vec<Conflict> {
        let max_length = max_path_length(agents);
        stay_at_destination(agents, max_length);
        detect_conflicts(agents, max_length)
    }

    #[test]
    fn test_head_on_swap_is_single_edge_conflict() {
        let mut agents = vec![
            agent_with_path(0, vec![(0, 0), (1, 0), (2, 0), (3, 0)]),
            agent_with_path(1, vec![(3, 0), (2, 0), (1, 0), (0, 0)]),
        ];
        let conflicts = detect(&mut agents);
        assert_eq!(
            conflicts,
            vec![Conflict::edge(3, Edge::new((1, 0), (2, 0)), vec![0, 1])]
        );
    }

    #[test]
    fn test_corridor_convoy_is_single_path_conflict() {
        // Three agents enter a corridor through (1, 1) at the same step and leave together.
        let corridor = [(1, 1), (1, 2), (1, 3), (1, 4), (1, 5)];
        let route = |start: Position, goal: Position| {
            let mut path = vec![start];
            path.extend(corridor);
            path.push(goal);
            path
        };
        let mut agents = vec![
            agent_with_path(0, route((0, 1), (0, 5))),
            agent_with_path(1, route((1, 0), (2, 5))),
            agent_with_path(2, route((2, 1), (1, 6))),
        ];

        let conflicts = detect(&mut agents);
        assert_eq!(
            conflicts,
            vec![Conflict::path(2, corridor.to_vec(), vec![0, 1, 2])]
        );
    }

    #[test]
    fn test_meeting_at_cell_is_position_conflict() {
        let mut agents = vec![
            agent_with_path(0, vec![(0, 1), (1, 1), (2, 1)]),
            agent_with_path(1, vec![(1, 0), (1, 1), (1, 2)]),
        ];
        let conflicts = detect(&mut agents);
        assert_eq!(conflicts, vec![Conflict::position(2, (1, 1), vec![0, 1])]);
    }

    #[test]
    fn test_follow_on_same_edge_pair_becomes_edge_conflict() {
        // Both agents share (0, 0) and then move together over a single edge.
        let mut agents = vec![
            agent_with_path(0, vec![(0, 0), (0, 1), (1, 1)]),
            agent_with_path(1, vec![(0, 0), (0, 1), (0, 2)]),
        ];
        let conflicts = detect(&mut agents);
        assert_eq!(
            conflicts,
            vec![Conflict::edge(1, Edge::new((0, 0), (0, 1)), vec![0, 1])]
        );
    }

    #[test]
    fn test_mixed_directions_merge_into_head_on_conflict() {
        let mut agents = vec![
            agent_with_path(0, vec![(0, 0), (0, 1), (1, 1)]),
            agent_with_path(1, vec![(0, 0), (0, 1), (0, 2)]),
            agent_with_path(2, vec![(0, 1), (0, 0), (1, 0)]),
        ];
        let conflicts = detect(&mut agents);
        let edges: Vec<&Conflict> = conflicts
            .iter()
            .filter(|conflict| conflict.kind() == ConflictKind::Edge)
            .collect();
        assert_eq!(
            edges,
            vec![&Conflict::edge(1, Edge::new((0, 0), (0, 1)), vec![0, 1, 2])]
        );
        assert!(conflicts
            .iter()
            .all(|conflict| conflict.agents().len() >= 2));
    }

    #[test]
    fn test_arrived_agent_blocks_destination() {
        let mut agents = vec![
            agent_with_path(0, vec![(0, 0), (0, 1)]),
            agent_with_path(1, vec![(0, 3), (0, 2), (1, 2), (1, 1), (0, 1)]),
        ];
        let conflicts = detect(&mut agents);
        assert_eq!(agents[0].path.len(), 5);
        assert_eq!(conflicts, vec![Conflict::position(8, (0, 1), vec![0, 1])]);
    }

    #[test]
    fn test_unreachable_agent_is_ignored() {
        let mut agents = vec![
            agent_with_path(0, vec![(0, 0), (0, 1)]),
            Agent::new(1, (0, 1), (5, 5)),
        ];
        let conflicts = detect(&mut agents);
        assert!(conflicts.is_empty());
        assert!(agents[1].path.is_empty());
    }

    #[test]
    fn test_fork_extends_with_first_reached_edge() {
        // All four share the first hop, then the pair reaching (2, 1) first splits off.
        let mut agents = vec![
            agent_with_path(0, vec![(1, 0), (1, 1), (2, 1)]),
            agent_with_path(1, vec![(1, 0), (1, 1), (2, 1)]),
            agent_with_path(2, vec![(1, 0), (1, 1), (0, 1)]),
            agent_with_path(3, vec![(1, 0), (1, 1), (0, 1)]),
        ];
        let conflicts = detect(&mut agents);
        assert!(conflicts.contains(&Conflict::path(
            0,
            vec![(1, 0), (1, 1), (2, 1)],
            vec![0, 1]
        )));
        assert!(!conflicts.contains(&Conflict::path(
            0,
            vec![(1, 0), (1, 1), (0, 1)],
            vec![2, 3]
        )));
        assert!(conflicts.contains(&Conflict::edge(3, Edge::new((0, 1), (1, 1)), vec![2, 3])));
    }

    #[test]
    fn test_detection_is_idempotent() {
        let mut agents = vec![
            agent_with_path(0, vec![(0, 0), (0, 1), (0, 2), (0, 3)]),
            agent_with_path(1, vec![(0, 3), (0, 2), (0, 1), (0, 0)]),
            agent_with_path(2, vec![(1, 1), (0, 1), (0, 2), (1, 2)]),
            agent_with_path(3, vec![(1, 0), (1, 1), (0, 1), (0, 2)]),
        ];
        let first = detect(&mut agents);
        let second = detect(&mut agents);
        assert!(!first.is_empty());
        assert_eq!(first, second);
        for pair in first.windows(2) {
            assert!(pair[0].sort_key() <= pair[1].sort_key());
        }
    }
}
