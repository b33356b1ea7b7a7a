use super::SolveRequest;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{instrument, trace};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(super) enum Constraint {
    /// Do not occupy `node` at `step`.
    Vertex { node: usize, step: usize },
    /// Do not move `from` -> `to` arriving at `step`.
    Edge { from: usize, to: usize, step: usize },
}

/// Cells and moves claimed by agents outside the subproblem.
pub(super) struct Reservations {
    cells: HashSet<(usize, usize)>,
    moves: HashSet<(usize, usize, usize)>,
}

impl Reservations {
    pub(super) fn new(request: &SolveRequest) -> Self {
        let mut cells = HashSet::new();
        let mut moves = HashSet::new();
        for run in &request.avoids {
            let steps: HashMap<usize, usize> =
                run.iter().map(|&(node, step)| (step, node)).collect();
            for &(node, step) in run {
                cells.insert((node, step));
                if let Some(&next) = steps.get(&(step + 1)) {
                    if next != node {
                        moves.insert((node, next, step + 1));
                    }
                }
            }
        }
        Reservations { cells, moves }
    }

    fn occupied(&self, node: usize, step: usize) -> bool {
        self.cells.contains(&(node, step))
    }

    /// Moving `from` -> `to` would swap places with an outside agent.
    fn swaps(&self, from: usize, to: usize, step: usize) -> bool {
        self.moves.contains(&(to, from, step))
    }
}

/// Hop distance from every node to `goal`, `usize::MAX` when unreachable.
pub(super) fn distances_to(adjacency: &[Vec<usize>], goal: usize) -> Vec<usize> {
    let mut distances = vec![usize::MAX; adjacency.len()];
    if goal >= adjacency.len() {
        return distances;
    }
    let mut queue = VecDeque::from([goal]);
    distances[goal] = 0;
    while let Some(node) = queue.pop_front() {
        for &neighbor in &adjacency[node] {
            if distances.get(neighbor) == Some(&usize::MAX) {
                distances[neighbor] = distances[node] + 1;
                queue.push_back(neighbor);
            }
        }
    }
    distances
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct OpenNode {
    f_cost: usize,
    node: usize,
    step: usize,
}

// Lower f first, deeper states break ties.
impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f_cost
            .cmp(&other.f_cost)
            .then_with(|| other.step.cmp(&self.step))
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn can_hold_goal(
    goal: usize,
    from_step: usize,
    makespan: usize,
    constraints: &HashSet<Constraint>,
    reservations: &Reservations,
) -> bool {
    (from_step + 1..=makespan).all(|step| {
        !reservations.occupied(goal, step)
            && !constraints.contains(&Constraint::Vertex { node: goal, step })
    })
}

/// Space-time A* for one agent of `request`.
///
/// Every action (move or wait) costs one step, so `g` equals the step and a
/// state is generated at most once. The goal is accepted only if the agent
/// can stay there until the makespan. The returned path always has exactly
/// `makespan + 1` entries.
#[instrument(skip_all, name = "space_time_search", fields(agent = agent), level = "debug")]
pub(super) fn space_time_search(
    request: &SolveRequest,
    agent: usize,
    heuristic: &[usize],
    constraints: &HashSet<Constraint>,
    reservations: &Reservations,
    expanded: &mut usize,
) -> Option<Vec<usize>> {
    let (start, goal) = *request.agents.get(agent)?;
    let makespan = request.makespan;
    if start >= request.num_nodes()
        || heuristic.get(start).is_none_or(|&h| h > makespan)
        || reservations.occupied(start, 0)
        || constraints.contains(&Constraint::Vertex { node: start, step: 0 })
    {
        return None;
    }

    let mut open_list = BTreeSet::new();
    let mut seen = HashSet::new();
    let mut trace: HashMap<(usize, usize), (usize, usize)> = HashMap::new();

    open_list.insert(OpenNode {
        f_cost: heuristic[start],
        node: start,
        step: 0,
    });
    seen.insert((start, 0));

    while let Some(current) = open_list.pop_first() {
        *expanded += 1;
        trace!("expand node: {current:?}");

        if current.node == goal
            && can_hold_goal(goal, current.step, makespan, constraints, reservations)
        {
            let mut path = construct_path(&trace, (current.node, current.step));
            path.resize(makespan + 1, goal);
            return Some(path);
        }

        let next_step = current.step + 1;
        if next_step > makespan {
            continue;
        }

        let moves = std::iter::once(current.node)
            .chain(request.adjacency[current.node].iter().copied());
        for next in moves {
            let h = heuristic.get(next).copied().unwrap_or(usize::MAX);
            if h == usize::MAX || next_step + h > makespan || seen.contains(&(next, next_step)) {
                continue;
            }
            if reservations.occupied(next, next_step)
                || reservations.swaps(current.node, next, next_step)
                || constraints.contains(&Constraint::Vertex {
                    node: next,
                    step: next_step,
                })
                || constraints.contains(&Constraint::Edge {
                    from: current.node,
                    to: next,
                    step: next_step,
                })
            {
                continue;
            }

            seen.insert((next, next_step));
            trace.insert((next, next_step), (current.node, current.step));
            open_list.insert(OpenNode {
                f_cost: next_step + h,
                node: next,
                step: next_step,
            });
        }
    }

    None
}

fn construct_path(
    trace: &HashMap<(usize, usize), (usize, usize)>,
    mut current: (usize, usize),
) -> Vec<usize> {
    let mut path = vec![current.0];
    while let Some(previous) = trace.get(&current) {
        path.push(previous.0);
        current = *previous;
    }
    path.reverse();
    path
}
