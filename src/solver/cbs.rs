use super::space_time::{distances_to, space_time_search, Constraint, Reservations};
use super::{ExactSolver, SolveRequest, SolverError};
use crate::common::arrival;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// First collision between two local paths of equal length.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LocalConflict {
    Vertex {
        agent_1: usize,
        agent_2: usize,
        node: usize,
        step: usize,
    },
    Edge {
        agent_1: usize,
        agent_2: usize,
        step: usize,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct HighLevelNode {
    id: usize,
    constraints: Vec<HashSet<Constraint>>,
    paths: Vec<Vec<usize>>,
    cost: usize,
    conflicts: usize,
}

impl Ord for HighLevelNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .cmp(&other.cost)
            .then_with(|| self.conflicts.cmp(&other.conflicts))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for HighLevelNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn collisions(paths: &[Vec<usize>]) -> Vec<LocalConflict> {
    let mut conflicts = Vec::new();
    let length = paths.iter().map(Vec::len).max().unwrap_or(0);
    for step in 0..length {
        for agent_1 in 0..paths.len() {
            for agent_2 in agent_1 + 1..paths.len() {
                let (path_1, path_2) = (&paths[agent_1], &paths[agent_2]);
                let (Some(&at_1), Some(&at_2)) = (path_1.get(step), path_2.get(step)) else {
                    continue;
                };
                if at_1 == at_2 {
                    conflicts.push(LocalConflict::Vertex {
                        agent_1,
                        agent_2,
                        node: at_1,
                        step,
                    });
                } else if step > 0 && path_1[step - 1] == at_2 && path_2[step - 1] == at_1 {
                    conflicts.push(LocalConflict::Edge {
                        agent_1,
                        agent_2,
                        step,
                    });
                }
            }
        }
    }
    conflicts
}

/// Conflict-based search over a local graph, bounded by the request makespan.
#[derive(Debug, Default)]
pub struct CbsSolver {
    high_level_expanded: usize,
    low_level_expanded: usize,
}

impl CbsSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn high_level_expanded(&self) -> usize {
        self.high_level_expanded
    }

    pub fn low_level_expanded(&self) -> usize {
        self.low_level_expanded
    }

    fn child(
        &mut self,
        parent: &HighLevelNode,
        agent: usize,
        constraint: Constraint,
        id: usize,
        search: &Search,
    ) -> Option<HighLevelNode> {
        let mut constraints = parent.constraints.clone();
        constraints[agent].insert(constraint);
        let path = space_time_search(
            search.request,
            agent,
            &search.heuristics[agent],
            &constraints[agent],
            &search.reservations,
            &mut self.low_level_expanded,
        )?;

        let mut paths = parent.paths.clone();
        let cost = parent.cost - arrival(&paths[agent]) + arrival(&path);
        paths[agent] = path;
        let conflicts = collisions(&paths).len();
        Some(HighLevelNode {
            id,
            constraints,
            paths,
            cost,
            conflicts,
        })
    }
}

struct Search<'a> {
    request: &'a SolveRequest,
    heuristics: Vec<Vec<usize>>,
    reservations: Reservations,
}

impl ExactSolver for CbsSolver {
    fn name(&self) -> &str {
        "cbs"
    }

    #[instrument(skip_all, name = "cbs", fields(agents = request.agents.len(), nodes = request.num_nodes(), makespan = request.makespan), level = "debug")]
    fn solve(
        &mut self,
        request: &SolveRequest,
        timeout: Duration,
    ) -> Result<Vec<Vec<usize>>, SolverError> {
        let started = Instant::now();
        let search = Search {
            request,
            heuristics: request
                .agents
                .iter()
                .map(|&(_, goal)| distances_to(&request.adjacency, goal))
                .collect(),
            reservations: Reservations::new(request),
        };

        let mut paths = Vec::with_capacity(request.agents.len());
        for agent in 0..request.agents.len() {
            let path = space_time_search(
                request,
                agent,
                &search.heuristics[agent],
                &HashSet::new(),
                &search.reservations,
                &mut self.low_level_expanded,
            )
            .ok_or(SolverError::Infeasible {
                makespan: request.makespan,
            })?;
            paths.push(path);
        }

        let root = HighLevelNode {
            id: 0,
            constraints: vec![HashSet::new(); request.agents.len()],
            cost: paths.iter().map(|path| arrival(path)).sum(),
            conflicts: collisions(&paths).len(),
            paths,
        };
        let mut next_id = 1;
        let mut open = BTreeSet::from([root]);

        while let Some(current) = open.pop_first() {
            if started.elapsed() > timeout {
                debug!("cbs ran out of time after {} nodes", self.high_level_expanded);
                return Err(SolverError::Timeout(timeout));
            }
            self.high_level_expanded += 1;

            let Some(conflict) = collisions(&current.paths).into_iter().next() else {
                debug!("cbs solved with cost {}", current.cost);
                return Ok(current.paths);
            };
            debug!("conflict: {conflict:?}");

            let branches = match conflict {
                LocalConflict::Vertex {
                    agent_1,
                    agent_2,
                    node,
                    step,
                } => [
                    (agent_1, Constraint::Vertex { node, step }),
                    (agent_2, Constraint::Vertex { node, step }),
                ],
                LocalConflict::Edge {
                    agent_1,
                    agent_2,
                    step,
                } => {
                    let path_1 = &current.paths[agent_1];
                    let path_2 = &current.paths[agent_2];
                    [
                        (
                            agent_1,
                            Constraint::Edge {
                                from: path_1[step - 1],
                                to: path_1[step],
                                step,
                            },
                        ),
                        (
                            agent_2,
                            Constraint::Edge {
                                from: path_2[step - 1],
                                to: path_2[step],
                                step,
                            },
                        ),
                    ]
                }
            };

            for (agent, constraint) in branches {
                if let Some(child) = self.child(&current, agent, constraint, next_id, &search) {
                    open.insert(child);
                }
                next_id += 1;
            }
        }

        Err(SolverError::Infeasible {
            makespan: request.makespan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    }

    // 0 - 1 - 2 - 3 with a pocket 4 hanging off 1.
    fn corridor_with_pocket() -> Vec<Vec<usize>> {
        vec![vec![1], vec![0, 2, 4], vec![1, 3], vec![2], vec![1]]
    }

    fn assert_collision_free(request: &SolveRequest, paths: &[Vec<usize>]) {
        assert_eq!(paths.len(), request.agents.len());
        for (path, &(start, goal)) in paths.iter().zip(&request.agents) {
            assert_eq!(path.len(), request.makespan + 1);
            assert_eq!(path.first(), Some(&start));
            assert_eq!(path.last(), Some(&goal));
            for step in path.windows(2) {
                assert!(step[0] == step[1] || request.adjacency[step[0]].contains(&step[1]));
            }
            for (step, node) in path.iter().enumerate() {
                assert!(!request.is_avoided(*node, step));
            }
        }
        assert!(collisions(paths).is_empty());
    }

    #[test]
    fn test_collisions() {
        let paths = vec![vec![0, 1, 2], vec![2, 1, 0], vec![3, 2, 1]];
        let conflicts = collisions(&paths);
        assert_eq!(
            conflicts[0],
            LocalConflict::Vertex {
                agent_1: 0,
                agent_2: 1,
                node: 1,
                step: 1
            }
        );
        assert!(conflicts.contains(&LocalConflict::Edge {
            agent_1: 0,
            agent_2: 2,
            step: 2
        }));
    }

    #[test]
    fn test_cbs_swaps_through_pocket() {
        init_tracing();
        let request = SolveRequest {
            adjacency: corridor_with_pocket(),
            agents: vec![(0, 3), (3, 0)],
            avoids: vec![],
            makespan: 7,
        };
        let mut solver = CbsSolver::new();
        let paths = solver.solve(&request, Duration::from_secs(10)).unwrap();
        assert_collision_free(&request, &paths);
        assert!(solver.high_level_expanded() > 1);
    }

    #[test]
    fn test_cbs_infeasible_without_room() {
        init_tracing();
        let request = SolveRequest {
            adjacency: vec![vec![1], vec![0, 2], vec![1]],
            agents: vec![(0, 2), (2, 0)],
            avoids: vec![],
            makespan: 3,
        };
        let mut solver = CbsSolver::new();
        assert!(matches!(
            solver.solve(&request, Duration::from_secs(10)),
            Err(SolverError::Infeasible { makespan: 3 })
        ));
    }

    #[test]
    fn test_cbs_respects_avoids() {
        let request = SolveRequest {
            adjacency: corridor_with_pocket(),
            agents: vec![(0, 3)],
            avoids: vec![vec![(2, 0), (2, 1), (2, 2)]],
            makespan: 5,
        };
        let paths = CbsSolver::new()
            .solve(&request, Duration::from_secs(10))
            .unwrap();
        assert_collision_free(&request, &paths);
    }

    #[test]
    fn test_cbs_zero_timeout() {
        let request = SolveRequest {
            adjacency: corridor_with_pocket(),
            agents: vec![(0, 3), (3, 0)],
            avoids: vec![],
            makespan: 7,
        };
        assert!(matches!(
            CbsSolver::new().solve(&request, Duration::ZERO),
            Err(SolverError::Timeout(_))
        ));
    }
}
