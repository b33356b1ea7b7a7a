//! Local multi-agent instances carved out around a single conflict.
//!
//! A [`Subproblem`] owns a small induced subgraph of the grid, a time window
//! on the doubled timeline and, for every conflicting agent, the local ids of
//! where it stands when the window opens and where it must be when it closes.
//! Agents outside the conflict that cross the subgraph during the window are
//! turned into an avoid-set the exact solver must respect.

mod extract;
mod graph;

pub use graph::LocalGraph;

use crate::common::{Agent, Conflict, Path, Position};
use crate::map::Map;
use crate::solver::{SolveRequest, SolverError};

use anyhow::{bail, Context};
use std::collections::HashSet;
use std::fmt::Write as _;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubproblemOptions {
    /// Suggested minimum BFS radius for position and edge conflicts.
    pub min_radius: usize,
    /// Minimum number of local nodes before BFS stops growing.
    pub min_size: usize,
    /// Steps after a path conflict whose positions are included.
    pub trailing_steps: usize,
}

impl Default for SubproblemOptions {
    fn default() -> Self {
        SubproblemOptions {
            min_radius: 2,
            min_size: 10,
            trailing_steps: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAgent {
    /// Global agent id.
    pub id: usize,
    pub start: usize,
    pub goal: usize,
    /// Global step whose position became `goal`; the untouched remainder
    /// of the path resumes right after it.
    pub resume_step: usize,
}

#[derive(Debug, Clone)]
pub struct Subproblem {
    pub conflict: Conflict,
    pub graph: LocalGraph,
    pub agents: Vec<LocalAgent>,
    /// Per outside agent, (local node, window step) pairs it occupies.
    pub avoids: Vec<Vec<(usize, usize)>>,
    /// Window `[start_time, end_time)` in ticks.
    pub start_time: usize,
    pub end_time: usize,
    /// BFS radius, `None` for path conflicts.
    pub radius: Option<usize>,
    /// Ticks added by [`Subproblem::widen`].
    pub widened_by: usize,
}

impl Subproblem {
    #[instrument(skip_all, name = "build_subproblem", fields(conflict = %conflict), level = "debug")]
    pub fn build(
        conflict: &Conflict,
        agents: &[Agent],
        map: &Map,
        options: &SubproblemOptions,
    ) -> anyhow::Result<Self> {
        let (mut graph, start_time, end_time, goal_step, radius) = match conflict {
            Conflict::Path {
                time,
                path,
                agents: ids,
            } => {
                let start_time = time.saturating_sub(2);
                let end_time = time + 2 * path.len() + 2 * ids.len();
                let graph = extract::path_submap(
                    path,
                    ids,
                    agents,
                    map,
                    start_time / 2,
                    options.trailing_steps,
                );
                (graph, start_time, end_time, time / 2 + path.len() + 2, None)
            }
            Conflict::Position { time, .. } | Conflict::Edge { time, .. } => {
                let max_radius = (time / 2).max(options.min_radius + 1);
                let (graph, radius) = extract::radius_submap(
                    &conflict.positions(),
                    map,
                    options.min_radius,
                    options.min_size,
                    max_radius,
                );
                let (start_time, end_time) = match conflict {
                    Conflict::Edge { .. } => {
                        ((time - 1).saturating_sub(2 * radius), time + 1 + 2 * radius)
                    }
                    _ => (time.saturating_sub(2 * radius), time + 2 * radius),
                };
                (graph, start_time, end_time, end_time / 2, Some(radius))
            }
        };

        let start_step = start_time / 2;
        let mut local_agents = Vec::with_capacity(conflict.agents().len());
        for &id in conflict.agents() {
            let agent = agents
                .get(id)
                .with_context(|| format!("conflict {conflict} names unknown agent {id}"))?;
            if agent.path.is_empty() {
                bail!("agent {id} in conflict {conflict} has no path");
            }
            let last_step = agent.path.len() - 1;
            let origin = agent.path[start_step.min(last_step)];
            let resume_step = goal_step.min(last_step);
            let destination = agent.path[resume_step];
            local_agents.push(LocalAgent {
                id,
                start: graph.insert(origin),
                goal: graph.insert(destination),
                resume_step,
            });
        }
        graph.close(map);

        let mut subproblem = Subproblem {
            conflict: conflict.clone(),
            graph,
            agents: local_agents,
            avoids: Vec::new(),
            start_time,
            end_time,
            radius,
            widened_by: 0,
        };
        subproblem.avoids = subproblem.find_avoids(agents);
        debug!(
            "subproblem: {} nodes, window {}..{}, makespan {}, {} avoid runs",
            subproblem.graph.len(),
            subproblem.start_time,
            subproblem.end_time,
            subproblem.makespan(),
            subproblem.avoids.len()
        );
        Ok(subproblem)
    }

    pub fn start_step(&self) -> usize {
        self.start_time / 2
    }

    /// Window length in full steps.
    pub fn makespan(&self) -> usize {
        (self.end_time - self.start_time) / 2
    }

    /// Extends the window end by `extra_ticks`; local destinations stay put.
    pub fn widen(&mut self, extra_ticks: usize, agents: &[Agent]) {
        self.end_time += extra_ticks;
        self.widened_by += extra_ticks;
        self.avoids = self.find_avoids(agents);
    }

    fn find_avoids(&self, agents: &[Agent]) -> Vec<Vec<(usize, usize)>> {
        let start_step = self.start_step();
        let end_step = self.end_time / 2;
        let involved = self.conflict.agents();
        let mut seen = HashSet::new();
        let mut avoids = Vec::new();

        for (id, agent) in agents.iter().enumerate() {
            if involved.contains(&id) || start_step >= agent.path.len() {
                continue;
            }
            let end = end_step.min(agent.path.len() - 1);
            let run: Vec<(usize, usize)> = agent.path[start_step..=end]
                .iter()
                .enumerate()
                .filter_map(|(step, position)| self.graph.local(*position).map(|node| (node, step)))
                .filter(|pair| seen.insert(*pair))
                .collect();
            if !run.is_empty() {
                avoids.push(run);
            }
        }
        avoids
    }

    pub fn request(&self) -> SolveRequest {
        SolveRequest {
            adjacency: self.graph.adjacency().to_vec(),
            agents: self
                .agents
                .iter()
                .map(|agent| (agent.start, agent.goal))
                .collect(),
            avoids: self.avoids.clone(),
            makespan: self.makespan(),
        }
    }

    /// Checks a solver answer and maps it back to grid positions, paired
    /// with the global agent id. Any bad path rejects the whole answer.
    pub fn accept(&self, solution: Vec<Vec<usize>>) -> Result<Vec<(usize, Path)>, SolverError> {
        if solution.len() < self.agents.len() {
            return Err(SolverError::MalformedOutput {
                expected: self.agents.len(),
                found: solution.len(),
            });
        }

        let invalid = |agent: usize, reason: &str| SolverError::InvalidPath {
            agent,
            reason: reason.to_string(),
        };
        let mut accepted = Vec::with_capacity(self.agents.len());
        for (local, ids) in self.agents.iter().zip(solution) {
            if ids.first() != Some(&local.start) {
                return Err(invalid(local.id, "does not start at its local origin"));
            }
            if ids.last() != Some(&local.goal) {
                return Err(invalid(local.id, "does not end at its local destination"));
            }
            if let Some(step) = ids
                .windows(2)
                .find(|step| {
                    step[0] != step[1] && !self.graph.neighbors(step[0]).contains(&step[1])
                })
            {
                return Err(invalid(
                    local.id,
                    &format!("moves {} -> {} along no local edge", step[0], step[1]),
                ));
            }
            let path = ids
                .iter()
                .map(|id| self.graph.global(*id))
                .collect::<Option<Path>>()
                .ok_or_else(|| invalid(local.id, "uses an unknown node id"))?;
            accepted.push((local.id, path));
        }
        Ok(accepted)
    }

    /// Replaces the window of each solved agent with its new segment.
    pub fn apply(&self, agents: &mut [Agent], solution: &[(usize, Path)]) {
        for (id, segment) in solution {
            let Some(local) = self.agents.iter().find(|local| local.id == *id) else {
                continue;
            };
            if let Some(agent) = agents.get_mut(*id) {
                agent.path = splice(&agent.path, segment, self.start_step(), local.resume_step);
            }
        }
    }

    /// Current window segment of every subproblem agent, in local order.
    pub fn extract(&self, agents: &[Agent]) -> Vec<Path> {
        let start = self.start_step();
        let end = start + self.makespan() + 1;
        self.agents
            .iter()
            .map(|local| match agents.get(local.id) {
                Some(agent) => {
                    let path = &agent.path;
                    path[start.min(path.len())..end.min(path.len())].to_vec()
                }
                None => Vec::new(),
            })
            .collect()
    }

    /// ASCII picture of the window, one block per step. `C` conflict cell,
    /// `A` avoided cell, digits are subproblem agents, `K` marks a clash,
    /// `X` lies outside the subgraph.
    pub fn render(&self, agents: &[Agent]) -> String {
        let positions = self.graph.positions();
        let (Some(min_row), Some(max_row)) = (
            positions.iter().map(|p| p.0).min(),
            positions.iter().map(|p| p.0).max(),
        ) else {
            return String::new();
        };
        let min_col = positions.iter().map(|p| p.1).min().unwrap_or(0);
        let max_col = positions.iter().map(|p| p.1).max().unwrap_or(0);

        let mut out = format!("{}\n", self.conflict);
        for step in 0..=self.makespan() {
            let tick = self.start_time + 2 * step;
            let hot = self.conflict_cells(tick);
            let avoided: Vec<Position> = self
                .avoids
                .iter()
                .flatten()
                .filter(|(_, at)| *at == step)
                .filter_map(|(node, _)| self.graph.global(*node))
                .collect();
            let occupants: Vec<(usize, Position)> = self
                .agents
                .iter()
                .enumerate()
                .filter_map(|(index, local)| {
                    agents
                        .get(local.id)
                        .and_then(|agent| agent.position_at(self.start_step() + step))
                        .map(|position| (index, position))
                })
                .collect();

            let _ = writeln!(out, "Time: {tick}");
            for row in min_row..=max_row {
                for col in min_col..=max_col {
                    let cell = (row, col);
                    if !self.graph.contains(cell) {
                        out.push('X');
                        continue;
                    }
                    let here: Vec<usize> = occupants
                        .iter()
                        .filter(|(_, position)| *position == cell)
                        .map(|(index, _)| *index)
                        .collect();
                    let marks = usize::from(hot.contains(&cell))
                        + usize::from(avoided.contains(&cell))
                        + here.len();
                    let symbol = match marks {
                        0 => '.',
                        1 if hot.contains(&cell) => 'C',
                        1 if avoided.contains(&cell) => 'A',
                        1 => char::from_digit((here[0] % 36) as u32, 36).unwrap_or('?'),
                        _ => 'K',
                    };
                    out.push(symbol);
                }
                out.push('\n');
            }
        }
        out
    }

    fn conflict_cells(&self, tick: usize) -> Vec<Position> {
        match &self.conflict {
            Conflict::Position { time, position, .. } if *time == tick => vec![*position],
            Conflict::Edge { time, edge, .. } if tick + 1 == *time || tick == time + 1 => {
                vec![edge.first(), edge.second()]
            }
            Conflict::Path { time, path, .. } if tick >= *time => {
                path.get((tick - time) / 2).copied().into_iter().collect()
            }
            _ => Vec::new(),
        }
    }
}

/// `path[..start_step]`, then `segment`, then whatever followed `resume_step`.
pub fn splice(
    path: &[Position],
    segment: &[Position],
    start_step: usize,
    resume_step: usize,
) -> Path {
    let resume = (resume_step + 1).min(path.len());
    let mut spliced = path[..start_step.min(path.len())].to_vec();
    spliced.extend_from_slice(segment);
    spliced.extend_from_slice(&path[resume.max(start_step.min(path.len()))..]);
    spliced
}
