use crate::algorithm::{a_star_search, EdgeUsage};
use crate::common::{arrival, Agent, Conflict, ConflictCounts, Path, Signature};
use crate::detector::{detect_conflicts, max_path_length, reorder_conflicts, stay_at_destination};
use crate::map::Map;
use crate::solver::{ExactSolver, SolverError};
use crate::stat::Stats;
use crate::subproblem::{Subproblem, SubproblemOptions};

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Standard,
    #[default]
    Congestion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    pub time_budget: Duration,
    pub solver_timeout: Duration,
    /// Fail count above which a conflict is given up.
    pub max_retries: usize,
    pub min_radius: usize,
    pub min_submap_size: usize,
    pub trailing_steps: usize,
    /// Radius added per earlier repair of the same signature.
    pub repeat_radius_factor: usize,
    /// Ticks added per failure when a conflict is retried.
    pub retry_makespan_factor: usize,
    pub retry_cap: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            time_budget: Duration::from_secs(200),
            solver_timeout: Duration::from_millis(10_000),
            max_retries: 30,
            min_radius: 2,
            min_submap_size: 10,
            trailing_steps: 3,
            repeat_radius_factor: 3,
            retry_makespan_factor: 4,
            retry_cap: 10,
        }
    }
}

/// Memory of the repair loop: how often a hotspot was repaired and how
/// often each exact conflict failed to be.
#[derive(Debug, Default)]
pub struct RetryLedger {
    repeats: HashMap<Signature, usize>,
    failures: HashMap<Conflict, usize>,
}

impl RetryLedger {
    pub fn repeats(&self, signature: &Signature) -> usize {
        self.repeats.get(signature).copied().unwrap_or(0)
    }

    pub fn record_repair(&mut self, signature: Signature) -> usize {
        let count = self.repeats.entry(signature).or_default();
        *count += 1;
        *count
    }

    pub fn failures(&self, conflict: &Conflict) -> usize {
        self.failures.get(conflict).copied().unwrap_or(0)
    }

    pub fn record_failure(&mut self, conflict: &Conflict) -> usize {
        let count = self.failures.entry(conflict.clone()).or_default();
        *count += 1;
        *count
    }

    /// Minimum BFS radius for the next attempt on `conflict`. Grows with the
    /// number of earlier repairs of its signature and with its own failures.
    pub fn suggested_radius(&self, conflict: &Conflict, options: &ResolveOptions) -> usize {
        let repeats = self.repeats(&conflict.signature());
        let failures = self.failures(conflict).min(options.retry_cap);
        options
            .min_radius
            .max(options.repeat_radius_factor * repeats)
            .max(failures)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Outcome {
    pub paths: Vec<Path>,
    pub outstanding: Vec<Conflict>,
    pub unsolvable: Vec<Conflict>,
    /// Conflict counts after every successful repair.
    pub history: Vec<ConflictCounts>,
    pub timed_out: bool,
}

/// Plans every agent independently, then repairs the resulting conflicts one
/// at a time with an exact solver on small local instances.
pub struct CombinedSolver<S: ExactSolver> {
    map: Map,
    agents: Vec<Agent>,
    solver: S,
    options: ResolveOptions,
    ledger: RetryLedger,
    stats: Stats,
}

impl<S: ExactSolver> CombinedSolver<S> {
    pub fn new(
        map: &Map,
        agents: Vec<Agent>,
        solver: S,
        options: ResolveOptions,
    ) -> anyhow::Result<Self> {
        if let Some((index, agent)) = agents
            .iter()
            .enumerate()
            .find(|(index, agent)| agent.id != *index)
        {
            bail!("agent at index {index} has id {}, ids must be 0..n in order", agent.id);
        }
        Ok(CombinedSolver {
            map: map.clone(),
            agents,
            solver,
            options,
            ledger: RetryLedger::default(),
            stats: Stats::default(),
        })
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    /// Plans every agent in order. The congestion-aware variant sees the edges
    /// all earlier agents already use, so the order matters.
    #[instrument(skip_all, name = "initial_planning", fields(search = format!("{:?}", search)), level = "debug")]
    pub fn plan_initial_paths(&mut self, search: SearchKind) {
        let started = Instant::now();
        let mut usage = EdgeUsage::new();

        for agent in &mut self.agents {
            let path = match search {
                SearchKind::Standard => {
                    a_star_search(&self.map, agent.start, agent.goal, None, &mut self.stats)
                }
                SearchKind::Congestion => {
                    a_star_search(&self.map, agent.start, agent.goal, Some(&usage), &mut self.stats)
                }
            };
            if path.is_empty() {
                warn!("agent {} has no route from {:?} to {:?}", agent.id, agent.start, agent.goal);
                self.stats.unreachable_agents += 1;
            } else if search == SearchKind::Congestion {
                usage.record(&path);
            }
            agent.path = path;
        }

        let max_length = max_path_length(&self.agents);
        stay_at_destination(&mut self.agents, max_length);
        self.stats.planning_time_us = started.elapsed().as_micros() as usize;
        info!(
            "initial paths for {} agents, max length {max_length}, {} edges used",
            self.agents.len(),
            usage.len()
        );
    }

    pub fn run(&mut self, search: SearchKind) -> Outcome {
        self.plan_initial_paths(search);
        self.resolve()
    }

    /// Repairs conflicts until none are left or the time budget runs out.
    /// The budget is checked between attempts; a single solver call is
    /// bounded by the smaller of its own timeout and the remaining budget.
    #[instrument(skip_all, name = "resolve", level = "debug")]
    pub fn resolve(&mut self) -> Outcome {
        let started = Instant::now();
        let mut queue: VecDeque<Conflict> =
            detect_conflicts(&self.agents, max_path_length(&self.agents)).into();
        let mut unsolvable: Vec<Conflict> = Vec::new();
        let mut unsolvable_signatures: HashSet<Signature> = HashSet::new();
        let mut history = Vec::new();
        let mut timed_out = false;
        info!(
            "resolving {} initial conflicts: {:?}",
            queue.len(),
            ConflictCounts::from_conflicts(&queue)
        );

        while let Some(conflict) = queue.pop_front() {
            if self.remaining_budget(started).is_none() {
                queue.push_front(conflict);
                timed_out = true;
                break;
            }
            self.stats.iterations += 1;

            let failures = self.ledger.failures(&conflict);
            if failures > self.options.max_retries {
                info!("giving up on {conflict} after {failures} failures");
                unsolvable_signatures.insert(conflict.signature());
                unsolvable.push(conflict);
                continue;
            }

            let mut subproblem = match self.build(&conflict, failures) {
                Ok(subproblem) => subproblem,
                Err(err) => {
                    warn!("cannot build subproblem for {conflict}: {err:#}");
                    unsolvable_signatures.insert(conflict.signature());
                    unsolvable.push(conflict);
                    continue;
                }
            };

            match self.attempt(&mut subproblem, started) {
                Ok(solution) => {
                    subproblem.apply(&mut self.agents, &solution);
                    let repeats = self.ledger.record_repair(conflict.signature());
                    self.stats.repairs += 1;
                    debug!("repaired {conflict} (repair #{repeats} of this hotspot)");

                    let max_length = max_path_length(&self.agents);
                    stay_at_destination(&mut self.agents, max_length);
                    let mut conflicts = detect_conflicts(&self.agents, max_length);
                    conflicts.retain(|c| !unsolvable_signatures.contains(&c.signature()));
                    reorder_conflicts(&mut conflicts);

                    let counts = ConflictCounts::from_conflicts(&conflicts);
                    debug!("conflicts after repair: {counts:?}");
                    history.push(counts);
                    queue = conflicts.into();
                }
                Err(err) => {
                    let failures = self.ledger.record_failure(&conflict);
                    debug!("{conflict} failed {failures} times, last error: {err}");
                    if failures > self.options.max_retries {
                        info!("marking {conflict} unsolvable");
                        debug!("{}", subproblem.render(&self.agents));
                        unsolvable_signatures.insert(conflict.signature());
                        unsolvable.push(conflict);
                    } else {
                        queue.push_front(conflict);
                    }
                }
            }
        }

        self.stats.repair_time_us = started.elapsed().as_micros() as usize;
        self.stats.max_path_length = max_path_length(&self.agents);
        self.stats.sum_of_costs = self.agents.iter().map(|agent| arrival(&agent.path)).sum();
        let outstanding: Vec<Conflict> = queue.into();
        if timed_out {
            warn!("time budget exhausted with {} conflicts left", outstanding.len());
        }
        info!(
            "resolution finished: {} outstanding, {} unsolvable, {} repairs",
            outstanding.len(),
            unsolvable.len(),
            self.stats.repairs
        );

        Outcome {
            paths: self.agents.iter().map(|agent| agent.path.clone()).collect(),
            outstanding,
            unsolvable,
            history,
            timed_out,
        }
    }

    fn build(&self, conflict: &Conflict, failures: usize) -> anyhow::Result<Subproblem> {
        let scale = failures.min(self.options.retry_cap);
        let options = SubproblemOptions {
            min_radius: self.ledger.suggested_radius(conflict, &self.options),
            min_size: self.options.min_submap_size,
            trailing_steps: self.options.trailing_steps + scale,
        };
        let mut subproblem = Subproblem::build(conflict, &self.agents, &self.map, &options)?;
        if scale > 0 {
            subproblem.widen(self.options.retry_makespan_factor * scale, &self.agents);
        }
        Ok(subproblem)
    }

    /// Budget left since `started`, `None` once it is used up.
    fn remaining_budget(&self, started: Instant) -> Option<Duration> {
        self.options
            .time_budget
            .checked_sub(started.elapsed())
            .filter(|remaining| !remaining.is_zero())
    }

    /// Solves, and on failure widens by one tick per agent and solves again.
    /// Each call is bounded by the budget still left when it starts.
    #[instrument(skip_all, name = "attempt", fields(conflict = %subproblem.conflict), level = "debug")]
    fn attempt(
        &mut self,
        subproblem: &mut Subproblem,
        started: Instant,
    ) -> Result<Vec<(usize, Path)>, SolverError> {
        self.stats.subproblems += 1;
        let remaining = self
            .remaining_budget(started)
            .ok_or(SolverError::Timeout(Duration::ZERO))?;

        let timeout = self.options.solver_timeout.min(remaining);
        let err = match self.call_solver(subproblem, timeout) {
            Ok(solution) => return Ok(solution),
            Err(err) => err,
        };
        debug!("first attempt failed: {err}");

        let Some(remaining) = self.remaining_budget(started) else {
            debug!("no budget left to retry the widened subproblem");
            return Err(err);
        };
        subproblem.widen(subproblem.agents.len(), &self.agents);
        self.call_solver(subproblem, self.options.solver_timeout.min(remaining))
    }

    fn call_solver(
        &mut self,
        subproblem: &Subproblem,
        timeout: Duration,
    ) -> Result<Vec<(usize, Path)>, SolverError> {
        self.stats.solver_calls += 1;
        let result = self
            .solver
            .solve(&subproblem.request(), timeout)
            .and_then(|solution| subproblem.accept(solution));
        if let Err(err) = &result {
            self.stats.solver_failures += 1;
            debug!("{} failed on makespan {}: {err}", self.solver.name(), subproblem.makespan());
        }
        result
    }
}
