use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub planning_time_us: usize,
    pub repair_time_us: usize,
    pub search_expanded_nodes: usize,
    pub unreachable_agents: usize,
    pub iterations: usize,
    pub subproblems: usize,
    pub solver_calls: usize,
    pub solver_failures: usize,
    pub repairs: usize,
    pub max_path_length: usize,
    pub sum_of_costs: usize,
}

impl Stats {
    pub fn print(&self) {
        info!(
            "Planning(microseconds) {:?} Repair(microseconds) {:?} Search expanded nodes: {:?} Unreachable agents: {:?}",
            self.planning_time_us,
            self.repair_time_us,
            self.search_expanded_nodes,
            self.unreachable_agents
        );
        info!(
            "Iterations {:?} Subproblems {:?} Solver calls {:?} Solver failures {:?} Repairs {:?}",
            self.iterations, self.subproblems, self.solver_calls, self.solver_failures, self.repairs
        );
        info!(
            "Max path length {:?} Sum of costs {:?}",
            self.max_path_length, self.sum_of_costs
        );
    }
}
