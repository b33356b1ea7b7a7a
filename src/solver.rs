mod cbs;
mod picat;
mod space_time;

pub use cbs::CbsSolver;
pub use picat::PicatSolver;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A local multi-agent instance handed to an exact solver. Node ids are
/// dense `0..adjacency.len()`; waiting in place is always allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolveRequest {
    pub adjacency: Vec<Vec<usize>>,
    /// (origin, destination) per agent.
    pub agents: Vec<(usize, usize)>,
    /// Per outside agent, (node, step) pairs that must stay free.
    pub avoids: Vec<Vec<(usize, usize)>>,
    pub makespan: usize,
}

impl SolveRequest {
    pub fn num_nodes(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_avoided(&self, node: usize, step: usize) -> bool {
        self.avoids
            .iter()
            .flatten()
            .any(|&(avoided, at)| avoided == node && at == step)
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("no solution within makespan {makespan}")]
    Infeasible { makespan: usize },
    #[error("solver timed out after {0:?}")]
    Timeout(Duration),
    #[error("solver process failed: {0}")]
    Process(String),
    #[error("solver returned {found} paths, expected {expected}")]
    MalformedOutput { expected: usize, found: usize },
    #[error("invalid path for agent {agent}: {reason}")]
    InvalidPath { agent: usize, reason: String },
}

impl From<std::io::Error> for SolverError {
    fn from(err: std::io::Error) -> Self {
        SolverError::Process(err.to_string())
    }
}

/// Exact solver over a [`SolveRequest`]. On success returns one sequence of
/// local node ids per agent, in request order.
pub trait ExactSolver {
    fn name(&self) -> &str;

    fn solve(
        &mut self,
        request: &SolveRequest,
        timeout: Duration,
    ) -> Result<Vec<Vec<usize>>, SolverError>;
}

impl<S: ExactSolver + ?Sized> ExactSolver for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn solve(
        &mut self,
        request: &SolveRequest,
        timeout: Duration,
    ) -> Result<Vec<Vec<usize>>, SolverError> {
        (**self).solve(request, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_avoided() {
        let request = SolveRequest {
            adjacency: vec![vec![1], vec![0]],
            agents: vec![(0, 1)],
            avoids: vec![vec![(1, 0), (1, 1)], vec![(0, 3)]],
            makespan: 3,
        };
        assert!(request.is_avoided(1, 1));
        assert!(request.is_avoided(0, 3));
        assert!(!request.is_avoided(0, 1));
        assert_eq!(request.num_nodes(), 2);
    }

    #[test]
    fn test_error_messages() {
        let err = SolverError::MalformedOutput {
            expected: 3,
            found: 1,
        };
        assert_eq!(err.to_string(), "solver returned 1 paths, expected 3");
        let err = SolverError::Infeasible { makespan: 4 };
        assert_eq!(err.to_string(), "no solution within makespan 4");
    }
}
