pub mod algorithm;
pub mod common;
pub mod config;
pub mod detector;
pub mod map;
pub mod orchestrator;
pub mod scenario;
pub mod solver;
pub mod stat;
pub mod subproblem;
