mod astar;
mod usage;

pub use astar::a_star_search;
pub use usage::EdgeUsage;

use std::collections::HashMap;

use crate::common::{Path, Position};

fn construct_path(predecessors: &HashMap<Position, Position>, mut current: Position) -> Path {
    let mut path = vec![current];
    while let Some(&previous) = predecessors.get(&current) {
        path.push(previous);
        current = previous;
    }
    path.reverse();
    path
}

/// Rank of every value among the distinct values, ascending (equal values share a rank).
fn bucket_ranks(values: &[usize]) -> Vec<usize> {
    let mut distinct = values.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    values
        .iter()
        .map(|value| distinct.partition_point(|bucket| bucket < value))
        .collect()
}
