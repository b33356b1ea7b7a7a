use std::collections::HashMap;

use crate::common::Position;

/// Directed edge traversal counts over all paths planned so far.
#[derive(Debug, Clone, Default)]
pub struct EdgeUsage {
    counts: HashMap<(Position, Position), usize>,
}

impl EdgeUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, path: &[Position]) {
        for step in path.windows(2) {
            *self.counts.entry((step[0], step[1])).or_default() += 1;
        }
    }

    pub fn count(&self, from: Position, to: Position) -> usize {
        self.counts.get(&(from, to)).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_directed_and_accumulate() {
        let mut usage = EdgeUsage::new();
        usage.record(&[(0, 0), (0, 1), (0, 2)]);
        usage.record(&[(0, 0), (0, 1)]);

        assert_eq!(usage.count((0, 0), (0, 1)), 2);
        assert_eq!(usage.count((0, 1), (0, 0)), 0);
        assert_eq!(usage.count((0, 1), (0, 2)), 1);
        assert_eq!(usage.len(), 2);
    }

    #[test]
    fn test_single_position_path_records_nothing() {
        let mut usage = EdgeUsage::new();
        usage.record(&[(3, 3)]);
        usage.record(&[]);
        assert!(usage.is_empty());
    }
}
