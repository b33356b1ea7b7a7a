use crate::common::Position;
use crate::map::Map;

use std::collections::HashMap;

/// Small induced subgraph of the grid with dense local ids.
#[derive(Debug, Clone, Default)]
pub struct LocalGraph {
    to_local: HashMap<Position, usize>,
    to_global: Vec<Position>,
    adjacency: Vec<Vec<usize>>,
}

impl LocalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local id of `position`, allocating the next id when it is new.
    pub fn insert(&mut self, position: Position) -> usize {
        if let Some(&id) = self.to_local.get(&position) {
            return id;
        }
        let id = self.to_global.len();
        self.to_local.insert(position, id);
        self.to_global.push(position);
        self.adjacency.push(Vec::new());
        id
    }

    pub fn connect(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        if !self.adjacency[a].contains(&b) {
            self.adjacency[a].push(b);
        }
        if !self.adjacency[b].contains(&a) {
            self.adjacency[b].push(a);
        }
    }

    /// Adds `position` and `neighbors`, linking each neighbour to it.
    pub fn add_with_neighbors(&mut self, position: Position, neighbors: &[Position]) {
        let id = self.insert(position);
        for neighbor in neighbors {
            let neighbor_id = self.insert(*neighbor);
            self.connect(id, neighbor_id);
        }
    }

    /// Adds every grid edge whose endpoints are both in the graph.
    pub fn close(&mut self, map: &Map) {
        for id in 0..self.to_global.len() {
            let position = self.to_global[id];
            for neighbor in map.neighbors(position) {
                if let Some(&neighbor_id) = self.to_local.get(neighbor) {
                    self.connect(id, neighbor_id);
                }
            }
        }
    }

    pub fn local(&self, position: Position) -> Option<usize> {
        self.to_local.get(&position).copied()
    }

    pub fn global(&self, id: usize) -> Option<Position> {
        self.to_global.get(id).copied()
    }

    pub fn contains(&self, position: Position) -> bool {
        self.to_local.contains_key(&position)
    }

    pub fn neighbors(&self, id: usize) -> &[usize] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn positions(&self) -> &[Position] {
        &self.to_global
    }

    pub fn adjacency(&self) -> &[Vec<usize>] {
        &self.adjacency
    }

    pub fn len(&self) -> usize {
        self.to_global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_global.is_empty()
    }
}
