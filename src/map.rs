use anyhow::{anyhow, bail, Context, Result};
use std::fs;

use crate::common::Position;

#[derive(Debug, Clone)]
pub struct Tile {
    passable: bool,
    pub neighbors: Vec<Position>, // Stores coordinates of accessible neighbors
}

impl Tile {
    pub fn is_passable(&self) -> bool {
        self.passable
    }
}

#[derive(Debug, Clone)]
pub struct Map {
    pub height: usize,
    pub width: usize,
    pub grid: Vec<Vec<Tile>>,
}

impl Map {
    /// Reads a MovingAI `.map` file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read map file {path}"))?;
        Self::parse(&content).with_context(|| format!("malformed map file {path}"))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content.lines();

        let _type = lines.next().ok_or_else(|| anyhow!("missing type line"))?;
        let height = Self::parse_header(lines.next(), "height")?;
        let width = Self::parse_header(lines.next(), "width")?;
        let _map = lines.next().ok_or_else(|| anyhow!("missing map line"))?;

        let rows: Vec<&str> = lines.take(height).collect();
        if rows.len() != height {
            bail!("expected {height} rows, found {}", rows.len());
        }
        if let Some((row, line)) = rows
            .iter()
            .enumerate()
            .find(|(_, line)| line.chars().count() != width)
        {
            bail!("row {row} has width {}, expected {width}", line.chars().count());
        }

        Ok(Self::from_rows(&rows))
    }

    fn parse_header(line: Option<&str>, key: &str) -> Result<usize> {
        let line = line.ok_or_else(|| anyhow!("missing {key} line"))?;
        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next()) {
            (Some(name), Some(value)) if name == key => value
                .parse::<usize>()
                .with_context(|| format!("invalid {key} value {value:?}")),
            _ => bail!("expected `{key} <n>`, found {line:?}"),
        }
    }

    /// Builds a map from raw rows; `.`, `G` and `S` are passable, anything else blocked.
    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> Self {
        let height = rows.len();
        let width = rows
            .iter()
            .map(|row| row.as_ref().chars().count())
            .max()
            .unwrap_or(0);

        let grid = rows
            .iter()
            .map(|row| {
                let mut tiles: Vec<Tile> = row
                    .as_ref()
                    .chars()
                    .map(|ch| Tile {
                        passable: matches!(ch, '.' | 'G' | 'S'),
                        neighbors: Vec::new(),
                    })
                    .collect();
                tiles.resize(
                    width,
                    Tile {
                        passable: false,
                        neighbors: Vec::new(),
                    },
                );
                tiles
            })
            .collect();

        let mut map = Map {
            height,
            width,
            grid,
        };
        map.initialize_neighbors();
        map
    }

    fn initialize_neighbors(&mut self) {
        for x in 0..self.height {
            for y in 0..self.width {
                if self.grid[x][y].passable {
                    self.grid[x][y].neighbors = self.get_neighbors(x, y);
                }
            }
        }
    }

    pub fn get_neighbors(&self, x: usize, y: usize) -> Vec<Position> {
        let directions = [(-1, 0), (1, 0), (0, -1), (0, 1)]; // Up, down, left, right
        let mut neighbors = Vec::new();

        for &(dx, dy) in &directions {
            let new_x = x as i64 + dx;
            let new_y = y as i64 + dy;
            if new_x >= 0
                && new_y >= 0
                && new_x < self.height as i64
                && new_y < self.width as i64
                && self.grid[new_x as usize][new_y as usize].passable
            {
                neighbors.push((new_x as usize, new_y as usize));
            }
        }

        neighbors
    }

    /// Precomputed free neighbours of a free cell; empty for blocked or out-of-bounds cells.
    pub fn neighbors(&self, position: Position) -> &[Position] {
        if self.is_free(position) {
            self.grid[position.0][position.1].neighbors.as_slice()
        } else {
            &[]
        }
    }

    pub fn is_passable(&self, x: usize, y: usize) -> bool {
        self.grid[x][y].is_passable()
    }

    pub fn is_free(&self, position: Position) -> bool {
        position.0 < self.height
            && position.1 < self.width
            && self.is_passable(position.0, position.1)
    }

    pub fn are_adjacent(&self, a: Position, b: Position) -> bool {
        self.neighbors(a).contains(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_map() {
        let content = "type octile\nheight 3\nwidth 4\nmap\n@@@@\n@..@\n@.@@\n";
        let map = Map::parse(content).unwrap();

        assert_eq!(map.height, 3);
        assert_eq!(map.width, 4);

        assert!(!map.is_passable(0, 0));
        assert!(!map.is_passable(1, 0));
        assert!(map.is_passable(1, 1));

        let neighbors = map.get_neighbors(1, 1);
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.contains(&(2, 1)));
        assert!(neighbors.contains(&(1, 2)));
    }

    #[test]
    fn test_rejects_short_rows() {
        let content = "type octile\nheight 2\nwidth 3\nmap\n...\n..\n";
        assert!(Map::parse(content).is_err());
    }

    #[test]
    fn test_neighbors_of_blocked_cell_are_empty() {
        let map = Map::from_rows(&[".@.", "..."]);
        assert!(map.neighbors((0, 1)).is_empty());
        assert!(map.neighbors((5, 5)).is_empty());
        assert_eq!(map.neighbors((0, 0)).to_vec(), vec![(1, 0)]);
        assert!(map.are_adjacent((1, 1), (1, 2)));
        assert!(!map.are_adjacent((0, 0), (0, 2)));
    }
}
