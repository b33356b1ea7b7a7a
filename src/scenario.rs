use crate::common::{Agent, Position};
use crate::map::Map;

use anyhow::{anyhow, bail, Context};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use tracing::{debug, info};

/// One row of a MovingAI scenario file.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub bucket: usize,
    pub start: Position,
    pub goal: Position,
    pub optimal_length: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub map: String,
    pub map_width: usize,
    pub map_height: usize,
    pub routes: Vec<Route>,
}

impl Scenario {
    pub fn load_from_scen(path: &str) -> anyhow::Result<Scenario> {
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read scenario {path}"))?;
        Self::parse(&content).with_context(|| format!("failed to parse scenario {path}"))
    }

    /// Parses `version` followed by `bucket map width height sx sy gx gy optimal` rows.
    pub fn parse(content: &str) -> anyhow::Result<Scenario> {
        let mut lines = content.lines().enumerate();
        match lines.next() {
            Some((_, header)) if header.trim_start().starts_with("version") => {}
            Some((_, header)) => bail!("expected a version line, found {header:?}"),
            None => bail!("scenario is empty"),
        }

        let mut scenario = Scenario::default();
        for (index, line) in lines {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.is_empty() {
                continue;
            }
            if parts.len() < 8 {
                bail!("line {}: expected at least 8 fields, found {}", index + 1, parts.len());
            }
            let field = |i: usize| -> anyhow::Result<usize> {
                parts[i]
                    .parse()
                    .with_context(|| format!("line {}: bad field {:?}", index + 1, parts[i]))
            };

            // Scenario columns are x then y, positions are (row = y, col = x).
            let route = Route {
                bucket: field(0)?,
                start: (field(5)?, field(4)?),
                goal: (field(7)?, field(6)?),
                optimal_length: parts.get(8).and_then(|s| s.parse().ok()).unwrap_or(0.0),
            };

            if scenario.map.is_empty() {
                scenario.map = parts[1].to_string();
                scenario.map_width = field(2)?;
                scenario.map_height = field(3)?;
            }
            scenario.routes.push(route);
        }

        debug!("scenario for {} with {} routes", scenario.map, scenario.routes.len());
        Ok(scenario)
    }

    /// Takes the first `num_agents` routes in file order.
    pub fn first_agents(&self, num_agents: usize) -> anyhow::Result<Vec<Agent>> {
        if self.routes.len() < num_agents {
            bail!(
                "scenario has {} routes, {num_agents} agents requested",
                self.routes.len()
            );
        }
        let agents = self
            .routes
            .iter()
            .take(num_agents)
            .enumerate()
            .map(|(id, route)| Agent::new(id, route.start, route.goal))
            .collect();
        Ok(agents)
    }

    /// Samples `num_agents` distinct routes with a seeded generator.
    pub fn random_agents(&self, num_agents: usize, seed: u64) -> anyhow::Result<Vec<Agent>> {
        if self.routes.len() < num_agents {
            bail!(
                "not enough routes for {num_agents} agents, scenario has {}",
                self.routes.len()
            );
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let agents = self
            .routes
            .choose_multiple(&mut rng, num_agents)
            .enumerate()
            .map(|(id, route)| Agent::new(id, route.start, route.goal))
            .collect();
        Ok(agents)
    }

    pub fn generate_agents(
        &self,
        num_agents: usize,
        random: bool,
        seed: u64,
    ) -> anyhow::Result<Vec<Agent>> {
        let agents = if random {
            self.random_agents(num_agents, seed)?
        } else {
            self.first_agents(num_agents)?
        };
        info!("selected {} agents from {}", agents.len(), self.map);
        Ok(agents)
    }
}

/// Checks that every agent starts and ends on a passable cell of `map`.
pub fn verify_agents(agents: &[Agent], map: &Map) -> anyhow::Result<()> {
    for agent in agents {
        for (label, position) in [("start", agent.start), ("goal", agent.goal)] {
            if !map.is_free(position) {
                return Err(anyhow!(
                    "agent {} has a blocked {label} {position:?}",
                    agent.id
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCEN: &str = "version 1\n\
        0\tgrid.map\t4\t3\t0\t1\t3\t1\t3\n\
        1\tgrid.map\t4\t3\t3\t0\t0\t2\t5.0\n\
        1\tgrid.map\t4\t3\t1\t2\t2\t0\t3.0\n";

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::parse(SCEN).unwrap();
        assert_eq!(scenario.map, "grid.map");
        assert_eq!((scenario.map_width, scenario.map_height), (4, 3));
        assert_eq!(scenario.routes.len(), 3);
        assert_eq!(scenario.routes[0].start, (1, 0));
        assert_eq!(scenario.routes[0].goal, (1, 3));
        assert_eq!(scenario.routes[1].bucket, 1);
        assert_eq!(scenario.routes[1].optimal_length, 5.0);
    }

    #[test]
    fn test_first_agents() {
        let scenario = Scenario::parse(SCEN).unwrap();
        let agents = scenario.first_agents(2).unwrap();
        assert_eq!(
            agents,
            vec![Agent::new(0, (1, 0), (1, 3)), Agent::new(1, (0, 3), (2, 0))]
        );
        assert!(scenario.first_agents(4).is_err());
    }

    #[test]
    fn test_random_agents_are_seeded() {
        let scenario = Scenario::parse(SCEN).unwrap();
        let first = scenario.random_agents(2, 7).unwrap();
        let second = scenario.random_agents(2, 7).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_ne!(first[0].start, first[1].start);
        assert!(first.iter().enumerate().all(|(i, agent)| agent.id == i));
    }

    #[test]
    fn test_malformed_scenarios() {
        assert!(Scenario::parse("").is_err());
        assert!(Scenario::parse("0 grid.map 4 3 0 1 3 1 3\n").is_err());
        assert!(Scenario::parse("version 1\n0 grid.map 4 3 0 1\n").is_err());
        assert!(Scenario::parse("version 1\n0 grid.map 4 3 a 1 3 1 3\n").is_err());
    }

    #[test]
    fn test_verify_agents() {
        let map = Map::from_rows(&["....", ".@..", "...."]);
        assert!(verify_agents(&[Agent::new(0, (0, 0), (2, 3))], &map).is_ok());
        assert!(verify_agents(&[Agent::new(0, (0, 0), (1, 1))], &map).is_err());
    }
}
