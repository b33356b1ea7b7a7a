use crate::orchestrator::{ResolveOptions, SearchKind};

use anyhow::{anyhow, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Parser, Debug, Default)]
#[command(
    name = "mapf-combined",
    about = "Multi-agent path finding: fast initial search plus local exact repair.",
    version = "1.0"
)]
pub struct Cli {
    #[arg(long, help = "Path to a YAML config file; flags override its values")]
    pub config: Option<String>,

    #[arg(long, help = "Path to the MovingAI map file")]
    pub map_path: Option<String>,

    #[arg(long, help = "Path to the MovingAI scenario file")]
    pub scen_path: Option<String>,

    #[arg(long, help = "Where to write the report (.json for JSON, YAML otherwise)")]
    pub output_path: Option<String>,

    #[arg(long, help = "Number of agents")]
    pub num_agents: Option<usize>,

    #[arg(long, help = "Pick agents at random instead of the first rows")]
    pub random_agents: Option<bool>,

    #[arg(long, help = "Seed for the random number generator")]
    pub seed: Option<u64>,

    #[arg(long, help = "Initial planner: standard or congestion")]
    pub search: Option<String>,

    #[arg(long, help = "Exact solver: cbs or picat")]
    pub solver: Option<String>,

    #[arg(long, help = "Wall-clock budget for conflict resolution, in seconds")]
    pub time_budget_secs: Option<u64>,

    #[arg(long, help = "Timeout of a single exact solver call, in milliseconds")]
    pub solver_timeout_ms: Option<u64>,

    #[arg(long, help = "Failures after which a conflict is given up")]
    pub max_retries: Option<usize>,

    #[arg(long, help = "Program used by the picat solver")]
    pub picat_program: Option<String>,

    #[arg(long, help = "Default log filter, RUST_LOG takes precedence")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub map_path: String,
    pub scen_path: String,
    pub output_path: String,
    pub num_agents: usize,
    pub random_agents: bool,
    pub seed: u64,
    pub search: String,
    pub solver: String,
    pub time_budget_secs: u64,
    pub solver_timeout_ms: u64,
    pub max_retries: usize,
    pub min_radius: usize,
    pub min_submap_size: usize,
    pub trailing_steps: usize,
    pub repeat_radius_factor: usize,
    pub retry_makespan_factor: usize,
    pub retry_cap: usize,
    pub picat_program: String,
    pub picat_args: Vec<String>,
    pub instance_path: String,
    pub picat_header_lines: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            map_path: "map_file/maze-32-32-2/maze-32-32-2.map".to_string(),
            scen_path: "map_file/maze-32-32-2/maze-32-32-2-random-1.scen".to_string(),
            output_path: "result/result.yaml".to_string(),
            num_agents: 30,
            random_agents: false,
            seed: 0,
            search: "congestion".to_string(),
            solver: "cbs".to_string(),
            time_budget_secs: 200,
            solver_timeout_ms: 10_000,
            max_retries: 30,
            min_radius: 2,
            min_submap_size: 10,
            trailing_steps: 3,
            repeat_radius_factor: 3,
            retry_makespan_factor: 4,
            retry_cap: 10,
            picat_program: "picat".to_string(),
            picat_args: Vec::new(),
            instance_path: "mapf_instance.pi".to_string(),
            picat_header_lines: 9,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn override_from_command_line(mut self, cli: &Cli) -> anyhow::Result<Self> {
        if let Some(map_path) = &cli.map_path {
            self.map_path = map_path.clone();
        }
        if let Some(scen_path) = &cli.scen_path {
            self.scen_path = scen_path.clone();
        }
        if let Some(output_path) = &cli.output_path {
            self.output_path = output_path.clone();
        }
        if let Some(num_agents) = cli.num_agents {
            self.num_agents = num_agents;
        }
        if let Some(random_agents) = cli.random_agents {
            self.random_agents = random_agents;
        }
        if let Some(seed) = cli.seed {
            self.seed = seed;
        }
        if let Some(search) = &cli.search {
            self.search = search.clone();
        }
        if let Some(solver) = &cli.solver {
            self.solver = solver.clone();
        }
        if let Some(time_budget_secs) = cli.time_budget_secs {
            self.time_budget_secs = time_budget_secs;
        }
        if let Some(solver_timeout_ms) = cli.solver_timeout_ms {
            self.solver_timeout_ms = solver_timeout_ms;
        }
        if let Some(max_retries) = cli.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(picat_program) = &cli.picat_program {
            self.picat_program = picat_program.clone();
        }
        if let Some(log_level) = &cli.log_level {
            self.log_level = log_level.clone();
        }

        self.validate()
            .context("invalid configuration after applying command line")?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.search_kind()?;
        match self.solver.as_str() {
            "cbs" | "picat" => {}
            other => return Err(anyhow!("unknown solver {other:?}, expected cbs or picat")),
        }
        if self.num_agents == 0 {
            return Err(anyhow!("num_agents must be at least 1"));
        }
        if self.time_budget_secs == 0 || self.solver_timeout_ms == 0 {
            return Err(anyhow!(
                "time budget and solver timeout must be positive, got {}s and {}ms",
                self.time_budget_secs,
                self.solver_timeout_ms
            ));
        }
        if self.min_submap_size == 0 {
            return Err(anyhow!("min_submap_size must be at least 1"));
        }
        if self.solver == "picat" && self.picat_program.trim().is_empty() {
            return Err(anyhow!("picat solver selected but picat_program is empty"));
        }
        Ok(())
    }

    pub fn search_kind(&self) -> anyhow::Result<SearchKind> {
        match self.search.as_str() {
            "standard" => Ok(SearchKind::Standard),
            "congestion" => Ok(SearchKind::Congestion),
            other => Err(anyhow!(
                "unknown search {other:?}, expected standard or congestion"
            )),
        }
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            time_budget: Duration::from_secs(self.time_budget_secs),
            solver_timeout: Duration::from_millis(self.solver_timeout_ms),
            max_retries: self.max_retries,
            min_radius: self.min_radius,
            min_submap_size: self.min_submap_size,
            trailing_steps: self.trailing_steps,
            repeat_radius_factor: self.repeat_radius_factor,
            retry_makespan_factor: self.retry_makespan_factor,
            retry_cap: self.retry_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_resolve_options() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolve_options(), ResolveOptions::default());
        assert_eq!(config.search_kind().unwrap(), SearchKind::Congestion);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "num_agents: 5\nsolver: picat\npicat_args: [\"-s\", \"1000\"]\n";
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.num_agents, 5);
        assert_eq!(config.solver, "picat");
        assert_eq!(config.picat_args, vec!["-s", "1000"]);
        assert_eq!(config.max_retries, 30);
    }

    #[test]
    fn test_unknown_yaml_key_is_rejected() {
        assert!(Config::from_yaml_str("num_agent: 5\n").is_err());
    }

    #[test]
    fn test_command_line_overrides_file() {
        let config = Config::from_yaml_str("num_agents: 5\nsearch: standard\n").unwrap();
        let cli = Cli {
            num_agents: Some(12),
            seed: Some(7),
            ..Cli::default()
        };
        let config = config.override_from_command_line(&cli).unwrap();
        assert_eq!(config.num_agents, 12);
        assert_eq!(config.seed, 7);
        assert_eq!(config.search_kind().unwrap(), SearchKind::Standard);
    }

    #[test]
    fn test_validation() {
        let cli = Cli {
            solver: Some("ecbs".to_string()),
            ..Cli::default()
        };
        assert!(Config::default().override_from_command_line(&cli).is_err());

        let config = Config {
            search: "dijkstra".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            time_budget_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "mapf-combined",
            "--num-agents",
            "3",
            "--random-agents",
            "true",
            "--solver",
            "cbs",
        ])
        .unwrap();
        assert_eq!(cli.num_agents, Some(3));
        assert_eq!(cli.random_agents, Some(true));
        assert_eq!(cli.solver.as_deref(), Some("cbs"));
        assert!(cli.config.is_none());
    }
}
