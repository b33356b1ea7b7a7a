use mapf_combined::config::{Cli, Config};
use mapf_combined::map::Map;
use mapf_combined::orchestrator::{CombinedSolver, Outcome};
use mapf_combined::scenario::{verify_agents, Scenario};
use mapf_combined::solver::{CbsSolver, ExactSolver, PicatSolver};
use mapf_combined::stat::Stats;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct Report<'a> {
    map: &'a str,
    scenario: &'a str,
    solver: &'a str,
    search: &'a str,
    stats: &'a Stats,
    outcome: &'a Outcome,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_file) = cli.config.as_ref() {
        let config_str = fs::read_to_string(config_file)
            .with_context(|| format!("failed to read config file {config_file}"))?;
        Config::from_yaml_str(&config_str)
            .with_context(|| format!("error with config file: {config_file}"))?
    } else {
        Config::default()
    }
    .override_from_command_line(&cli)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    if cli.config.is_none() {
        info!("No config file specified, using default config");
    }

    let map = Map::from_file(&config.map_path)?;
    let scenario = Scenario::load_from_scen(&config.scen_path)?;
    if scenario.map_height != map.height || scenario.map_width != map.width {
        warn!(
            "scenario expects a {}x{} map, loaded {}x{}",
            scenario.map_width, scenario.map_height, map.width, map.height
        );
    }
    let agents = scenario.generate_agents(config.num_agents, config.random_agents, config.seed)?;
    verify_agents(&agents, &map).context("scenario does not fit the map")?;

    let solver: Box<dyn ExactSolver> = match config.solver.as_str() {
        "picat" => Box::new(PicatSolver::new(
            config.picat_program.clone(),
            config.picat_args.clone(),
            config.instance_path.clone(),
            config.picat_header_lines,
        )?),
        _ => Box::new(CbsSolver::new()),
    };
    info!("repairing with the {} solver", solver.name());

    let mut combined = CombinedSolver::new(&map, agents, solver, config.resolve_options())?;
    let outcome = combined.run(config.search_kind()?);
    combined.stats().print();

    let report = Report {
        map: &config.map_path,
        scenario: &config.scen_path,
        solver: &config.solver,
        search: &config.search,
        stats: combined.stats(),
        outcome: &outcome,
    };
    write_report(Path::new(&config.output_path), &report)?;
    info!("report written to {}", config.output_path);

    Ok(())
}

fn write_report(path: &Path, report: &Report) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let content = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::to_string_pretty(report)?
    } else {
        serde_yaml::to_string(report)?
    };
    fs::write(path, content).with_context(|| format!("failed to write report {}", path.display()))
}
