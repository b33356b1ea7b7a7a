use super::{ExactSolver, SolveRequest, SolverError};

use anyhow::Context;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::Runtime;
use tracing::{debug, instrument, warn};

/// Runs an external Picat MAPF program on an instance file.
///
/// The instance is written to `instance_path` and passed as the last
/// argument. Node ids are 1-based on both sides of the boundary.
pub struct PicatSolver {
    program: String,
    args: Vec<String>,
    instance_path: PathBuf,
    header_lines: usize,
    runtime: Runtime,
}

impl PicatSolver {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        instance_path: impl Into<PathBuf>,
        header_lines: usize,
    ) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build runtime for the solver process")?;
        Ok(PicatSolver {
            program: program.into(),
            args,
            instance_path: instance_path.into(),
            header_lines,
            runtime,
        })
    }

    async fn run(&self, timeout: Duration) -> Result<String, SolverError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&self.instance_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(SolverError::Process(format!(
                    "failed to run {}: {err}",
                    self.program
                )))
            }
            Err(_) => return Err(SolverError::Timeout(timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SolverError::Process(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ExactSolver for PicatSolver {
    fn name(&self) -> &str {
        "picat"
    }

    #[instrument(skip_all, name = "picat", fields(agents = request.agents.len(), makespan = request.makespan), level = "debug")]
    fn solve(
        &mut self,
        request: &SolveRequest,
        timeout: Duration,
    ) -> Result<Vec<Vec<usize>>, SolverError> {
        std::fs::write(&self.instance_path, write_instance(request))?;
        debug!("instance written to {}", self.instance_path.display());

        let stdout = self.runtime.block_on(self.run(timeout))?;
        parse_output(&stdout, self.header_lines, request.agents.len())
    }
}

/// Renders `request` as an `ins(Graph, As, Avoid, Makespan, SumOfCosts)` fact.
///
/// `Avoid` has `makespan + 1` rows, one per step of a path including its
/// start, so `Avoid[t, a]` is the node outside agent `a` holds at step
/// `t - 1`. A `Makespan`-row array would drop the final step, where an
/// outside agent still parked on a local destination must be seen.
pub(crate) fn write_instance(request: &SolveRequest) -> String {
    let mut out = String::from("ins(Graph, As, Avoid, Makespan, SumOfCosts) =>\n");
    out.push_str("    Graph = [\n");
    let rows: Vec<String> = request
        .adjacency
        .iter()
        .enumerate()
        .map(|(node, neighbors)| {
            let ids: Vec<String> = std::iter::once(node)
                .chain(neighbors.iter().copied())
                .map(|id| (id + 1).to_string())
                .collect();
            format!("    $neibs({},[{}])", node + 1, ids.join(","))
        })
        .collect();
    out.push_str(&rows.join(",\n"));
    out.push_str("\n    ],\n");

    let agents: Vec<String> = request
        .agents
        .iter()
        .map(|(origin, destination)| format!("({},{})", origin + 1, destination + 1))
        .collect();
    let _ = writeln!(out, "    As = [{}],", agents.join(","));

    // One column per outside agent; 0 marks a free step.
    if request.avoids.is_empty() {
        out.push_str("    Avoid = new_array(0,0),\n");
    } else {
        let steps = request.makespan + 1;
        let _ = writeln!(out, "    Avoid = new_array({},{}),", steps, request.avoids.len());
        for (column, run) in request.avoids.iter().enumerate() {
            let mut row = vec![0; steps];
            for &(node, step) in run {
                if step < steps {
                    row[step] = node + 1;
                }
            }
            for (step, node) in row.iter().enumerate() {
                let _ = writeln!(out, "    Avoid[{},{}] = {},", step + 1, column + 1, node);
            }
        }
    }

    let _ = writeln!(out, "    Makespan = {},", request.makespan);
    out.push_str("    SumOfCosts = -1.");
    out
}

/// Skips `header_lines`, then reads one line of node ids per agent.
pub(crate) fn parse_output(
    stdout: &str,
    header_lines: usize,
    agents: usize,
) -> Result<Vec<Vec<usize>>, SolverError> {
    let lines: Vec<&str> = stdout
        .lines()
        .skip(header_lines)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.len() < agents {
        warn!("solver produced {} path lines for {agents} agents", lines.len());
        return Err(SolverError::MalformedOutput {
            expected: agents,
            found: lines.len(),
        });
    }

    lines
        .iter()
        .take(agents)
        .enumerate()
        .map(|(agent, line)| {
            line.split(|c: char| c.is_whitespace() || c == ',' || c == '[' || c == ']')
                .filter(|token| !token.is_empty())
                .map(|token| match token.parse::<usize>() {
                    Ok(id) if id > 0 => Ok(id - 1),
                    _ => Err(SolverError::InvalidPath {
                        agent,
                        reason: format!("unexpected token {token:?}"),
                    }),
                })
                .collect()
        })
        .collect()
}
