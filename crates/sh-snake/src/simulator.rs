//! Running the external game simulator.

use serde::{Deserialize, Serialize};
use sh_types::{config_error, HpoError, HpoResult, SimulationError};
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;

/// Command line that builds and runs the snork simulator.
pub const DEFAULT_SIMULATOR: &str = "cargo run --release --bin simulate --";

/// Opponent agent used when none is configured.
pub const DEFAULT_OPPONENT: &str = r#"{"Flood":{}}"#;

/// stderr lines kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Program and leading arguments of the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Directory the simulator runs in (the snake project for `cargo run`).
    pub working_dir: Option<PathBuf>,
}

impl SimulatorCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    /// Split a whitespace-separated command line. No shell quoting is applied.
    pub fn parse(command_line: &str) -> HpoResult<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| config_error!("simulator command is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Run one simulation and wait for it to exit.
    pub fn run(&self, request: &SimulationRequest) -> HpoResult<SimulationOutput> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(request.args())
            .stdin(Stdio::null());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        // Own process group: a terminal Ctrl-C reaches the driver only, which
        // then lets running simulations finish.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        debug!(program = %self.program, seed = ?request.seed, games = request.game_count, "Starting simulator");

        let start = Instant::now();
        let output = command.output().map_err(|e| SimulationError::Spawn {
            program: self.program.clone(),
            message: e.to_string(),
        })?;
        let wall_ms = start.elapsed().as_millis() as u64;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(SimulationError::Failed {
                status: output.status.to_string(),
                stderr: tail(&stderr, STDERR_TAIL_LINES),
            }
            .into());
        }

        Ok(SimulationOutput {
            stdout,
            stderr,
            wall_ms,
        })
    }
}

impl Default for SimulatorCommand {
    fn default() -> Self {
        // The default line is never empty.
        Self::parse(DEFAULT_SIMULATOR).unwrap_or_else(|_| Self::new("cargo", Vec::new()))
    }
}

impl FromStr for SimulatorCommand {
    type Err = HpoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SimulatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Arguments of one simulator invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRequest {
    /// Agent under evaluation.
    pub payload: serde_json::Value,
    /// JSON of the opponent agent.
    pub opponent: String,
    /// Number of opponent copies.
    pub opponents: usize,
    pub game_count: u64,
    /// Per-move timeout passed through to the simulator (0 = none).
    pub timeout: u64,
    pub seed: Option<u64>,
}

impl SimulationRequest {
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.opponents + 7);
        args.push(self.payload.to_string());
        args.extend(std::iter::repeat(self.opponent.clone()).take(self.opponents));
        args.push("--game-count".into());
        args.push(self.game_count.to_string());
        args.push("--timeout".into());
        args.push(self.timeout.to_string());
        if let Some(seed) = self.seed {
            args.push("--seed".into());
            args.push(seed.to_string());
        }
        args
    }
}

/// Captured output of a successful simulator run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutput {
    pub stdout: String,
    pub stderr: String,
    pub wall_ms: u64,
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(seed: Option<u64>) -> SimulationRequest {
        SimulationRequest {
            payload: json!({"Flood": {"health": 0.5}}),
            opponent: DEFAULT_OPPONENT.to_string(),
            opponents: 2,
            game_count: 100,
            timeout: 0,
            seed,
        }
    }

    fn shell(script: &str) -> SimulatorCommand {
        SimulatorCommand::new("/bin/sh", vec!["-c".into(), script.into(), "simulate".into()])
    }

    #[test]
    fn default_command_runs_cargo() {
        let command = SimulatorCommand::default();
        assert_eq!(command.program, "cargo");
        assert_eq!(command.args, ["run", "--release", "--bin", "simulate", "--"]);
        assert_eq!(command.to_string(), DEFAULT_SIMULATOR);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(SimulatorCommand::parse("   ").is_err());
    }

    #[test]
    fn request_arguments() {
        let args = request(Some(42)).args();
        assert_eq!(
            args,
            [
                r#"{"Flood":{"health":0.5}}"#,
                r#"{"Flood":{}}"#,
                r#"{"Flood":{}}"#,
                "--game-count",
                "100",
                "--timeout",
                "0",
                "--seed",
                "42",
            ]
        );
        assert!(!request(None).args().contains(&"--seed".to_string()));
    }

    #[test]
    fn arguments_reach_the_process_unquoted() {
        let output = shell(r#"printf '%s\n' "$@""#).run(&request(Some(7))).unwrap();
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines[0], r#"{"Flood":{"health":0.5}}"#);
        assert_eq!(lines.last(), Some(&"7"));
    }

    #[test]
    fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = shell("pwd")
            .with_working_dir(dir.path())
            .run(&request(None))
            .unwrap();
        let expected = dir.path().canonicalize().unwrap();
        let actual = std::path::Path::new(output.stdout.trim()).canonicalize().unwrap();
        assert_eq!(actual, expected);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn simulator_leads_its_own_process_group() {
        // Field 5 of /proc/<pid>/stat is the process group id.
        let output = shell(r#"echo "$$ $(cut -d' ' -f5 /proc/$$/stat)""#)
            .run(&request(None))
            .unwrap();
        let ids: Vec<&str> = output.stdout.split_whitespace().collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);

        let own = std::fs::read_to_string("/proc/self/stat").unwrap();
        let own_group = own.rsplit(')').next().unwrap().split_whitespace().nth(2).unwrap();
        assert_ne!(own_group, ids[1]);
    }

    #[test]
    fn non_zero_exit_is_a_failure() {
        let err = shell("echo 'thread main panicked' >&2; exit 101")
            .run(&request(None))
            .unwrap_err();
        match err {
            HpoError::Simulation(SimulationError::Failed { stderr, .. }) => {
                assert!(stderr.contains("panicked"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = SimulatorCommand::new("/nonexistent/simulate", Vec::new())
            .run(&request(None))
            .unwrap_err();
        assert!(matches!(err, HpoError::Simulation(SimulationError::Spawn { .. })));
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let text = (0..30).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let kept = tail(&text, 3);
        assert_eq!(kept, "27\n28\n29");
    }
}
