//! Command-line flags and the run configuration derived from them.

use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use sh_optimizer::HyperbandSettings;
use sh_snake::{
    AgentVariant, EvaluationSettings, FailurePolicy, ReportFormat, SimulatorCommand,
    DEFAULT_OPPONENT, DEFAULT_SEEDS, DEFAULT_SIMULATOR, MAX_OPPONENTS,
};
use sh_types::{config_error, HpoResult};
use std::path::PathBuf;
use tracing::Level;

/// Search backend driving the optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Successive halving with differential evolution over game budgets.
    #[value(alias = "dehb")]
    Hyperband,
    /// Surrogate-model search at the full budget.
    #[value(alias = "smac")]
    Bayesian,
    /// Uniform random sampling at the full budget.
    Random,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Hyperband => "hyperband",
            Backend::Bayesian => "bayesian",
            Backend::Random => "random",
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "snork-hpo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tune the parameters of the snork snake agent", long_about = None)]
pub struct Args {
    /// Optimizer backend
    #[arg(long, value_enum, default_value_t = Backend::Hyperband)]
    pub optimizer: Backend,

    /// Agent variants to include in the search
    #[arg(long, num_args = 1.., default_values_t = [AgentVariant::Flood])]
    pub agents: Vec<AgentVariant>,

    /// Games per seed at the maximum budget
    #[arg(long, default_value_t = 1000)]
    pub games_per_eval: u64,

    /// Per-move timeout handed to the simulator (0 disables it)
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Maximum number of evaluations (0 = unlimited)
    #[arg(long, default_value_t = 10000)]
    pub runcount_limit: usize,

    /// Wall-clock limit in seconds (0 = unlimited)
    #[arg(long, default_value_t = 36000)]
    pub walltime: u64,

    /// Parallel evaluations
    #[arg(short = 'j', long, default_value_t = 8)]
    pub jobs: usize,

    /// Directory for run histories
    #[arg(short, long, default_value = "./optim_output")]
    pub output_dir: PathBuf,

    /// Number of opponents per game
    #[arg(long, default_value_t = 1)]
    pub opponents: usize,

    /// JSON of the opponent agent
    #[arg(long, default_value = DEFAULT_OPPONENT)]
    pub opponent: String,

    /// Simulator seeds, comma separated
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_SEEDS)]
    pub seeds: Vec<u64>,

    /// Run the simulator once per evaluation without a seed
    #[arg(long, conflicts_with = "seeds")]
    pub unseeded: bool,

    /// Seed of the search backend
    #[arg(long, default_value_t = 42)]
    pub random_state: u64,

    /// Simulator command line
    #[arg(long, env = "SNORK_SIMULATOR", default_value = DEFAULT_SIMULATOR)]
    pub simulator: SimulatorCommand,

    /// Working directory of the simulator
    #[arg(long, env = "SNORK_DIR")]
    pub snake_dir: Option<PathBuf>,

    /// Format of the simulator output
    #[arg(long, default_value_t = ReportFormat::Native)]
    pub report_format: ReportFormat,

    /// What to do when a simulation fails (abort, worst)
    #[arg(long, default_value_t = FailurePolicy::Abort)]
    pub on_failure: FailurePolicy,

    /// Smallest budget of the hyperband backend
    #[arg(long, default_value_t = 1.0)]
    pub min_budget: f64,

    /// Full budget; every backend evaluates its incumbent here
    #[arg(long, default_value_t = 2.0)]
    pub max_budget: f64,

    /// Budget reduction factor between hyperband rungs
    #[arg(long, default_value_t = 2.0)]
    pub eta: f64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json: bool,
}

impl Args {
    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    /// Check the flags and turn them into a [`TuneConfig`].
    pub fn into_config(self) -> HpoResult<TuneConfig> {
        if self.jobs == 0 {
            return Err(config_error!("--jobs must be at least 1"));
        }
        if !(1..=MAX_OPPONENTS).contains(&self.opponents) {
            return Err(config_error!(
                "--opponents must be between 1 and {MAX_OPPONENTS}, got {}",
                self.opponents
            ));
        }

        let hyperband = HyperbandSettings::default()
            .with_budgets(self.min_budget, self.max_budget)
            .with_eta(self.eta);
        hyperband.validate()?;

        let evaluation = EvaluationSettings {
            opponents: self.opponents,
            games_per_eval: self.games_per_eval,
            timeout: self.timeout,
            seeds: if self.unseeded { Vec::new() } else { self.seeds },
            format: self.report_format,
            failure_policy: self.on_failure,
            max_budget: self.max_budget,
            opponent: self.opponent,
        };
        evaluation.validate()?;

        let simulator = match self.snake_dir {
            Some(dir) => self.simulator.with_working_dir(dir),
            None => self.simulator,
        };

        Ok(TuneConfig {
            backend: self.optimizer,
            agents: self.agents,
            simulator,
            evaluation,
            hyperband,
            max_trials: (self.runcount_limit > 0).then_some(self.runcount_limit),
            wall_time_secs: (self.walltime > 0).then_some(self.walltime),
            jobs: self.jobs,
            output_dir: self.output_dir,
            random_state: self.random_state,
        })
    }
}

/// Everything a tuning run needs. Stored with the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneConfig {
    pub backend: Backend,
    pub agents: Vec<AgentVariant>,
    pub simulator: SimulatorCommand,
    pub evaluation: EvaluationSettings,
    pub hyperband: HyperbandSettings,
    pub max_trials: Option<usize>,
    pub wall_time_secs: Option<u64>,
    pub jobs: usize,
    pub output_dir: PathBuf,
    pub random_state: u64,
}

impl TuneConfig {
    /// The budget incumbents are judged at.
    pub fn max_budget(&self) -> f64 {
        self.hyperband.max_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["snork-hpo"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).into_config().unwrap();
        assert_eq!(config.backend, Backend::Hyperband);
        assert_eq!(config.agents, vec![AgentVariant::Flood]);
        assert_eq!(config.evaluation.games_per_eval, 1000);
        assert_eq!(config.evaluation.seeds, vec![42, 5, 725]);
        assert_eq!(config.evaluation.opponents, 1);
        assert_eq!(config.max_trials, Some(10000));
        assert_eq!(config.wall_time_secs, Some(36000));
        assert_eq!(config.jobs, 8);
        assert_eq!(config.output_dir, PathBuf::from("./optim_output"));
        assert_eq!(config.hyperband.min_budget, 1.0);
        assert_eq!(config.max_budget(), 2.0);
        assert_eq!(config.simulator.program, "cargo");
    }

    #[test]
    fn backend_aliases() {
        assert_eq!(parse(&["--optimizer", "dehb"]).optimizer, Backend::Hyperband);
        assert_eq!(parse(&["--optimizer", "smac"]).optimizer, Backend::Bayesian);
        assert_eq!(parse(&["--optimizer", "random"]).optimizer, Backend::Random);
        assert!(Args::try_parse_from(["snork-hpo", "--optimizer", "grid"]).is_err());
    }

    #[test]
    fn agents_and_seeds_lists() {
        let args = parse(&["--agents", "Tree", "Mobility", "--seeds", "1,2"]);
        assert_eq!(args.agents, vec![AgentVariant::Tree, AgentVariant::Mobility]);
        assert_eq!(args.seeds, vec![1, 2]);

        let config = parse(&["--unseeded"]).into_config().unwrap();
        assert!(config.evaluation.seeds.is_empty());
    }

    #[test]
    fn zero_limits_mean_unlimited() {
        let config = parse(&["--runcount-limit", "0", "--walltime", "0"])
            .into_config()
            .unwrap();
        assert_eq!(config.max_trials, None);
        assert_eq!(config.wall_time_secs, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse(&["--opponents", "4"]).into_config().is_err());
        assert!(parse(&["--jobs", "0"]).into_config().is_err());
        assert!(parse(&["--min-budget", "3"]).into_config().is_err());
        assert!(parse(&["--games-per-eval", "0"]).into_config().is_err());
        assert!(Args::try_parse_from(["snork-hpo", "--agents", "Minimax"]).is_err());
    }

    #[test]
    fn simulator_and_snake_dir() {
        let config = parse(&["--simulator", "./simulate --fast", "--snake-dir", "/opt/snork"])
            .into_config()
            .unwrap();
        assert_eq!(config.simulator.program, "./simulate");
        assert_eq!(config.simulator.args, ["--fast"]);
        assert_eq!(config.simulator.working_dir, Some(PathBuf::from("/opt/snork")));
    }

    #[test]
    fn report_and_failure_flags() {
        let config = parse(&["--report-format", "key-value", "--on-failure", "worst"])
            .into_config()
            .unwrap();
        assert_eq!(config.evaluation.format, ReportFormat::KeyValue);
        assert_eq!(config.evaluation.failure_policy, FailurePolicy::WorstScore);
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(parse(&[]).log_level(), Level::INFO);
        assert_eq!(parse(&["-v"]).log_level(), Level::DEBUG);
        assert_eq!(parse(&["-vv"]).log_level(), Level::TRACE);
    }
}
