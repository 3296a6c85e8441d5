//! Scoring configurations by playing simulated games.

use serde::{Deserialize, Serialize};
use sh_types::{
    validation_error, Configuration, Evaluation, HpoError, HpoResult, Objective, ReportError,
};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, warn};

use crate::payload::render_payload;
use crate::report::ReportFormat;
use crate::simulator::{SimulationRequest, SimulatorCommand, DEFAULT_OPPONENT};

/// Seeds every configuration is played with.
pub const DEFAULT_SEEDS: [u64; 3] = [42, 5, 725];

/// Most opponents a game can have.
pub const MAX_OPPONENTS: usize = 3;

/// What happens when a simulator run fails or prints nothing usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Propagate the error, ending the optimization.
    #[default]
    Abort,
    /// Score the configuration as losing every game.
    WorstScore,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::WorstScore => "worst",
        })
    }
}

impl FromStr for FailurePolicy {
    type Err = HpoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(FailurePolicy::Abort),
            "worst" | "worst-score" => Ok(FailurePolicy::WorstScore),
            other => Err(validation_error!("unknown failure policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    /// Copies of the opponent in every game.
    pub opponents: usize,
    /// Games per seed at the maximum budget.
    pub games_per_eval: u64,
    pub timeout: u64,
    /// One simulator run per seed; empty means a single unseeded run.
    pub seeds: Vec<u64>,
    pub format: ReportFormat,
    pub failure_policy: FailurePolicy,
    pub max_budget: f64,
    /// JSON of the opponent agent.
    pub opponent: String,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            opponents: 1,
            games_per_eval: 1000,
            timeout: 0,
            seeds: DEFAULT_SEEDS.to_vec(),
            format: ReportFormat::Native,
            failure_policy: FailurePolicy::Abort,
            max_budget: 2.0,
            opponent: DEFAULT_OPPONENT.to_string(),
        }
    }
}

impl EvaluationSettings {
    pub fn validate(&self) -> HpoResult<()> {
        if !(1..=MAX_OPPONENTS).contains(&self.opponents) {
            return Err(validation_error!(
                "opponents must be between 1 and {MAX_OPPONENTS}, got {}",
                self.opponents
            ));
        }
        if self.games_per_eval == 0 {
            return Err(validation_error!("games per evaluation must be positive"));
        }
        if !(self.max_budget.is_finite() && self.max_budget > 0.0) {
            return Err(validation_error!(
                "maximum budget must be positive, got {}",
                self.max_budget
            ));
        }
        serde_json::from_str::<serde_json::Value>(&self.opponent)
            .map_err(|e| validation_error!("opponent is not valid JSON: {e}"))?;
        Ok(())
    }
}

/// Plays a configuration against the opponents and turns wins into a loss.
#[derive(Debug, Clone)]
pub struct FitnessEvaluator {
    simulator: SimulatorCommand,
    settings: EvaluationSettings,
}

impl FitnessEvaluator {
    pub fn new(simulator: SimulatorCommand, settings: EvaluationSettings) -> HpoResult<Self> {
        settings.validate()?;
        Ok(Self {
            simulator,
            settings,
        })
    }

    /// Games per seed at `budget`; never less than one.
    pub fn games_for_budget(&self, budget: f64) -> u64 {
        let fraction = if budget.is_finite() {
            budget / self.settings.max_budget
        } else {
            1.0
        };
        (self.settings.games_per_eval as f64 * fraction).round().max(1.0) as u64
    }

    /// Mean loss and simulator time over all seeds at `budget`.
    pub fn evaluate(&self, configuration: &Configuration, budget: f64) -> HpoResult<Evaluation> {
        let start = Instant::now();
        match self.play(configuration, budget) {
            Ok(evaluation) => Ok(evaluation),
            Err(e) => {
                warn!(policy = %self.settings.failure_policy, "Evaluation failed: {e}");
                match self.settings.failure_policy {
                    FailurePolicy::Abort => Err(e),
                    FailurePolicy::WorstScore => {
                        let cost = start.elapsed().as_secs_f64() * 1000.0;
                        Ok(Evaluation::new(1.0, cost)
                            .with_info("error", serde_json::Value::String(e.to_string())))
                    }
                }
            }
        }
    }

    /// Loss at the maximum budget.
    pub fn loss(&self, configuration: &Configuration) -> HpoResult<f64> {
        self.evaluate(configuration, self.settings.max_budget)
            .map(|evaluation| evaluation.loss)
    }

    fn play(&self, configuration: &Configuration, budget: f64) -> HpoResult<Evaluation> {
        let payload = render_payload(configuration)?;
        let game_count = self.games_for_budget(budget);
        let seeds: Vec<Option<u64>> = if self.settings.seeds.is_empty() {
            vec![None]
        } else {
            self.settings.seeds.iter().copied().map(Some).collect()
        };

        let mut total_loss = 0.0;
        let mut total_ms = 0.0;
        for &seed in &seeds {
            let request = SimulationRequest {
                payload: payload.clone(),
                opponent: self.settings.opponent.clone(),
                opponents: self.settings.opponents,
                game_count,
                timeout: self.settings.timeout,
                seed,
            };
            let output = self.simulator.run(&request)?;
            let report = self.settings.format.parse(&output)?;
            let games = report.games.unwrap_or(game_count);
            let loss = loss_from_wins(report.wins, games)?;
            debug!(?seed, wins = report.wins, games, elapsed_ms = report.elapsed_ms, "Simulation finished");
            total_loss += loss;
            total_ms += report.elapsed_ms;
        }

        let runs = seeds.len() as f64;
        Ok(Evaluation::new(total_loss / runs, total_ms / runs))
    }
}

impl Objective for FitnessEvaluator {
    fn evaluate(&self, configuration: &Configuration, budget: f64) -> HpoResult<Evaluation> {
        FitnessEvaluator::evaluate(self, configuration, budget)
    }
}

/// Fraction of games not won.
pub fn loss_from_wins(wins: u64, games: u64) -> HpoResult<f64> {
    if games == 0 {
        return Err(ReportError::InvalidNumber {
            field: "games".into(),
            value: "0".into(),
        }
        .into());
    }
    if wins > games {
        return Err(ReportError::WinsExceedGames { wins, games }.into());
    }
    Ok(1.0 - wins as f64 / games as f64)
}
