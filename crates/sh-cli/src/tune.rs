//! One complete tuning run.

use sh_optimizer::{
    load_observations, BayesianSearch, HistoryRecorder, HyperbandSearch, OptimizationConfig,
    OptimizationStatus, Optimizer, RandomSearch, SearchSpace, SearchStrategy,
};
use sh_snake::{build_space, render_payload, FitnessEvaluator};
use sh_types::{Configuration, Evaluation, HpoResult};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Backend, TuneConfig};

/// File the rendered incumbent payload is written to, inside the run directory.
pub const INCUMBENT_FILE: &str = "incumbent.json";

/// Results of a finished run.
#[derive(Debug, Clone)]
pub struct TuneOutcome {
    pub status: OptimizationStatus,
    /// Default configuration evaluated at the full budget.
    pub default_evaluation: Evaluation,
    pub incumbent: Configuration,
    /// Incumbent re-evaluated at the full budget.
    pub incumbent_evaluation: Evaluation,
    pub run_dir: PathBuf,
}

/// Loss to win percentage.
pub fn win_percentage(loss: f64) -> f64 {
    (1.0 - loss) * 100.0
}

/// Build the space, run the configured backend and report the incumbent.
///
/// Raising `stop` ends the search early; the best configuration found so
/// far is still evaluated and reported.
pub fn tune(config: &TuneConfig, stop: &AtomicBool) -> HpoResult<TuneOutcome> {
    let space = build_space(&config.agents);
    space.validate()?;
    info!(
        parameters = space.len(),
        agents = ?config.agents,
        backend = config.backend.name(),
        "Built configuration space"
    );

    let evaluator = FitnessEvaluator::new(config.simulator.clone(), config.evaluation.clone())?;
    let max_budget = config.max_budget();

    let default_configuration = space.default_configuration();
    let default_evaluation = evaluator.evaluate(&default_configuration, max_budget)?;
    println!(
        "Default configuration evaluates to a win percentage of {:.2}%",
        win_percentage(default_evaluation.loss)
    );

    let strategy_seed = config.random_state;
    let mut strategy = build_strategy(config, space, strategy_seed)?;

    let agents: Vec<&str> = config.agents.iter().map(|a| a.name()).collect();
    let optimization = OptimizationConfig::new(format!("snork-{}", agents.join("-")), strategy.name())
        .with_max_trials(config.max_trials)
        .with_wall_time(config.wall_time_secs.map(Duration::from_secs))
        .with_concurrency(config.jobs)
        .with_settings(serde_json::to_value(config)?);
    let mut recorder = HistoryRecorder::create(&config.output_dir, &optimization)?;

    let status = Optimizer::run(
        strategy.as_mut(),
        &evaluator,
        optimization,
        Some(&mut recorder),
        stop,
    )?;

    let (incumbent, incumbent_evaluation) = match &status.best_trial {
        Some(best) => {
            println!(
                "Incumbent found at budget {} after {} trials (cost {:.0} ms):",
                best.budget, status.trials_completed, best.cost
            );
            print!("{}", best.configuration);
            let evaluation = evaluator.evaluate(&best.configuration, max_budget)?;
            (best.configuration.clone(), evaluation)
        }
        None => {
            warn!("No trial finished, reporting the default configuration");
            print!("{default_configuration}");
            (default_configuration, default_evaluation.clone())
        }
    };
    println!(
        "Incumbent evaluates to a win percentage of {:.2}%",
        win_percentage(incumbent_evaluation.loss)
    );

    let path = recorder.write_json(INCUMBENT_FILE, &render_payload(&incumbent)?)?;
    info!("Wrote incumbent to {}", path.display());

    Ok(TuneOutcome {
        status,
        default_evaluation,
        incumbent,
        incumbent_evaluation,
        run_dir: recorder.run_dir().to_path_buf(),
    })
}

fn build_strategy(
    config: &TuneConfig,
    space: SearchSpace,
    seed: u64,
) -> HpoResult<Box<dyn SearchStrategy>> {
    let max_budget = config.max_budget();
    Ok(match config.backend {
        Backend::Hyperband => Box::new(HyperbandSearch::new(space, config.hyperband.clone(), seed)?),
        Backend::Bayesian => {
            // Runs sharing the output directory learn from each other.
            let prior: Vec<(Configuration, f64)> = load_observations(&config.output_dir)?
                .into_iter()
                .filter(|o| o.budget >= max_budget)
                .map(|o| (o.configuration, o.loss))
                .collect();
            let strategy = BayesianSearch::new(space, seed)
                .with_budget(max_budget)
                .with_observations(prior);
            if strategy.observation_count() > 0 {
                info!(
                    observations = strategy.observation_count(),
                    "Warm-starting from earlier runs"
                );
            }
            Box::new(strategy)
        }
        Backend::Random => Box::new(RandomSearch::new(space, seed).with_budget(max_budget)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win_percentage_of_loss() {
        assert_eq!(win_percentage(0.0), 100.0);
        assert_eq!(win_percentage(1.0), 0.0);
        assert!((win_percentage(0.375) - 62.5).abs() < 1e-12);
    }
}
