use sh_optimizer::{
    load_observations, BayesianSearch, HyperbandSearch, HyperbandSettings, OptimizationConfig,
    OptimizationState, Optimizer, ParameterDef, RandomSearch, SearchSpace, SearchStrategy,
    HISTORY_FILE, TRAJECTORY_FILE,
};
use sh_types::{Configuration, Evaluation, HpoResult, ParameterValue};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Two variants, each with its own parameters, selected by `agent`.
fn conditional_space() -> SearchSpace {
    SearchSpace::new()
        .add_choice("agent", vec!["A".into(), "B".into()], "A")
        .add(ParameterDef::float("a_x", 0.0, 1.0, 0.5).active_when("agent", ["A"]))
        .add(ParameterDef::int("b_n", 1, 5, 3).active_when("agent", ["B"]))
}

/// Minimum at agent A with a_x = 0.3; variant B never beats 0.5.
fn objective(config: &Configuration, _budget: f64) -> HpoResult<Evaluation> {
    let loss = match config.get("agent").and_then(ParameterValue::as_str) {
        Some("A") => {
            let x = config.get("a_x").and_then(ParameterValue::as_f64).unwrap_or(1.0);
            (x - 0.3).abs()
        }
        _ => 0.5 + config.get("b_n").and_then(ParameterValue::as_f64).unwrap_or(0.0) / 10.0,
    };
    Ok(Evaluation::new(loss, 5.0))
}

fn run(strategy: &mut dyn SearchStrategy, trials: usize) -> sh_optimizer::OptimizationStatus {
    let config = OptimizationConfig::new("integration".into(), strategy.name())
        .with_max_trials(Some(trials))
        .with_concurrency(4);
    let stop = AtomicBool::new(false);
    Optimizer::run(strategy, &objective, config, None, &stop).unwrap()
}

#[test]
fn every_strategy_finds_a_good_incumbent() {
    let space = conditional_space();
    let mut random = RandomSearch::new(space.clone(), 7);
    let mut bayesian = BayesianSearch::new(space.clone(), 7);
    let mut hyperband = HyperbandSearch::new(space.clone(), HyperbandSettings::default(), 7).unwrap();

    let strategies: [&mut dyn SearchStrategy; 3] = [&mut random, &mut bayesian, &mut hyperband];
    for strategy in strategies {
        let name = strategy.name().to_string();
        let status = run(strategy, 60);
        assert_eq!(status.state, OptimizationState::Completed, "{name}");
        assert_eq!(status.trials_completed, 60, "{name}");

        let best = status.best_trial.expect("incumbent");
        assert!(best.loss < 0.25, "{name} incumbent loss {}", best.loss);
        assert_eq!(space.check(&best.configuration), Ok(()), "{name}");
    }
}

#[test]
fn inactive_parameters_are_never_passed_to_the_objective() {
    let leaks = AtomicUsize::new(0);
    let checked = |config: &Configuration, budget: f64| -> HpoResult<Evaluation> {
        let agent = config.get("agent").and_then(ParameterValue::as_str);
        let leaked = match agent {
            Some("A") => config.contains("b_n"),
            _ => config.contains("a_x"),
        };
        if leaked {
            leaks.fetch_add(1, Ordering::SeqCst);
        }
        objective(config, budget)
    };

    let mut strategy =
        HyperbandSearch::new(conditional_space(), HyperbandSettings::default(), 3).unwrap();
    let config = OptimizationConfig::new("conditional".into(), "hyperband")
        .with_max_trials(Some(40))
        .with_concurrency(2);
    let stop = AtomicBool::new(false);
    Optimizer::run(&mut strategy, &checked, config, None, &stop).unwrap();

    assert_eq!(leaks.load(Ordering::SeqCst), 0);
}

#[test]
fn hyperband_incumbent_is_evaluated_at_full_budget() {
    let mut strategy =
        HyperbandSearch::new(conditional_space(), HyperbandSettings::default(), 11).unwrap();
    let status = run(&mut strategy, 40);
    assert_eq!(status.best_trial.unwrap().budget, 2.0);
}

#[test]
fn history_is_written_and_readable() {
    let dir = tempfile::tempdir().unwrap();
    let config = OptimizationConfig::new("recorded".into(), "random")
        .with_max_trials(Some(12))
        .with_concurrency(3);
    let mut recorder = sh_optimizer::HistoryRecorder::create(dir.path(), &config).unwrap();
    let mut strategy = RandomSearch::new(conditional_space(), 5).with_budget(2.0);
    let stop = AtomicBool::new(false);

    let status =
        Optimizer::run(&mut strategy, &objective, config, Some(&mut recorder), &stop).unwrap();
    assert_eq!(status.trials_completed, 12);

    let history = fs::read_to_string(recorder.run_dir().join(HISTORY_FILE)).unwrap();
    assert_eq!(history.lines().count(), 12);
    let trajectory = fs::read_to_string(recorder.run_dir().join(TRAJECTORY_FILE)).unwrap();
    assert!(trajectory.lines().count() >= 1);

    let observations = load_observations(dir.path()).unwrap();
    assert_eq!(observations.len(), 12);
    assert!(observations.iter().all(|o| o.budget == 2.0));
}

#[test]
fn failure_is_recorded_before_abort() {
    let dir = tempfile::tempdir().unwrap();
    let calls = AtomicUsize::new(0);
    let flaky = |config: &Configuration, budget: f64| -> HpoResult<Evaluation> {
        if calls.fetch_add(1, Ordering::SeqCst) == 3 {
            return Err(sh_types::HpoError::Internal("exit status 101".into()));
        }
        objective(config, budget)
    };
    let config = OptimizationConfig::new("flaky".into(), "random")
        .with_max_trials(Some(20))
        .with_concurrency(1);
    let mut recorder = sh_optimizer::HistoryRecorder::create(dir.path(), &config).unwrap();
    let mut strategy = RandomSearch::new(conditional_space(), 5);
    let stop = AtomicBool::new(false);

    let result = Optimizer::run(&mut strategy, &flaky, config, Some(&mut recorder), &stop);
    assert!(result.is_err());

    let history = fs::read_to_string(recorder.run_dir().join(HISTORY_FILE)).unwrap();
    assert_eq!(history.lines().count(), 4);
    assert!(history.contains("\"Failed\""));
    assert!(history.contains("exit status 101"));
}

#[test]
fn stop_flag_raised_mid_run_cancels() {
    let stop = AtomicBool::new(false);
    let calls = AtomicUsize::new(0);
    let stopping = |config: &Configuration, budget: f64| -> HpoResult<Evaluation> {
        if calls.fetch_add(1, Ordering::SeqCst) == 4 {
            stop.store(true, Ordering::SeqCst);
        }
        objective(config, budget)
    };
    let config = OptimizationConfig::new("interrupted".into(), "random")
        .with_max_trials(None)
        .with_concurrency(1);
    let mut strategy = RandomSearch::new(conditional_space(), 5);

    let status = Optimizer::run(&mut strategy, &stopping, config, None, &stop).unwrap();
    assert_eq!(status.state, OptimizationState::Cancelled);
    assert_eq!(status.trials_completed, 5);
}
