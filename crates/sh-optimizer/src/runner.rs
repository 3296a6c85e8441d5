//! Drives a search strategy against an objective with a pool of workers.

use crossbeam_channel::RecvTimeoutError;
use sh_types::{Evaluation, HpoError, HpoResult, Objective};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::history::HistoryRecorder;
use crate::search::{SearchStrategy, Suggestion};
use crate::trial::{OptimizationConfig, OptimizationStatus, Trial, TrialResult};

/// How often the coordinator checks the stop flag while waiting on workers.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

struct Job {
    trial: Trial,
    suggestion: Suggestion,
}

struct JobOutcome {
    trial: Trial,
    suggestion: Suggestion,
    outcome: HpoResult<Evaluation>,
    elapsed: Duration,
}

/// Runs trials until the trial limit or wall time is reached, the stop flag
/// is raised, or an evaluation fails.
pub struct Optimizer;

impl Optimizer {
    /// Run one optimization.
    ///
    /// `config.concurrency` workers evaluate trials in parallel. Trials that
    /// are already running when the run ends are always waited for. An
    /// objective error aborts the run and is returned once the other workers
    /// have finished.
    pub fn run(
        strategy: &mut dyn SearchStrategy,
        objective: &dyn Objective,
        config: OptimizationConfig,
        mut recorder: Option<&mut HistoryRecorder>,
        stop: &AtomicBool,
    ) -> HpoResult<OptimizationStatus> {
        let workers = config.concurrency.max(1);
        let max_trials = config.max_trials;
        let wall_time = config.wall_time();
        let optimization_id = config.id;

        let mut status = OptimizationStatus::new(config);
        status.mark_running();
        info!(
            strategy = strategy.name(),
            workers,
            max_trials = ?max_trials,
            wall_time_secs = ?wall_time.map(|d| d.as_secs()),
            "Starting optimization"
        );

        let started = Instant::now();
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<JobOutcome>();

        let failure = thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for mut job in job_rx.iter() {
                        job.trial.mark_running(Some(format!("worker-{worker}")));
                        let begin = Instant::now();
                        let outcome =
                            objective.evaluate(&job.suggestion.configuration, job.suggestion.budget);
                        let done = JobOutcome {
                            trial: job.trial,
                            suggestion: job.suggestion,
                            outcome,
                            elapsed: begin.elapsed(),
                        };
                        if result_tx.send(done).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);
            drop(job_rx);

            let mut job_tx = Some(job_tx);
            let mut submitted = 0usize;
            let mut in_flight = 0usize;
            let mut exhausted = false;
            let mut failure: Option<HpoError> = None;

            loop {
                let within_limits = |submitted: usize| {
                    max_trials.map_or(true, |limit| submitted < limit)
                        && wall_time.map_or(true, |limit| started.elapsed() < limit)
                };
                let accepting = failure.is_none()
                    && !exhausted
                    && !stop.load(Ordering::SeqCst)
                    && within_limits(submitted);

                if !accepting {
                    // Idle workers exit once the queue closes.
                    job_tx.take();
                }
                if let Some(tx) = job_tx.as_ref() {
                    while in_flight < workers && within_limits(submitted) {
                        let Some(suggestion) = strategy.suggest(1).pop() else {
                            exhausted = true;
                            break;
                        };
                        let trial = Trial::new(
                            optimization_id,
                            submitted,
                            suggestion.configuration.clone(),
                            suggestion.budget,
                        );
                        debug!(
                            trial = submitted,
                            budget = suggestion.budget,
                            "Submitting configuration"
                        );
                        if tx.send(Job { trial, suggestion }).is_err() {
                            exhausted = true;
                            break;
                        }
                        submitted += 1;
                        in_flight += 1;
                    }
                }
                status.trials_running = in_flight;

                if in_flight == 0 {
                    break;
                }

                let done = match result_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(done) => done,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                in_flight -= 1;

                if let Err(e) = Self::complete(
                    done,
                    &mut *strategy,
                    &mut status,
                    recorder.as_deref_mut(),
                    started.elapsed(),
                    stop.load(Ordering::SeqCst),
                ) {
                    failure.get_or_insert(e);
                }
            }
            job_tx.take();
            failure
        });

        status.trials_running = 0;
        if let Some(e) = failure {
            status.mark_failed(e.to_string());
            error!(
                completed = status.trials_completed,
                failed = status.trials_failed,
                "Optimization aborted: {e}"
            );
            return Err(e);
        }

        if stop.load(Ordering::SeqCst) {
            status.mark_cancelled();
        } else {
            status.mark_completed();
        }
        info!(
            completed = status.trials_completed,
            elapsed_secs = started.elapsed().as_secs(),
            best_loss = ?status.best_trial.as_ref().map(|t| t.loss),
            "Optimization finished"
        );
        Ok(status)
    }

    /// Book-keeping for one finished job. Returns the evaluation error, if any.
    ///
    /// Once the run is `stopping`, an evaluation error only cancels its trial:
    /// an interrupt can take the evaluation down with it.
    fn complete(
        done: JobOutcome,
        strategy: &mut dyn SearchStrategy,
        status: &mut OptimizationStatus,
        recorder: Option<&mut HistoryRecorder>,
        elapsed: Duration,
        stopping: bool,
    ) -> HpoResult<()> {
        let JobOutcome {
            mut trial,
            suggestion,
            outcome,
            elapsed: duration,
        } = done;

        let evaluation = match outcome {
            Ok(evaluation) => evaluation,
            Err(e) if stopping => {
                warn!(trial = trial.trial_number, "Evaluation interrupted: {e}");
                trial.mark_cancelled(e.to_string());
                if let Some(recorder) = recorder {
                    recorder.record_trial(&trial)?;
                }
                return Ok(());
            }
            Err(e) => {
                error!(trial = trial.trial_number, "Evaluation failed: {e}");
                trial.mark_failed(e.to_string());
                status.trials_failed += 1;
                if let Some(recorder) = recorder {
                    recorder.record_trial(&trial)?;
                }
                return Err(e);
            }
        };

        strategy.report(&suggestion, evaluation.loss);
        let result = TrialResult {
            trial_id: trial.id,
            trial_number: trial.trial_number,
            loss: evaluation.loss,
            cost: evaluation.cost,
            budget: suggestion.budget,
            configuration: suggestion.configuration,
            info: evaluation.info,
            duration_ms: duration.as_millis() as u64,
        };
        trial.mark_completed(result.clone());
        status.trials_completed += 1;

        let improved = status.update_best(&result);
        info!(
            trial = result.trial_number,
            loss = result.loss,
            budget = result.budget,
            cost_ms = result.cost,
            incumbent = improved,
            "Trial finished"
        );

        if let Some(recorder) = recorder {
            recorder.record_trial(&trial)?;
            if improved {
                recorder.record_incumbent(&result, elapsed)?;
            }
        }
        Ok(())
    }
}
