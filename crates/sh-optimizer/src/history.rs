//! Run history and trajectory files in the output directory.
//!
//! Every run writes to its own `run_<id>/` subdirectory, so several
//! processes can share one output directory. Model-based runs read the
//! histories of their siblings back through [`load_observations`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sh_types::{Configuration, HpoResult};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::trial::{OptimizationConfig, Trial, TrialResult, TrialStatus};

pub const HISTORY_FILE: &str = "history.jsonl";
pub const TRAJECTORY_FILE: &str = "trajectory.jsonl";
pub const SCENARIO_FILE: &str = "scenario.json";

/// One line of `history.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub trial_number: usize,
    pub configuration: Configuration,
    pub budget: f64,
    pub status: TrialStatus,
    pub loss: Option<f64>,
    pub cost: Option<f64>,
    pub error: Option<String>,
    pub worker_id: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Trial> for HistoryRecord {
    fn from(trial: &Trial) -> Self {
        Self {
            trial_number: trial.trial_number,
            configuration: trial.configuration.clone(),
            budget: trial.budget,
            status: trial.status,
            loss: trial.result.as_ref().map(|r| r.loss),
            cost: trial.result.as_ref().map(|r| r.cost),
            error: trial.error.clone(),
            worker_id: trial.worker_id.clone(),
            finished_at: trial.finished_at,
        }
    }
}

/// One line of `trajectory.jsonl`: a new incumbent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub trial_number: usize,
    pub loss: f64,
    pub budget: f64,
    pub configuration: Configuration,
    pub elapsed_secs: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A completed evaluation read back from a history file.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub configuration: Configuration,
    pub loss: f64,
    pub budget: f64,
}

/// Appends trial and incumbent records for one run.
#[derive(Debug)]
pub struct HistoryRecorder {
    run_dir: PathBuf,
    history: BufWriter<File>,
    trajectory: BufWriter<File>,
}

impl HistoryRecorder {
    /// Create `<output_dir>/run_<id>/` and write the scenario file.
    pub fn create(output_dir: &Path, config: &OptimizationConfig) -> HpoResult<Self> {
        let run_dir = output_dir.join(format!("run_{}", config.id.simple()));
        fs::create_dir_all(&run_dir)?;

        let scenario = File::create(run_dir.join(SCENARIO_FILE))?;
        serde_json::to_writer_pretty(scenario, config)?;

        let open = |name: &str| -> HpoResult<BufWriter<File>> {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(run_dir.join(name))?;
            Ok(BufWriter::new(file))
        };
        let history = open(HISTORY_FILE)?;
        let trajectory = open(TRAJECTORY_FILE)?;

        info!("Recording run history in {}", run_dir.display());
        Ok(Self {
            run_dir,
            history,
            trajectory,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn record_trial(&mut self, trial: &Trial) -> HpoResult<()> {
        append_line(&mut self.history, &HistoryRecord::from(trial))
    }

    pub fn record_incumbent(&mut self, result: &TrialResult, elapsed: Duration) -> HpoResult<()> {
        let record = TrajectoryRecord {
            trial_number: result.trial_number,
            loss: result.loss,
            budget: result.budget,
            configuration: result.configuration.clone(),
            elapsed_secs: elapsed.as_secs_f64(),
            recorded_at: Utc::now(),
        };
        append_line(&mut self.trajectory, &record)
    }

    /// Write `value` as pretty JSON to `<run_dir>/<file_name>`.
    pub fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> HpoResult<PathBuf> {
        let path = self.run_dir.join(file_name);
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(file, value)?;
        Ok(path)
    }
}

fn append_line<T: Serialize>(writer: &mut BufWriter<File>, record: &T) -> HpoResult<()> {
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")?;
    // Other processes may be reading the file.
    writer.flush()?;
    Ok(())
}

/// Completed evaluations of every run found under `output_dir`.
///
/// A missing directory yields no observations; malformed lines are skipped.
pub fn load_observations(output_dir: &Path) -> HpoResult<Vec<Observation>> {
    let mut observations = Vec::new();
    if !output_dir.is_dir() {
        return Ok(observations);
    }

    let mut runs: Vec<PathBuf> = fs::read_dir(output_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.join(HISTORY_FILE).is_file())
        .collect();
    runs.sort();

    for run in runs {
        let path = run.join(HISTORY_FILE);
        let mut reader = BufReader::new(File::open(&path)?);
        let mut buf = Vec::new();
        let mut line_num = 0;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_num += 1;
            // Another process may have left a partial or corrupt line.
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    warn!("Skipping malformed record at {}:{}: {}", path.display(), line_num, e);
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(HistoryRecord {
                    status: TrialStatus::Completed,
                    loss: Some(loss),
                    configuration,
                    budget,
                    ..
                }) => observations.push(Observation {
                    configuration,
                    loss,
                    budget,
                }),
                Ok(_) => {}
                Err(e) => warn!(
                    "Skipping malformed record at {}:{}: {}",
                    path.display(),
                    line_num,
                    e
                ),
            }
        }
    }
    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn completed_trial(number: usize, loss: f64) -> Trial {
        let config = Configuration::new().with("agent", "Flood").with("f_health", 0.5);
        let mut trial = Trial::new(Uuid::new_v4(), number, config.clone(), 2.0);
        trial.mark_running(Some("worker-0".into()));
        trial.mark_completed(TrialResult {
            trial_id: trial.id,
            trial_number: number,
            loss,
            cost: 1200.0,
            budget: 2.0,
            configuration: config,
            info: serde_json::Map::new(),
            duration_ms: 1300,
        });
        trial
    }

    #[test]
    fn recorder_writes_scenario_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let config = OptimizationConfig::new("history".into(), "bayesian");
        let mut recorder = HistoryRecorder::create(dir.path(), &config).unwrap();

        recorder.record_trial(&completed_trial(0, 0.4)).unwrap();
        let mut failed = Trial::new(config.id, 1, Configuration::new(), 2.0);
        failed.mark_failed("boom".into());
        recorder.record_trial(&failed).unwrap();

        let run_dir = recorder.run_dir().to_path_buf();
        assert!(run_dir.join(SCENARIO_FILE).is_file());
        let history = fs::read_to_string(run_dir.join(HISTORY_FILE)).unwrap();
        assert_eq!(history.lines().count(), 2);

        let scenario: OptimizationConfig =
            serde_json::from_str(&fs::read_to_string(run_dir.join(SCENARIO_FILE)).unwrap()).unwrap();
        assert_eq!(scenario.id, config.id);
    }

    #[test]
    fn observations_come_from_every_run() {
        let dir = tempfile::tempdir().unwrap();
        for loss in [0.3, 0.6] {
            let config = OptimizationConfig::new("shared".into(), "bayesian");
            let mut recorder = HistoryRecorder::create(dir.path(), &config).unwrap();
            recorder.record_trial(&completed_trial(0, loss)).unwrap();
        }

        let mut losses: Vec<f64> = load_observations(dir.path())
            .unwrap()
            .into_iter()
            .map(|o| o.loss)
            .collect();
        losses.sort_by(f64::total_cmp);
        assert_eq!(losses, vec![0.3, 0.6]);
    }

    #[test]
    fn failed_and_malformed_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = OptimizationConfig::new("noisy".into(), "bayesian");
        let mut recorder = HistoryRecorder::create(dir.path(), &config).unwrap();
        recorder.record_trial(&completed_trial(0, 0.25)).unwrap();
        let mut failed = Trial::new(config.id, 1, Configuration::new(), 2.0);
        failed.mark_failed("boom".into());
        recorder.record_trial(&failed).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(recorder.run_dir().join(HISTORY_FILE))
            .unwrap();
        writeln!(file, "{{not json").unwrap();
        file.write_all(b"{\"trial_number\": \xff\xfe}\n").unwrap();
        recorder.record_trial(&completed_trial(2, 0.75)).unwrap();

        let observations = load_observations(dir.path()).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].loss, 0.25);
        assert_eq!(observations[0].budget, 2.0);
        assert_eq!(observations[1].loss, 0.75);
    }

    #[test]
    fn missing_directory_has_no_observations() {
        let dir = tempfile::tempdir().unwrap();
        let observations = load_observations(&dir.path().join("absent")).unwrap();
        assert!(observations.is_empty());
    }
}
