//! Trial tracking and optimization run management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sh_types::Configuration;
use std::time::Duration;
use uuid::Uuid;

/// Unique optimization run identifier.
pub type OptimizationId = Uuid;

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub id: OptimizationId,
    pub name: String,
    pub description: String,

    /// Name of the search strategy driving the run.
    pub strategy: String,

    /// Maximum number of trials to run (`None` = unlimited).
    pub max_trials: Option<usize>,

    /// Wall-clock limit in seconds (`None` = unlimited).
    pub wall_time_secs: Option<u64>,

    /// How many trials to run in parallel.
    pub concurrency: usize,

    /// Settings of the evaluation side, stored as opaque JSON so the
    /// optimizer crate doesn't depend on them.
    pub settings: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl OptimizationConfig {
    pub fn new(name: String, strategy: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description: String::new(),
            strategy: strategy.to_string(),
            max_trials: Some(100),
            wall_time_secs: None,
            concurrency: 4,
            settings: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_max_trials(mut self, n: Option<usize>) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_wall_time(mut self, limit: Option<Duration>) -> Self {
        self.wall_time_secs = limit.map(|d| d.as_secs());
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn wall_time(&self) -> Option<Duration> {
        self.wall_time_secs.map(Duration::from_secs)
    }
}

/// Lifecycle state for an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Aggregate status of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub id: OptimizationId,
    pub config: OptimizationConfig,
    pub state: OptimizationState,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub trials_running: usize,
    /// The incumbent.
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl OptimizationStatus {
    pub fn new(config: OptimizationConfig) -> Self {
        Self {
            id: config.id,
            config,
            state: OptimizationState::Pending,
            trials_completed: 0,
            trials_failed: 0,
            trials_running: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = OptimizationState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = OptimizationState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.state = OptimizationState::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = OptimizationState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Replace the incumbent if `result` improves on it.
    ///
    /// Results at a higher budget always win; at the same budget the lower
    /// loss wins. Lower-budget results never displace the incumbent.
    /// Returns whether the incumbent changed.
    pub fn update_best(&mut self, result: &TrialResult) -> bool {
        if result.loss.is_nan() {
            return false;
        }
        let improves = match &self.best_trial {
            None => true,
            Some(current) => {
                result.budget > current.budget
                    || (result.budget == current.budget && result.loss < current.loss)
            }
        };
        if improves {
            self.best_trial = Some(result.clone());
        }
        improves
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial (one configuration evaluated at one budget).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub optimization_id: OptimizationId,
    pub trial_number: usize,
    pub configuration: Configuration,
    pub budget: f64,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(
        optimization_id: OptimizationId,
        trial_number: usize,
        configuration: Configuration,
        budget: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            optimization_id,
            trial_number,
            configuration,
            budget,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            worker_id: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, worker_id: Option<String>) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_id = worker_id;
    }

    pub fn mark_completed(&mut self, result: TrialResult) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// The run was stopped while this trial was running.
    pub fn mark_cancelled(&mut self, error: String) {
        self.status = TrialStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Result of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub trial_number: usize,
    pub loss: f64,
    /// Cost reported by the objective, in milliseconds.
    pub cost: f64,
    pub budget: f64,
    pub configuration: Configuration,
    #[serde(default)]
    pub info: serde_json::Map<String, serde_json::Value>,
    pub duration_ms: u64,
}
