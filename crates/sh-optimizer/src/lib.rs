//! # sh-optimizer
//!
//! Parameter search and trial orchestration for snork-hpo.
//!
//! Provides conditional search space definitions, search strategies (random,
//! Bayesian, multi-fidelity Hyperband with differential evolution), trial
//! tracking, a threaded optimization runner and on-disk run histories.

mod history;
mod hyperband;
mod runner;
mod search;
mod space;
mod trial;

pub use history::{
    load_observations, HistoryRecord, HistoryRecorder, Observation, TrajectoryRecord,
    HISTORY_FILE, SCENARIO_FILE, TRAJECTORY_FILE,
};
pub use hyperband::{HyperbandSearch, HyperbandSettings};
pub use runner::Optimizer;
pub use search::{BayesianSearch, RandomSearch, SearchStrategy, Suggestion};
pub use space::{Condition, ParameterDef, ParameterKind, SearchSpace};
pub use trial::{
    OptimizationConfig, OptimizationId, OptimizationState, OptimizationStatus, Trial,
    TrialResult, TrialStatus,
};
