//! The seam between search strategies and whatever scores a configuration.

use serde::{Deserialize, Serialize};

use crate::errors::HpoResult;
use crate::value::Configuration;

/// Structured outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Value to minimize.
    pub loss: f64,
    /// Cost of the evaluation in milliseconds.
    pub cost: f64,
    /// Free-form metadata. Empty for regular evaluations.
    #[serde(default)]
    pub info: serde_json::Map<String, serde_json::Value>,
}

impl Evaluation {
    pub fn new(loss: f64, cost: f64) -> Self {
        Self {
            loss,
            cost,
            info: serde_json::Map::new(),
        }
    }

    pub fn with_info(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.info.insert(key.into(), value);
        self
    }
}

/// Scores configurations for the optimizer.
///
/// Called concurrently from several worker threads.
pub trait Objective: Send + Sync {
    /// Evaluate `configuration` at `budget` (a fraction-of-maximum effort level).
    fn evaluate(&self, configuration: &Configuration, budget: f64) -> HpoResult<Evaluation>;
}

impl<F> Objective for F
where
    F: Fn(&Configuration, f64) -> HpoResult<Evaluation> + Send + Sync,
{
    fn evaluate(&self, configuration: &Configuration, budget: f64) -> HpoResult<Evaluation> {
        self(configuration, budget)
    }
}
