//! # sh-cli
//!
//! The `snork-hpo` driver: flag parsing, logging setup and the tuning run
//! that ties the search space, a search backend and the simulator together.

pub mod config;
pub mod telemetry;
pub mod tune;

pub use config::{Args, Backend, TuneConfig};
pub use telemetry::init_tracing;
pub use tune::{tune, win_percentage, TuneOutcome, INCUMBENT_FILE};
