//! # sh-snake
//!
//! Everything specific to tuning the snork agent: the parameter tables of
//! each heuristic variant, rendering configurations into the agent JSON,
//! running the simulator and turning its win counts into a loss.

pub mod agents;
pub mod fitness;
pub mod payload;
pub mod report;
pub mod simulator;

pub use agents::{build_space, AgentVariant, AGENT_KEY, PREFIX_LEN};
pub use fitness::{
    loss_from_wins, EvaluationSettings, FailurePolicy, FitnessEvaluator, DEFAULT_SEEDS,
    MAX_OPPONENTS,
};
pub use payload::render_payload;
pub use report::{ReportFormat, SimulationReport};
pub use simulator::{
    SimulationOutput, SimulationRequest, SimulatorCommand, DEFAULT_OPPONENT, DEFAULT_SIMULATOR,
};
