use thiserror::Error;

/// Main error type for snork-hpo
#[derive(Error, Debug)]
pub enum HpoError {
    #[error("Search space error: {0}")]
    Space(#[from] SpaceError),

    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Search space definition and membership errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpaceError {
    #[error("Duplicate parameter: {name}")]
    DuplicateParameter { name: String },

    #[error("Invalid bounds for {name}: {message}")]
    InvalidBounds { name: String, message: String },

    #[error("Default value of {name} is outside its domain: {value}")]
    DefaultOutOfBounds { name: String, value: String },

    #[error("Invalid condition on {name}: {message}")]
    InvalidCondition { name: String, message: String },

    #[error("Active parameter missing from configuration: {name}")]
    MissingParameter { name: String },

    #[error("Inactive parameter present in configuration: {name}")]
    InactiveParameter { name: String },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Value of {name} is outside its domain: {value}")]
    ValueOutOfBounds { name: String, value: String },

    #[error("Type mismatch for {name}: expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },
}

/// Errors raised while running the external simulator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Simulator exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Errors raised while reading the simulator's result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportError {
    #[error("Missing field {field} in {format} output")]
    MissingField { field: String, format: String },

    #[error("Invalid number for {field}: {value:?}")]
    InvalidNumber { field: String, value: String },

    #[error("Won {wins} games out of {games}")]
    WinsExceedGames { wins: u64, games: u64 },
}

/// Result type alias for snork-hpo operations
pub type HpoResult<T> = Result<T, HpoError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HpoError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HpoError::Config(format!($($arg)*))
    };
}
