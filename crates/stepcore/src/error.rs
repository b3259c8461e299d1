use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the engine itself, as opposed to failures of user code
/// which are recorded on the step and never escape a handler.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Execution exceeded the deadline of {timeout_secs}s")]
    DeadlineExceeded { timeout_secs: u64 },

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported action type: {0}")]
    UnsupportedActionType(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Variable resolution failed: {0}")]
    Resolution(String),

    #[error("Internal engine error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Classify the error for the FAILED verdict response.
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::DeadlineExceeded { .. } => FailureKind::DeadlineExceeded,
            EngineError::Condition(_)
            | EngineError::Configuration(_)
            | EngineError::UnsupportedActionType(_)
            | EngineError::StepNotFound(_) => FailureKind::Configuration,
            EngineError::Resolution(_) => FailureKind::StepFailed,
            EngineError::Store(_) | EngineError::Internal(_) | EngineError::Serialization(_) => {
                FailureKind::Internal
            }
        }
    }
}

/// Failures of the condition language shared by Branch and Split.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Malformed conditions: {0}")]
    Malformed(String),
}

/// Failure of user logic (code module or integration action).
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("{0}")]
    Execution(String),

    #[error("Invalid input for '{field}': {message}")]
    InvalidInput { field: String, message: String },

    #[error("Action not found: {block}@{version}/{action}")]
    ActionNotFound {
        block: String,
        version: String,
        action: String,
    },

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Store backend failure: {0}")]
    Backend(String),

    #[error("Stored value for '{key}' is malformed: {message}")]
    Malformed { key: String, message: String },
}

#[derive(Error, Debug, Clone)]
#[error("Progress update failed: {0}")]
pub struct ProgressError(pub String);

/// Why a run ended FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// User code or an integration failed; subject to retry policy.
    StepFailed,
    Configuration,
    DeadlineExceeded,
    Internal,
}
