use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCode {
    Io,
    InvalidConfig,
    CheckpointInProgress,
    Unavailable,
}

impl EngineErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineErrorCode::Io => "io",
            EngineErrorCode::InvalidConfig => "invalid_config",
            EngineErrorCode::CheckpointInProgress => "checkpoint_in_progress",
            EngineErrorCode::Unavailable => "unavailable",
        }
    }
}

/// Store-level failures. Data operations never return these; their outcome
/// travels as a [`crate::Status`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("checkpoint in progress")]
    CheckpointInProgress,
    #[error("resource unavailable: {message}")]
    Unavailable { message: String },
}

impl EngineError {
    pub fn code(&self) -> EngineErrorCode {
        match self {
            EngineError::Io(_) => EngineErrorCode::Io,
            EngineError::InvalidConfig { .. } => EngineErrorCode::InvalidConfig,
            EngineError::CheckpointInProgress => EngineErrorCode::CheckpointInProgress,
            EngineError::Unavailable { .. } => EngineErrorCode::Unavailable,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}

/// Failure reported by an application strategy callback. Terminal for the
/// operation that invoked it and delivered verbatim through its completion.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct FunctionError {
    pub message: String,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Terminal failure of a single operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("application failure: {0}")]
    Application(FunctionError),
    #[error("device read failed: {0}")]
    Io(String),
}

impl From<FunctionError> for OperationError {
    fn from(err: FunctionError) -> Self {
        OperationError::Application(err)
    }
}
