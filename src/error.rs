use thiserror::Error;

use crate::calibration::schema::FieldError;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Already running")]
    AlreadyRunning,

    #[error("Invalid input: {} field error(s)", .0.len())]
    InvalidInput(Vec<FieldError>),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
