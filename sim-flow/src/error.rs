use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Stage execution failed: {0}")]
    StageExecutionFailed(String),
}
