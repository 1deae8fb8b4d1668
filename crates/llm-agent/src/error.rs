use batchwave_core::BatchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Process error: {0}")]
    Process(String),

    #[error(transparent)]
    Core(#[from] BatchError),

    #[error("Task join error: {0}")]
    Join(String),
}
