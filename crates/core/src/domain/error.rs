// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid priority: {0} (expected 1 = high or 2 = low)")]
    InvalidPriority(i64),

    #[error("Invalid queue config: {0}")]
    InvalidQueueConfig(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
