// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Payload must be a JSON object, got {0}")]
    InvalidPayload(String),

    #[error("Invalid module descriptor {key}: {reason}")]
    InvalidDescriptor { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DomainError>;
