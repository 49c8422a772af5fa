//! Error types for the Keyward system.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeywardError {
    #[error("Entity not found: {entity} {key}")]
    NotFound { entity: String, key: String },

    #[error("Entity already exists: {entity} {key}")]
    Conflict { entity: String, key: String },

    #[error("Invalid operation: {reason}")]
    InvalidOperation { reason: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Operation timed out before commit")]
    Timeout,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeywardError {
    pub fn not_found(entity: &str, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    pub fn conflict(entity: &str, key: impl ToString) -> Self {
        Self::Conflict {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

pub type KeywardResult<T> = Result<T, KeywardError>;
