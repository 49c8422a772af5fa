//! Authorization error types.

use keyward_core::error::KeywardError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("unknown permission '{0}'")]
    UnknownPermission(String),

    #[error("permission '{0}' is inactive")]
    InactivePermission(String),

    #[error("bulk request names no permissions")]
    EmptyRequest,

    #[error("{entity} is still referenced by {count} record(s)")]
    StillReferenced { entity: String, count: u64 },

    #[error("bulk operation timed out before commit")]
    BulkTimeout,
}

impl From<AuthzError> for KeywardError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::UnknownPermission(name) => KeywardError::not_found("permission", name),
            AuthzError::InactivePermission(_) => {
                KeywardError::InvalidOperation {
                    reason: err.to_string(),
                }
            }
            AuthzError::EmptyRequest => KeywardError::Validation {
                message: err.to_string(),
            },
            AuthzError::StillReferenced { ref entity, .. } => KeywardError::Conflict {
                entity: entity.clone(),
                key: err.to_string(),
            },
            AuthzError::BulkTimeout => KeywardError::Timeout,
        }
    }
}
