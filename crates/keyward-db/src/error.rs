//! Database-specific error types and conversions.

use std::collections::HashMap;

use keyward_core::error::KeywardError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Malformed row: {0}")]
    Decode(String),

    #[error("Record not found: {entity} {key}")]
    NotFound { entity: String, key: String },

    #[error("Record already exists: {entity} {key}")]
    Conflict { entity: String, key: String },
}

impl DbError {
    /// Classify a failed statement, turning unique-index and duplicate-id
    /// violations into [`DbError::Conflict`].
    pub(crate) fn from_statement(err: impl std::fmt::Display, entity: &str, key: &str) -> Self {
        let message = err.to_string();
        if message.contains("already contains") || message.contains("already exists") {
            DbError::Conflict {
                entity: entity.into(),
                key: key.into(),
            }
        } else {
            DbError::Query(message)
        }
    }

    /// Classify the errors of a failed `BEGIN ... COMMIT` block.
    ///
    /// Guard statements raise `THROW '<entity> <key> still referenced'` or
    /// `THROW '<entity> <key> no longer exists'`; those become
    /// [`DbError::Conflict`] and [`DbError::NotFound`]. The placeholder
    /// errors SurrealDB reports for the statements that were rolled back
    /// are skipped.
    pub(crate) fn from_transaction(
        errors: HashMap<usize, surrealdb::Error>,
        entity: &str,
        key: &str,
    ) -> Option<Self> {
        let mut errors: Vec<(usize, String)> = errors
            .into_iter()
            .map(|(index, err)| (index, err.to_string()))
            .collect();
        errors.sort_by_key(|(index, _)| *index);

        let message = errors
            .iter()
            .map(|(_, message)| message)
            .find(|message| !message.contains("not executed"))
            .or_else(|| errors.first().map(|(_, message)| message))?;

        if let Some((entity, key)) = thrown_subject(message, STILL_REFERENCED) {
            return Some(DbError::Conflict { entity, key });
        }
        if let Some((entity, key)) = thrown_subject(message, NO_LONGER_EXISTS) {
            return Some(DbError::NotFound { entity, key });
        }
        Some(DbError::from_statement(message, entity, key))
    }
}

pub(crate) const STILL_REFERENCED: &str = "still referenced";
pub(crate) const NO_LONGER_EXISTS: &str = "no longer exists";

/// Pull `<entity> <key>` out of a thrown guard message.
fn thrown_subject(message: &str, marker: &str) -> Option<(String, String)> {
    let head = &message[..message.find(marker)?];
    let mut words = head.split_whitespace().rev();
    let key = words.next()?.trim_matches(|c| c == '\'' || c == '"');
    let entity = words.next()?.trim_matches(|c| c == '\'' || c == '"' || c == ':');
    Some((entity.to_string(), key.to_string()))
}

impl From<DbError> for KeywardError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, key } => KeywardError::NotFound { entity, key },
            DbError::Conflict { entity, key } => KeywardError::Conflict { entity, key },
            other => KeywardError::Database(other.to_string()),
        }
    }
}

pub(crate) fn parse_uuid(value: &str, what: &str) -> Result<uuid::Uuid, DbError> {
    uuid::Uuid::parse_str(value).map_err(|e| DbError::Decode(format!("invalid {what} UUID: {e}")))
}
