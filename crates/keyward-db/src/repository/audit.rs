//! SurrealDB implementation of [`AuditLogRepository`].
//!
//! The `permission_audit` table is append-only; its table permissions
//! reject UPDATE and DELETE.

use chrono::{DateTime, Utc};
use keyward_core::error::KeywardResult;
use keyward_core::models::audit::{AuditAction, AuditRecord, CreateAuditRecord};
use keyward_core::repository::{AuditFilter, AuditLogRepository, PaginatedResult, Pagination};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::CountRow;
use crate::error::{DbError, parse_uuid};

/// Stored shape of an audit record. Also written in bulk by the binding
/// repository inside its transaction.
#[derive(Debug, Clone, SurrealValue)]
pub(super) struct AuditRow {
    pub(super) record_id: String,
    pub(super) user_id: Option<String>,
    pub(super) role_id: Option<String>,
    pub(super) permission_name: String,
    pub(super) action: String,
    pub(super) performed_by: Option<String>,
    pub(super) reason: Option<String>,
    pub(super) performed_at: DateTime<Utc>,
    pub(super) metadata: serde_json::Value,
}

impl AuditRow {
    pub(super) fn new(input: CreateAuditRecord) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            user_id: input.user_id.map(|id| id.to_string()),
            role_id: input.role_id.map(|id| id.to_string()),
            permission_name: input.permission_name,
            action: input.action.as_str().to_string(),
            performed_by: input.performed_by,
            reason: input.reason,
            performed_at: input.performed_at,
            metadata: input.metadata,
        }
    }

    fn try_into_record(self) -> Result<AuditRecord, DbError> {
        let action = AuditAction::parse(&self.action)
            .ok_or_else(|| DbError::Decode(format!("unknown audit action '{}'", self.action)))?;
        Ok(AuditRecord {
            id: parse_uuid(&self.record_id, "audit")?,
            user_id: self
                .user_id
                .as_deref()
                .map(|id| parse_uuid(id, "user"))
                .transpose()?,
            role_id: self
                .role_id
                .as_deref()
                .map(|id| parse_uuid(id, "role"))
                .transpose()?,
            permission_name: self.permission_name,
            action,
            performed_by: self.performed_by,
            reason: self.reason,
            performed_at: self.performed_at,
            metadata: self.metadata,
        })
    }
}

/// Statement body shared by single appends and batched transactions.
pub(super) const CREATE_AUDIT_FIELDS: &str = "\
    user_id = $a.user_id, role_id = $a.role_id, \
    permission_name = $a.permission_name, action = $a.action, \
    performed_by = $a.performed_by, reason = $a.reason, \
    performed_at = $a.performed_at, metadata = $a.metadata";

/// SurrealDB implementation of the audit log.
#[derive(Clone)]
pub struct SurrealAuditLogRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuditLogRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

/// Build the WHERE clause for a filter. Values are bound separately.
fn where_clause(filter: &AuditFilter) -> String {
    let mut conditions = Vec::new();
    if filter.user_id.is_some() {
        conditions.push("user_id = $user_id");
    }
    if filter.role_id.is_some() {
        conditions.push("role_id = $role_id");
    }
    if filter.permission_name.is_some() {
        conditions.push("permission_name = $permission_name");
    }
    if filter.action.is_some() {
        conditions.push("action = $action");
    }
    if filter.from.is_some() {
        conditions.push("performed_at >= $from");
    }
    if filter.to.is_some() {
        conditions.push("performed_at < $to");
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

impl<C: Connection> AuditLogRepository for SurrealAuditLogRepository<C> {
    async fn append(&self, input: CreateAuditRecord) -> KeywardResult<AuditRecord> {
        let row = AuditRow::new(input);

        let result = self
            .db
            .query(format!(
                "CREATE type::record('permission_audit', $a.record_id) SET \
                 {CREATE_AUDIT_FIELDS} \
                 RETURN meta::id(id) AS record_id, *"
            ))
            .bind(("a", row))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<AuditRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| {
            DbError::Query("audit append returned no record".into())
        })?;

        Ok(row.try_into_record()?)
    }

    async fn list(
        &self,
        filter: AuditFilter,
        pagination: Pagination,
    ) -> KeywardResult<PaginatedResult<AuditRecord>> {
        let clause = where_clause(&filter);

        let mut result = self
            .db
            .query(format!(
                "SELECT count() AS total FROM permission_audit{clause} GROUP ALL; \
                 SELECT meta::id(id) AS record_id, * FROM permission_audit{clause} \
                 ORDER BY performed_at DESC LIMIT $limit START $offset;"
            ))
            .bind(("user_id", filter.user_id.map(|id| id.to_string())))
            .bind(("role_id", filter.role_id.map(|id| id.to_string())))
            .bind(("permission_name", filter.permission_name))
            .bind(("action", filter.action.map(|a| a.as_str().to_string())))
            .bind(("from", filter.from))
            .bind(("to", filter.to))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let count_rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let rows: Vec<AuditRow> = result.take(1).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(AuditRow::try_into_record)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_has_no_where_clause() {
        assert_eq!(where_clause(&AuditFilter::default()), "");
    }

    #[test]
    fn time_window_is_half_open() {
        let filter = AuditFilter {
            from: Some(Utc::now()),
            to: Some(Utc::now()),
            action: Some(AuditAction::Expire),
            ..Default::default()
        };
        assert_eq!(
            where_clause(&filter),
            " WHERE action = $action AND performed_at >= $from AND performed_at < $to"
        );
    }
}
