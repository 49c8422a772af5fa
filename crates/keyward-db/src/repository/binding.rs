//! SurrealDB implementation of [`BindingRepository`].
//!
//! Role and user bindings live in `role_permission` and `user_permission`
//! under ids derived from their pair, so every write is an UPSERT onto the
//! single row for that pair.

use chrono::{DateTime, Utc};
use keyward_core::error::KeywardResult;
use keyward_core::models::binding::{BindingBatch, RolePermission, UserPermission};
use keyward_core::repository::BindingRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::audit::{AuditRow, CREATE_AUDIT_FIELDS};
use super::{CountRow, pair_key};
use crate::error::{DbError, parse_uuid};

#[derive(Debug, Clone, SurrealValue)]
struct RoleBindingRow {
    key: String,
    role_id: String,
    permission_id: String,
    permission_name: String,
    is_granted: bool,
    expires_at: Option<DateTime<Utc>>,
    granted_by: Option<String>,
    reason: Option<String>,
    swept_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoleBindingRow {
    fn from_binding(b: RolePermission) -> Self {
        Self {
            key: pair_key(b.role_id, b.permission_id),
            role_id: b.role_id.to_string(),
            permission_id: b.permission_id.to_string(),
            permission_name: b.permission_name,
            is_granted: b.is_granted,
            expires_at: b.expires_at,
            granted_by: b.granted_by,
            reason: b.reason,
            swept_at: b.swept_at,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }

    fn try_into_binding(self) -> Result<RolePermission, DbError> {
        Ok(RolePermission {
            role_id: parse_uuid(&self.role_id, "role")?,
            permission_id: parse_uuid(&self.permission_id, "permission")?,
            permission_name: self.permission_name,
            is_granted: self.is_granted,
            expires_at: self.expires_at,
            granted_by: self.granted_by,
            reason: self.reason,
            swept_at: self.swept_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, SurrealValue)]
struct UserBindingRow {
    key: String,
    user_id: String,
    permission_id: String,
    permission_name: String,
    is_granted: bool,
    is_override: bool,
    expires_at: Option<DateTime<Utc>>,
    granted_by: Option<String>,
    reason: Option<String>,
    swept_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserBindingRow {
    fn from_binding(b: UserPermission) -> Self {
        Self {
            key: pair_key(b.user_id, b.permission_id),
            user_id: b.user_id.to_string(),
            permission_id: b.permission_id.to_string(),
            permission_name: b.permission_name,
            is_granted: b.is_granted,
            is_override: b.is_override,
            expires_at: b.expires_at,
            granted_by: b.granted_by,
            reason: b.reason,
            swept_at: b.swept_at,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }

    fn try_into_binding(self) -> Result<UserPermission, DbError> {
        Ok(UserPermission {
            user_id: parse_uuid(&self.user_id, "user")?,
            permission_id: parse_uuid(&self.permission_id, "permission")?,
            permission_name: self.permission_name,
            is_granted: self.is_granted,
            is_override: self.is_override,
            expires_at: self.expires_at,
            granted_by: self.granted_by,
            reason: self.reason,
            swept_at: self.swept_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_ROLE_BINDING: &str = "SELECT meta::id(id) AS key, * FROM role_permission";
const SELECT_USER_BINDING: &str = "SELECT meta::id(id) AS key, * FROM user_permission";

const APPLY_BATCH: &str = "\
BEGIN TRANSACTION;
FOR $id IN array::union($role_bindings.permission_id, $user_bindings.permission_id) {
    IF record::exists(type::record('permission', $id)) = false {
        THROW string::concat('permission ', $id, ' no longer exists');
    };
};
FOR $id IN array::distinct($role_bindings.role_id) {
    IF record::exists(type::record('role', $id)) = false {
        THROW string::concat('role ', $id, ' no longer exists');
    };
};
FOR $b IN $role_bindings {
    UPSERT type::record('role_permission', $b.key) SET
        role_id = $b.role_id, permission_id = $b.permission_id,
        permission_name = $b.permission_name, is_granted = $b.is_granted,
        expires_at = $b.expires_at, granted_by = $b.granted_by,
        reason = $b.reason, swept_at = $b.swept_at,
        created_at = $b.created_at, updated_at = $b.updated_at;
};
FOR $b IN $user_bindings {
    UPSERT type::record('user_permission', $b.key) SET
        user_id = $b.user_id, permission_id = $b.permission_id,
        permission_name = $b.permission_name, is_granted = $b.is_granted,
        is_override = $b.is_override, expires_at = $b.expires_at,
        granted_by = $b.granted_by, reason = $b.reason,
        swept_at = $b.swept_at, created_at = $b.created_at,
        updated_at = $b.updated_at;
};
FOR $a IN $audit {
    CREATE type::record('permission_audit', $a.record_id) SET ";

/// SurrealDB implementation of the binding repository.
#[derive(Clone)]
pub struct SurrealBindingRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealBindingRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn role_rows(
        &self,
        query: String,
        key: &'static str,
        value: impl SurrealValue + 'static,
    ) -> Result<Vec<RolePermission>, DbError> {
        let mut result = self.db.query(query).bind((key, value)).await?;
        let rows: Vec<RoleBindingRow> = result.take(0)?;
        rows.into_iter()
            .map(RoleBindingRow::try_into_binding)
            .collect()
    }

    async fn user_rows(
        &self,
        query: String,
        key: &'static str,
        value: impl SurrealValue + 'static,
    ) -> Result<Vec<UserPermission>, DbError> {
        let mut result = self.db.query(query).bind((key, value)).await?;
        let rows: Vec<UserBindingRow> = result.take(0)?;
        rows.into_iter()
            .map(UserBindingRow::try_into_binding)
            .collect()
    }
}

impl<C: Connection> BindingRepository for SurrealBindingRepository<C> {
    async fn role_binding(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> KeywardResult<Option<RolePermission>> {
        let rows = self
            .role_rows(
                format!("{SELECT_ROLE_BINDING} WHERE id = type::record('role_permission', $key)"),
                "key",
                pair_key(role_id, permission_id),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn user_binding(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
    ) -> KeywardResult<Option<UserPermission>> {
        let rows = self
            .user_rows(
                format!("{SELECT_USER_BINDING} WHERE id = type::record('user_permission', $key)"),
                "key",
                pair_key(user_id, permission_id),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn role_bindings_for_roles(&self, role_ids: &[Uuid]) -> KeywardResult<Vec<RolePermission>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = role_ids.iter().map(Uuid::to_string).collect();
        Ok(self
            .role_rows(
                format!("{SELECT_ROLE_BINDING} WHERE role_id IN $role_ids"),
                "role_ids",
                ids,
            )
            .await?)
    }

    async fn user_bindings(&self, user_id: Uuid) -> KeywardResult<Vec<UserPermission>> {
        Ok(self
            .user_rows(
                format!("{SELECT_USER_BINDING} WHERE user_id = $user_id"),
                "user_id",
                user_id.to_string(),
            )
            .await?)
    }

    async fn role_bindings_for_permission(
        &self,
        permission_id: Uuid,
    ) -> KeywardResult<Vec<RolePermission>> {
        Ok(self
            .role_rows(
                format!("{SELECT_ROLE_BINDING} WHERE permission_id = $permission_id"),
                "permission_id",
                permission_id.to_string(),
            )
            .await?)
    }

    async fn count_for_permission(&self, permission_id: Uuid) -> KeywardResult<u64> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM role_permission \
                 WHERE permission_id = $permission_id GROUP ALL; \
                 SELECT count() AS total FROM user_permission \
                 WHERE permission_id = $permission_id GROUP ALL;",
            )
            .bind(("permission_id", permission_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let roles: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let users: Vec<CountRow> = result.take(1).map_err(DbError::from)?;
        Ok(roles.first().map(|r| r.total).unwrap_or(0) + users.first().map(|r| r.total).unwrap_or(0))
    }

    async fn count_for_role(&self, role_id: Uuid) -> KeywardResult<u64> {
        let mut result = self
            .db
            .query("SELECT count() AS total FROM role_permission WHERE role_id = $role_id GROUP ALL")
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }

    async fn pending_role_expirations(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> KeywardResult<Vec<RolePermission>> {
        let mut result = self
            .db
            .query(format!(
                "{SELECT_ROLE_BINDING} WHERE is_granted = true \
                 AND expires_at != NONE AND expires_at <= $now \
                 AND swept_at = NONE ORDER BY expires_at ASC LIMIT $limit"
            ))
            .bind(("now", now))
            .bind(("limit", limit))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleBindingRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(RoleBindingRow::try_into_binding)
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn pending_user_expirations(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> KeywardResult<Vec<UserPermission>> {
        let mut result = self
            .db
            .query(format!(
                "{SELECT_USER_BINDING} WHERE is_granted = true \
                 AND expires_at != NONE AND expires_at <= $now \
                 AND swept_at = NONE ORDER BY expires_at ASC LIMIT $limit"
            ))
            .bind(("now", now))
            .bind(("limit", limit))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserBindingRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(UserBindingRow::try_into_binding)
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn apply(&self, batch: BindingBatch) -> KeywardResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let role_bindings: Vec<RoleBindingRow> = batch
            .role_bindings
            .into_iter()
            .map(RoleBindingRow::from_binding)
            .collect();
        let user_bindings: Vec<UserBindingRow> = batch
            .user_bindings
            .into_iter()
            .map(UserBindingRow::from_binding)
            .collect();
        let audit: Vec<AuditRow> = batch.audit.into_iter().map(AuditRow::new).collect();

        debug!(
            role_bindings = role_bindings.len(),
            user_bindings = user_bindings.len(),
            audit = audit.len(),
            "Applying binding batch"
        );

        // Every permission and role the batch binds is checked inside the
        // transaction; a concurrent delete fails the whole batch.
        let mut response = self
            .db
            .query(format!(
                "{APPLY_BATCH}{CREATE_AUDIT_FIELDS};\n}};\nCOMMIT TRANSACTION;"
            ))
            .bind(("role_bindings", role_bindings))
            .bind(("user_bindings", user_bindings))
            .bind(("audit", audit))
            .await
            .map_err(DbError::from)?;

        match DbError::from_transaction(response.take_errors(), "binding_batch", "apply") {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
