//! SurrealDB implementation of [`RoleMembershipRepository`].

use chrono::{DateTime, Utc};
use keyward_core::error::KeywardResult;
use keyward_core::models::role::RoleAssignment;
use keyward_core::repository::RoleMembershipRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::pair_key;
use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct AssignmentRow {
    user_id: String,
    role_id: String,
    assigned_by: Option<String>,
    assigned_at: DateTime<Utc>,
}

/// SurrealDB implementation of role membership.
#[derive(Clone)]
pub struct SurrealMembershipRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealMembershipRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> RoleMembershipRepository for SurrealMembershipRepository<C> {
    async fn assign(&self, assignment: RoleAssignment) -> KeywardResult<bool> {
        let key = pair_key(assignment.user_id, assignment.role_id);

        let mut result = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 IF record::exists(type::record('role', $role_id)) = false { \
                     THROW string::concat('role ', $role_id, ' no longer exists'); \
                 }; \
                 CREATE type::record('role_assignment', $id) SET \
                 user_id = $user_id, role_id = $role_id, \
                 assigned_by = $assigned_by, assigned_at = $assigned_at; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", key.clone()))
            .bind(("user_id", assignment.user_id.to_string()))
            .bind(("role_id", assignment.role_id.to_string()))
            .bind(("assigned_by", assignment.assigned_by))
            .bind(("assigned_at", assignment.assigned_at))
            .await
            .map_err(DbError::from)?;

        match DbError::from_transaction(result.take_errors(), "role_assignment", &key) {
            None => Ok(true),
            Some(DbError::Conflict { .. }) => Ok(false),
            Some(other) => Err(other.into()),
        }
    }

    async fn unassign(&self, user_id: Uuid, role_id: Uuid) -> KeywardResult<bool> {
        let mut result = self
            .db
            .query("DELETE type::record('role_assignment', $id) RETURN BEFORE")
            .bind(("id", pair_key(user_id, role_id)))
            .await
            .map_err(DbError::from)?;

        let removed: Vec<AssignmentRow> = result.take(0).map_err(DbError::from)?;
        let Some(row) = removed.first() else {
            return Ok(false);
        };
        debug!(
            user_id = %row.user_id,
            role_id = %row.role_id,
            assigned_by = ?row.assigned_by,
            assigned_at = %row.assigned_at,
            "Removed role assignment"
        );
        Ok(true)
    }

    async fn role_ids_for_user(&self, user_id: Uuid) -> KeywardResult<Vec<Uuid>> {
        let mut result = self
            .db
            .query("SELECT VALUE role_id FROM role_assignment WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let ids: Vec<String> = result.take(0).map_err(DbError::from)?;
        Ok(ids
            .iter()
            .map(|id| parse_uuid(id, "role"))
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn user_ids_for_role(&self, role_id: Uuid) -> KeywardResult<Vec<Uuid>> {
        let mut result = self
            .db
            .query("SELECT VALUE user_id FROM role_assignment WHERE role_id = $role_id")
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let ids: Vec<String> = result.take(0).map_err(DbError::from)?;
        Ok(ids
            .iter()
            .map(|id| parse_uuid(id, "user"))
            .collect::<Result<Vec<_>, DbError>>()?)
    }
}
