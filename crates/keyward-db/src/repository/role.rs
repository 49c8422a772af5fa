//! SurrealDB implementation of [`RoleRepository`].

use chrono::{DateTime, Utc};
use keyward_core::error::KeywardResult;
use keyward_core::models::role::{CreateRole, Role};
use keyward_core::repository::{PaginatedResult, Pagination, RoleRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::CountRow;
use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct RoleRow {
    record_id: String,
    name: String,
    description: Option<String>,
    category: String,
    is_system: bool,
    is_active: bool,
    priority: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoleRow {
    fn try_into_role(self) -> Result<Role, DbError> {
        Ok(Role {
            id: parse_uuid(&self.record_id, "role")?,
            name: self.name,
            description: self.description,
            category: self.category,
            is_system: self.is_system,
            is_active: self.is_active,
            priority: self.priority,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn into_roles(rows: Vec<RoleRow>) -> Result<Vec<Role>, DbError> {
    rows.into_iter().map(RoleRow::try_into_role).collect()
}

const SELECT_ROLE: &str = "SELECT meta::id(id) AS record_id, * FROM role";

/// SurrealDB implementation of the Role repository.
#[derive(Clone)]
pub struct SurrealRoleRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealRoleRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn single(&self, query: String, key: &str) -> Result<Role, DbError> {
        let mut result = self
            .db
            .query(query)
            .bind(("key", key.to_string()))
            .await?;
        let rows: Vec<RoleRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound {
                entity: "role".into(),
                key: key.to_string(),
            })?
            .try_into_role()
    }
}

impl<C: Connection> RoleRepository for SurrealRoleRepository<C> {
    async fn create(&self, input: CreateRole) -> KeywardResult<Role> {
        let id_str = Uuid::new_v4().to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('role', $id) SET \
                 name = $name, description = $description, \
                 category = $category, priority = $priority, \
                 is_system = $is_system, is_active = true \
                 RETURN meta::id(id) AS record_id, *",
            )
            .bind(("id", id_str))
            .bind(("name", input.name.clone()))
            .bind(("description", input.description))
            .bind(("category", input.category))
            .bind(("priority", input.priority))
            .bind(("is_system", input.is_system))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement(e, "role", &input.name))?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "role".into(),
            key: input.name,
        })?;

        Ok(row.try_into_role()?)
    }

    async fn get_by_id(&self, id: Uuid) -> KeywardResult<Role> {
        Ok(self
            .single(
                format!("{SELECT_ROLE} WHERE id = type::record('role', $key)"),
                &id.to_string(),
            )
            .await?)
    }

    async fn get_by_name(&self, name: &str) -> KeywardResult<Role> {
        Ok(self
            .single(format!("{SELECT_ROLE} WHERE name = $key"), name)
            .await?)
    }

    async fn get_by_ids(&self, ids: &[Uuid]) -> KeywardResult<Vec<Role>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(Uuid::to_string).collect();

        let mut result = self
            .db
            .query(format!("{SELECT_ROLE} WHERE meta::id(id) IN $ids"))
            .bind(("ids", keys))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        Ok(into_roles(rows)?)
    }

    async fn update(&self, role: &Role) -> KeywardResult<Role> {
        let id_str = role.id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('role', $id) SET \
                 description = $description, category = $category, \
                 priority = $priority, is_active = $is_active, \
                 updated_at = $updated_at \
                 RETURN meta::id(id) AS record_id, *",
            )
            .bind(("id", id_str.clone()))
            .bind(("description", role.description.clone()))
            .bind(("category", role.category.clone()))
            .bind(("priority", role.priority))
            .bind(("is_active", role.is_active))
            .bind(("updated_at", role.updated_at))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "role".into(),
            key: id_str,
        })?;

        Ok(row.try_into_role()?)
    }

    async fn delete(&self, id: Uuid) -> KeywardResult<()> {
        // Bindings and memberships are counted inside the transaction that
        // deletes the role, so neither can be added under a vanishing role.
        let id_str = id.to_string();
        let mut response = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 LET $bound = array::len((SELECT VALUE id FROM role_permission WHERE role_id = $id)) \
                     + array::len((SELECT VALUE id FROM role_assignment WHERE role_id = $id)); \
                 IF $bound > 0 { THROW string::concat('role ', $id, ' still referenced'); }; \
                 DELETE type::record('role', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        match DbError::from_transaction(response.take_errors(), "role", &id_str) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn list(&self, pagination: Pagination) -> KeywardResult<PaginatedResult<Role>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM role GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(format!(
                "{SELECT_ROLE} ORDER BY name ASC LIMIT $limit START $offset"
            ))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;

        Ok(PaginatedResult {
            items: into_roles(rows)?,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn list_by_category(&self, category: &str) -> KeywardResult<Vec<Role>> {
        let mut result = self
            .db
            .query(format!(
                "{SELECT_ROLE} WHERE category = $category ORDER BY name ASC"
            ))
            .bind(("category", category.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        Ok(into_roles(rows)?)
    }

    async fn list_by_priority(&self) -> KeywardResult<Vec<Role>> {
        let mut result = self
            .db
            .query(format!("{SELECT_ROLE} ORDER BY priority DESC, name ASC"))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        Ok(into_roles(rows)?)
    }
}
