//! SurrealDB implementation of [`PermissionRepository`].

use chrono::{DateTime, Utc};
use keyward_core::error::KeywardResult;
use keyward_core::models::permission::{CreatePermission, Permission};
use keyward_core::repository::{PaginatedResult, Pagination, PermissionRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::CountRow;
use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct PermissionRow {
    record_id: String,
    name: String,
    display_name: String,
    description: Option<String>,
    category: String,
    is_system: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PermissionRow {
    fn try_into_permission(self) -> Result<Permission, DbError> {
        Ok(Permission {
            id: parse_uuid(&self.record_id, "permission")?,
            name: self.name,
            display_name: self.display_name,
            description: self.description,
            category: self.category,
            is_system: self.is_system,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_PERMISSION: &str = "SELECT meta::id(id) AS record_id, * FROM permission";

/// SurrealDB implementation of the Permission repository.
#[derive(Clone)]
pub struct SurrealPermissionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPermissionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn fetch_many(
        &self,
        query: String,
        bindings: Vec<(&'static str, String)>,
    ) -> Result<Vec<Permission>, DbError> {
        let mut builder = self.db.query(query);
        for binding in bindings {
            builder = builder.bind(binding);
        }
        let mut result = builder.await?;
        let rows: Vec<PermissionRow> = result.take(0)?;
        rows.into_iter()
            .map(PermissionRow::try_into_permission)
            .collect()
    }
}

impl<C: Connection> PermissionRepository for SurrealPermissionRepository<C> {
    async fn create(&self, input: CreatePermission) -> KeywardResult<Permission> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('permission', $id) SET \
                 name = $name, display_name = $display_name, \
                 description = $description, category = $category, \
                 is_system = $is_system, is_active = true \
                 RETURN meta::id(id) AS record_id, *",
            )
            .bind(("id", id_str))
            .bind(("name", input.name.clone()))
            .bind(("display_name", input.display_name))
            .bind(("description", input.description))
            .bind(("category", input.category))
            .bind(("is_system", input.is_system))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement(e, "permission", &input.name))?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "permission".into(),
            key: input.name,
        })?;

        Ok(row.try_into_permission()?)
    }

    async fn get_by_id(&self, id: Uuid) -> KeywardResult<Permission> {
        let id_str = id.to_string();
        let found = self
            .fetch_many(
                format!("{SELECT_PERMISSION} WHERE id = type::record('permission', $id)"),
                vec![("id", id_str.clone())],
            )
            .await?;

        found.into_iter().next().ok_or_else(|| {
            DbError::NotFound {
                entity: "permission".into(),
                key: id_str,
            }
            .into()
        })
    }

    async fn get_by_name(&self, name: &str) -> KeywardResult<Permission> {
        let found = self
            .fetch_many(
                format!("{SELECT_PERMISSION} WHERE name = $name"),
                vec![("name", name.to_string())],
            )
            .await?;

        found.into_iter().next().ok_or_else(|| {
            DbError::NotFound {
                entity: "permission".into(),
                key: name.to_string(),
            }
            .into()
        })
    }

    async fn get_by_names(&self, names: &[String]) -> KeywardResult<Vec<Permission>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut result = self
            .db
            .query(format!("{SELECT_PERMISSION} WHERE name IN $names"))
            .bind(("names", names.to_vec()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(PermissionRow::try_into_permission)
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn exists(&self, name: &str) -> KeywardResult<bool> {
        let mut result = self
            .db
            .query("SELECT count() AS total FROM permission WHERE name = $name GROUP ALL")
            .bind(("name", name.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().is_some_and(|r| r.total > 0))
    }

    async fn update(&self, permission: &Permission) -> KeywardResult<Permission> {
        let id_str = permission.id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('permission', $id) SET \
                 display_name = $display_name, description = $description, \
                 is_active = $is_active, updated_at = $updated_at \
                 RETURN meta::id(id) AS record_id, *",
            )
            .bind(("id", id_str.clone()))
            .bind(("display_name", permission.display_name.clone()))
            .bind(("description", permission.description.clone()))
            .bind(("is_active", permission.is_active))
            .bind(("updated_at", permission.updated_at))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "permission".into(),
            key: id_str,
        })?;

        Ok(row.try_into_permission()?)
    }

    async fn delete(&self, id: Uuid) -> KeywardResult<()> {
        // The reference count and the delete share one transaction so a
        // concurrent grant cannot bind a permission that is going away.
        let id_str = id.to_string();
        let mut response = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 LET $bound = array::len((SELECT VALUE id FROM role_permission WHERE permission_id = $id)) \
                     + array::len((SELECT VALUE id FROM user_permission WHERE permission_id = $id)); \
                 IF $bound > 0 { THROW string::concat('permission ', $id, ' still referenced'); }; \
                 DELETE type::record('permission', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        match DbError::from_transaction(response.take_errors(), "permission", &id_str) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn list(&self, pagination: Pagination) -> KeywardResult<PaginatedResult<Permission>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM permission GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(format!(
                "{SELECT_PERMISSION} ORDER BY name ASC LIMIT $limit START $offset"
            ))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(PermissionRow::try_into_permission)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn list_all(&self) -> KeywardResult<Vec<Permission>> {
        Ok(self
            .fetch_many(format!("{SELECT_PERMISSION} ORDER BY name ASC"), vec![])
            .await?)
    }

    async fn list_by_category(&self, category: &str) -> KeywardResult<Vec<Permission>> {
        Ok(self
            .fetch_many(
                format!("{SELECT_PERMISSION} WHERE category = $category ORDER BY name ASC"),
                vec![("category", category.to_string())],
            )
            .await?)
    }

    async fn inactive_names(&self) -> KeywardResult<Vec<String>> {
        let mut result = self
            .db
            .query("SELECT VALUE name FROM permission WHERE is_active = false")
            .await
            .map_err(DbError::from)?;

        let names: Vec<String> = result.take(0).map_err(DbError::from)?;
        Ok(names)
    }
}
