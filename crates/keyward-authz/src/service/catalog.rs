//! Permission catalog operations.

use std::collections::BTreeMap;

use chrono::Utc;
use keyward_core::error::KeywardResult;
use keyward_core::models::permission::{CreatePermission, Permission};
use keyward_core::repository::{
    BindingRepository, PaginatedResult, Pagination, PermissionRepository, Store,
};
use tracing::info;
use uuid::Uuid;

use super::AuthzService;
use crate::cache::PermissionCache;
use crate::error::AuthzError;

impl<S: Store, C: PermissionCache> AuthzService<S, C> {
    pub async fn create_permission(&self, input: CreatePermission) -> KeywardResult<Permission> {
        input.validate()?;
        let permission = self.store.permissions().create(input).await?;
        info!(
            permission = %permission.name,
            category = %permission.category,
            system = permission.is_system,
            "Permission created"
        );
        Ok(permission)
    }

    pub async fn update_permission_details(
        &self,
        id: Uuid,
        display_name: String,
        description: Option<String>,
    ) -> KeywardResult<Permission> {
        let mut permission = self.store.permissions().get_by_id(id).await?;
        permission.update_details(display_name, description, Utc::now())?;
        self.store.permissions().update(&permission).await
    }

    pub async fn activate_permission(&self, id: Uuid) -> KeywardResult<Permission> {
        self.set_permission_active(id, true).await
    }

    pub async fn deactivate_permission(&self, id: Uuid) -> KeywardResult<Permission> {
        self.set_permission_active(id, false).await
    }

    async fn set_permission_active(&self, id: Uuid, active: bool) -> KeywardResult<Permission> {
        let mut permission = self.store.permissions().get_by_id(id).await?;
        if active {
            permission.activate(Utc::now())?;
        } else {
            permission.deactivate(Utc::now())?;
        }
        let permission = self.store.permissions().update(&permission).await?;
        self.invalidate_everyone();
        info!(permission = %permission.name, active, "Permission activation changed");
        Ok(permission)
    }

    pub async fn permission_exists(&self, name: &str) -> KeywardResult<bool> {
        self.store.permissions().exists(name).await
    }

    pub async fn get_permission(&self, id: Uuid) -> KeywardResult<Permission> {
        self.store.permissions().get_by_id(id).await
    }

    pub async fn get_permission_by_name(&self, name: &str) -> KeywardResult<Permission> {
        self.store.permissions().get_by_name(name).await
    }

    pub async fn permissions_by_category(&self, category: &str) -> KeywardResult<Vec<Permission>> {
        self.store.permissions().list_by_category(category).await
    }

    pub async fn list_permissions(
        &self,
        pagination: Pagination,
    ) -> KeywardResult<PaginatedResult<Permission>> {
        self.store.permissions().list(pagination).await
    }

    /// Physically delete a permission nothing references.
    pub async fn delete_permission(&self, id: Uuid) -> KeywardResult<()> {
        let permission = self.store.permissions().get_by_id(id).await?;
        permission.ensure_deletable()?;

        let references = self.store.bindings().count_for_permission(id).await?;
        if references > 0 {
            return Err(AuthzError::StillReferenced {
                entity: format!("permission '{}'", permission.name),
                count: references,
            }
            .into());
        }

        // The store repeats the reference check inside the delete
        // transaction and reports a late reference as `Conflict`.
        self.store.permissions().delete(id).await?;
        self.invalidate_everyone();
        info!(permission = %permission.name, "Permission deleted");
        Ok(())
    }

    /// Category -> permission names, both sorted.
    pub async fn permission_categories(&self) -> KeywardResult<BTreeMap<String, Vec<String>>> {
        let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for permission in self.store.permissions().list_all().await? {
            categories
                .entry(permission.category)
                .or_default()
                .push(permission.name);
        }
        for names in categories.values_mut() {
            names.sort();
        }
        Ok(categories)
    }

    pub async fn permission_count_by_category(&self) -> KeywardResult<BTreeMap<String, usize>> {
        Ok(self
            .permission_categories()
            .await?
            .into_iter()
            .map(|(category, names)| (category, names.len()))
            .collect())
    }
}
