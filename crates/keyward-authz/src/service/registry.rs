//! Role registry and role membership operations.

use chrono::Utc;
use keyward_core::error::{KeywardError, KeywardResult};
use keyward_core::models::role::{CreateRole, Role, RoleAssignment};
use keyward_core::repository::{
    BindingRepository, PaginatedResult, Pagination, RoleMembershipRepository, RoleRepository,
    Store,
};
use tracing::info;
use uuid::Uuid;

use super::AuthzService;
use crate::cache::PermissionCache;
use crate::error::AuthzError;

impl<S: Store, C: PermissionCache> AuthzService<S, C> {
    pub async fn create_role(&self, input: CreateRole) -> KeywardResult<Role> {
        input.validate()?;
        let role = self.store.roles().create(input).await?;
        info!(
            role = %role.name,
            role_id = %role.id,
            priority = role.priority,
            "Role created"
        );
        Ok(role)
    }

    pub async fn update_role_details(
        &self,
        id: Uuid,
        description: Option<String>,
        category: String,
    ) -> KeywardResult<Role> {
        let mut role = self.store.roles().get_by_id(id).await?;
        role.update_details(description, category, Utc::now())?;
        self.store.roles().update(&role).await
    }

    /// Priority decides role conflicts, so every member is invalidated.
    pub async fn update_role_priority(&self, id: Uuid, priority: i32) -> KeywardResult<Role> {
        let mut role = self.store.roles().get_by_id(id).await?;
        role.update_priority(priority, Utc::now())?;
        let role = self.store.roles().update(&role).await?;
        self.invalidate_role_members(id).await;
        info!(role = %role.name, priority, "Role priority changed");
        Ok(role)
    }

    pub async fn activate_role(&self, id: Uuid) -> KeywardResult<Role> {
        self.set_role_active(id, true).await
    }

    pub async fn deactivate_role(&self, id: Uuid) -> KeywardResult<Role> {
        self.set_role_active(id, false).await
    }

    async fn set_role_active(&self, id: Uuid, active: bool) -> KeywardResult<Role> {
        let mut role = self.store.roles().get_by_id(id).await?;
        if active {
            role.activate(Utc::now())?;
        } else {
            role.deactivate(Utc::now())?;
        }
        let role = self.store.roles().update(&role).await?;
        self.invalidate_everyone();
        info!(role = %role.name, active, "Role activation changed");
        Ok(role)
    }

    pub async fn get_role(&self, id: Uuid) -> KeywardResult<Role> {
        self.store.roles().get_by_id(id).await
    }

    pub async fn get_role_by_name(&self, name: &str) -> KeywardResult<Role> {
        self.store.roles().get_by_name(name).await
    }

    pub async fn role_exists(&self, name: &str) -> KeywardResult<bool> {
        match self.store.roles().get_by_name(name).await {
            Ok(_) => Ok(true),
            Err(KeywardError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn roles_by_category(&self, category: &str) -> KeywardResult<Vec<Role>> {
        self.store.roles().list_by_category(category).await
    }

    pub async fn list_roles(&self, pagination: Pagination) -> KeywardResult<PaginatedResult<Role>> {
        self.store.roles().list(pagination).await
    }

    /// Highest priority first.
    pub async fn roles_by_priority(&self) -> KeywardResult<Vec<Role>> {
        self.store.roles().list_by_priority().await
    }

    /// Physically delete a role nobody holds and no binding references.
    pub async fn delete_role(&self, id: Uuid) -> KeywardResult<()> {
        let role = self.store.roles().get_by_id(id).await?;
        role.ensure_deletable()?;

        let members = self.store.memberships().user_ids_for_role(id).await?.len() as u64;
        let bindings = self.store.bindings().count_for_role(id).await?;
        if members + bindings > 0 {
            return Err(AuthzError::StillReferenced {
                entity: format!("role '{}'", role.name),
                count: members + bindings,
            }
            .into());
        }

        // The store repeats the reference check inside the delete
        // transaction and reports a late reference as `Conflict`.
        self.store.roles().delete(id).await?;
        info!(role = %role.name, "Role deleted");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------

    /// Returns `false` if the user already held the role.
    pub async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        assigned_by: Option<String>,
    ) -> KeywardResult<bool> {
        let role = self.store.roles().get_by_id(role_id).await?;
        let assigned = self
            .store
            .memberships()
            .assign(RoleAssignment {
                user_id,
                role_id,
                assigned_by,
                assigned_at: Utc::now(),
            })
            .await?;

        if assigned {
            self.invalidate_user(user_id).await;
            info!(%user_id, role = %role.name, "Role assigned");
        }
        Ok(assigned)
    }

    /// Returns `false` if the user did not hold the role.
    pub async fn unassign_role(&self, user_id: Uuid, role_id: Uuid) -> KeywardResult<bool> {
        let removed = self.store.memberships().unassign(user_id, role_id).await?;
        if removed {
            self.invalidate_user(user_id).await;
            info!(%user_id, %role_id, "Role unassigned");
        }
        Ok(removed)
    }

    pub async fn user_role_ids(&self, user_id: Uuid) -> KeywardResult<Vec<Uuid>> {
        self.store.memberships().role_ids_for_user(user_id).await
    }

    /// The user's active role with the highest priority.
    pub async fn highest_priority_role(&self, user_id: Uuid) -> KeywardResult<Option<Role>> {
        let role_ids = self.user_role_ids(user_id).await?;
        let roles = self.store.roles().get_by_ids(&role_ids).await?;
        Ok(roles
            .into_iter()
            .filter(|r| r.is_active)
            .max_by(|a, b| a.priority.cmp(&b.priority).then_with(|| b.name.cmp(&a.name))))
    }
}
