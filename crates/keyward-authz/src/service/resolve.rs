//! Permission checks.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use keyward_core::error::KeywardResult;
use keyward_core::models::binding::Binding;
use keyward_core::models::role::Role;
use keyward_core::repository::{
    BindingRepository, PermissionRepository, RoleMembershipRepository, RoleRepository, Store,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::AuthzService;
use crate::cache::PermissionCache;
use crate::resolver::{Decision, EffectivePermissions, Snapshot};

impl<S: Store, C: PermissionCache> AuthzService<S, C> {
    /// Load everything the resolver needs for one user, bypassing the cache.
    pub async fn snapshot(&self, user_id: Uuid) -> KeywardResult<Snapshot> {
        let role_ids = self.store.memberships().role_ids_for_user(user_id).await?;
        let roles: Vec<Role> = self
            .store
            .roles()
            .get_by_ids(&role_ids)
            .await?
            .into_iter()
            .filter(|r| r.is_active)
            .collect();
        let active_ids: Vec<Uuid> = roles.iter().map(|r| r.id).collect();

        let role_bindings = self
            .store
            .bindings()
            .role_bindings_for_roles(&active_ids)
            .await?;
        let user_bindings = self.store.bindings().user_bindings(user_id).await?;
        let inactive_permissions: BTreeSet<String> = self
            .store
            .permissions()
            .inactive_names()
            .await?
            .into_iter()
            .collect();

        Ok(Snapshot {
            user_id,
            roles,
            role_bindings,
            user_bindings,
            inactive_permissions,
        })
    }

    /// The user's resolved permissions, from cache when still valid.
    pub async fn effective_permissions(
        &self,
        user_id: Uuid,
    ) -> KeywardResult<Arc<EffectivePermissions>> {
        if let Some(cached) = self.cache.get(user_id).await {
            return Ok(cached);
        }
        debug!(%user_id, "Permission cache miss");

        let generation = self.current_generation();
        let snapshot = self.snapshot(user_id).await?;
        let effective = Arc::new(snapshot.evaluate(Utc::now()));

        if self.current_generation() == generation {
            self.cache.set(user_id, effective.clone()).await;
            // An invalidation can land between the check and the set.
            if self.current_generation() != generation {
                self.cache.invalidate(user_id).await;
            }
        }
        Ok(effective)
    }

    pub async fn resolve(&self, user_id: Uuid, permission_name: &str) -> KeywardResult<Decision> {
        Ok(self
            .effective_permissions(user_id)
            .await?
            .decision(permission_name))
    }

    /// Fail-closed check: storage errors deny.
    pub async fn is_allowed(&self, user_id: Uuid, permission_name: &str) -> bool {
        match self.resolve(user_id, permission_name).await {
            Ok(decision) => decision.allowed,
            Err(e) => {
                warn!(%user_id, permission = permission_name, error = %e, "Permission check failed; denying");
                false
            }
        }
    }

    pub async fn resolve_all(&self, user_id: Uuid) -> KeywardResult<BTreeSet<String>> {
        Ok(self.effective_permissions(user_id).await?.allowed())
    }

    pub async fn has_any_permission(&self, user_id: Uuid, names: &[&str]) -> KeywardResult<bool> {
        let effective = self.effective_permissions(user_id).await?;
        Ok(names.iter().any(|name| effective.is_allowed(name)))
    }

    /// `true` for an empty list.
    pub async fn has_all_permissions(&self, user_id: Uuid, names: &[&str]) -> KeywardResult<bool> {
        let effective = self.effective_permissions(user_id).await?;
        Ok(names.iter().all(|name| effective.is_allowed(name)))
    }

    /// Active roles whose binding for the permission currently grants it,
    /// highest priority first.
    pub async fn roles_with_permission(&self, permission_name: &str) -> KeywardResult<Vec<Role>> {
        let permission = self.store.permissions().get_by_name(permission_name).await?;
        let now = Utc::now();
        let role_ids: Vec<Uuid> = self
            .store
            .bindings()
            .role_bindings_for_permission(permission.id)
            .await?
            .into_iter()
            .filter(|b| b.is_effective(now))
            .map(|b| b.role_id)
            .collect();

        let mut roles: Vec<Role> = self
            .store
            .roles()
            .get_by_ids(&role_ids)
            .await?
            .into_iter()
            .filter(|r| r.is_active)
            .collect();
        roles.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(roles)
    }
}
