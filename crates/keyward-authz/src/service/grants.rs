//! Single-binding grants, revokes, and denials.
//!
//! Each change runs under the binding's lock: read the current row (or
//! start a blank one), apply the model transition, and write the row with
//! its audit record in one transaction. A transition that changes nothing
//! writes nothing and returns `false`.

use chrono::{DateTime, Utc};
use keyward_core::error::KeywardResult;
use keyward_core::models::audit::CreateAuditRecord;
use keyward_core::models::binding::{BindingBatch, ChangeContext, RolePermission, UserPermission};
use keyward_core::models::permission::Permission;
use keyward_core::repository::{BindingRepository, PermissionRepository, RoleRepository, Store};
use tracing::{debug, info};
use uuid::Uuid;

use super::AuthzService;
use crate::cache::PermissionCache;
use crate::locks::BindingKey;

impl<S: Store, C: PermissionCache> AuthzService<S, C> {
    // -----------------------------------------------------------------
    // Role bindings
    // -----------------------------------------------------------------

    pub async fn grant_role_permission(
        &self,
        role_id: Uuid,
        permission_name: &str,
        expires_at: Option<DateTime<Utc>>,
        ctx: ChangeContext,
    ) -> KeywardResult<bool> {
        let permission = self.grantable_permission(permission_name).await?;
        self.change_role_binding(role_id, &permission, ctx, |b, _, ctx| b.grant(expires_at, ctx))
            .await
    }

    /// Turns the role's grant into a denial that takes part in the role
    /// priority contest.
    pub async fn revoke_role_permission(
        &self,
        role_id: Uuid,
        permission_name: &str,
        ctx: ChangeContext,
    ) -> KeywardResult<bool> {
        let permission = self.store.permissions().get_by_name(permission_name).await?;
        self.change_role_binding(role_id, &permission, ctx, |b, _, ctx| b.revoke(ctx))
            .await
    }

    /// Record an explicit denial for the role, with or without a prior grant.
    pub async fn deny_role_permission(
        &self,
        role_id: Uuid,
        permission_name: &str,
        expires_at: Option<DateTime<Utc>>,
        ctx: ChangeContext,
    ) -> KeywardResult<bool> {
        let permission = self.store.permissions().get_by_name(permission_name).await?;
        // A pair with no row yet is written even though the blank row
        // already reads as a denial.
        self.change_role_binding(role_id, &permission, ctx, |b, stored, ctx| {
            b.deny(expires_at, ctx) || !stored
        })
        .await
    }

    async fn change_role_binding<F>(
        &self,
        role_id: Uuid,
        permission: &Permission,
        ctx: ChangeContext,
        change: F,
    ) -> KeywardResult<bool>
    where
        F: FnOnce(&mut RolePermission, bool, &ChangeContext) -> bool,
    {
        let role = self.store.roles().get_by_id(role_id).await?;

        let guard = self
            .locks
            .lock(BindingKey::Role {
                role_id,
                permission_id: permission.id,
            })
            .await;

        let stored = self
            .store
            .bindings()
            .role_binding(role_id, permission.id)
            .await?;
        let is_stored = stored.is_some();
        let mut binding =
            stored.unwrap_or_else(|| RolePermission::blank(role_id, permission, &ctx));

        if !change(&mut binding, is_stored, &ctx) {
            debug!(role = %role.name, permission = %permission.name, "Role binding unchanged");
            return Ok(false);
        }

        let audit = CreateAuditRecord::for_role_binding(&binding, &ctx);
        let action = audit.action;
        self.store
            .bindings()
            .apply(BindingBatch {
                role_bindings: vec![binding],
                user_bindings: Vec::new(),
                audit: vec![audit],
            })
            .await?;
        drop(guard);

        self.invalidate_role_members(role_id).await;
        info!(
            role = %role.name,
            %role_id,
            permission = %permission.name,
            action = action.as_str(),
            performed_by = ?ctx.performed_by,
            "Role permission changed"
        );
        Ok(true)
    }

    // -----------------------------------------------------------------
    // User bindings
    // -----------------------------------------------------------------

    /// An override grant wins over every role denial; a plain grant only
    /// adds to what the user's roles allow.
    pub async fn grant_user_permission(
        &self,
        user_id: Uuid,
        permission_name: &str,
        is_override: bool,
        expires_at: Option<DateTime<Utc>>,
        ctx: ChangeContext,
    ) -> KeywardResult<bool> {
        let permission = self.grantable_permission(permission_name).await?;
        self.change_user_binding(user_id, &permission, ctx, |b, ctx| {
            b.grant(is_override, expires_at, ctx)
        })
        .await
    }

    /// Withdraw the user's personal grant or denial; the role baseline
    /// applies again.
    pub async fn revoke_user_permission(
        &self,
        user_id: Uuid,
        permission_name: &str,
        ctx: ChangeContext,
    ) -> KeywardResult<bool> {
        let permission = self.store.permissions().get_by_name(permission_name).await?;
        self.change_user_binding(user_id, &permission, ctx, |b, ctx| b.revoke(ctx))
            .await
    }

    /// Override denial: wins over every role grant until it expires.
    pub async fn deny_user_permission(
        &self,
        user_id: Uuid,
        permission_name: &str,
        expires_at: Option<DateTime<Utc>>,
        ctx: ChangeContext,
    ) -> KeywardResult<bool> {
        let permission = self.store.permissions().get_by_name(permission_name).await?;
        self.change_user_binding(user_id, &permission, ctx, |b, ctx| b.deny(expires_at, ctx))
            .await
    }

    async fn change_user_binding<F>(
        &self,
        user_id: Uuid,
        permission: &Permission,
        ctx: ChangeContext,
        change: F,
    ) -> KeywardResult<bool>
    where
        F: FnOnce(&mut UserPermission, &ChangeContext) -> bool,
    {
        let guard = self
            .locks
            .lock(BindingKey::User {
                user_id,
                permission_id: permission.id,
            })
            .await;

        let mut binding = self
            .store
            .bindings()
            .user_binding(user_id, permission.id)
            .await?
            .unwrap_or_else(|| UserPermission::blank(user_id, permission, &ctx));

        if !change(&mut binding, &ctx) {
            debug!(%user_id, permission = %permission.name, "User binding unchanged");
            return Ok(false);
        }

        let audit = CreateAuditRecord::for_user_binding(&binding, &ctx);
        let action = audit.action;
        let is_override = binding.is_override;
        self.store
            .bindings()
            .apply(BindingBatch {
                role_bindings: Vec::new(),
                user_bindings: vec![binding],
                audit: vec![audit],
            })
            .await?;
        drop(guard);

        self.invalidate_user(user_id).await;
        info!(
            %user_id,
            permission = %permission.name,
            action = action.as_str(),
            is_override,
            performed_by = ?ctx.performed_by,
            "User permission changed"
        );
        Ok(true)
    }
}
