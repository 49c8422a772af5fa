//! Bulk grants and revokes.
//!
//! A bulk call runs in two phases. Preparation validates every name,
//! locks the affected bindings in key order, reads their current state,
//! and computes the new rows plus audit records. Commit writes the whole
//! batch in one transaction. The optional deadline covers preparation
//! only, so a timed-out call has written nothing.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use keyward_core::error::KeywardResult;
use keyward_core::models::audit::CreateAuditRecord;
use keyward_core::models::binding::{
    Binding, BindingBatch, ChangeContext, RolePermission, UserPermission,
};
use keyward_core::models::permission::Permission;
use keyward_core::repository::{BindingRepository, PermissionRepository, RoleRepository, Store};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::info;
use uuid::Uuid;

use super::AuthzService;
use crate::cache::PermissionCache;
use crate::error::AuthzError;
use crate::locks::BindingKey;

#[derive(Debug, Clone)]
pub struct BulkUserRequest {
    pub user_id: Uuid,
    pub permission_names: Vec<String>,
    /// Grants only: make every granted binding an override.
    pub is_override: bool,
    /// Grants only.
    pub expires_at: Option<DateTime<Utc>>,
    pub performed_by: Option<String>,
    pub reason: Option<String>,
    /// Deadline for this call; falls back to the configured bulk timeout.
    pub timeout: Option<Duration>,
}

impl BulkUserRequest {
    pub fn new<I, N>(user_id: Uuid, permission_names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            user_id,
            permission_names: permission_names.into_iter().map(Into::into).collect(),
            is_override: false,
            expires_at: None,
            performed_by: None,
            reason: None,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BulkRoleRequest {
    pub role_id: Uuid,
    pub permission_names: Vec<String>,
    /// Grants only.
    pub expires_at: Option<DateTime<Utc>>,
    pub performed_by: Option<String>,
    pub reason: Option<String>,
    /// Deadline for this call; falls back to the configured bulk timeout.
    pub timeout: Option<Duration>,
}

impl BulkRoleRequest {
    pub fn new<I, N>(role_id: Uuid, permission_names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            role_id,
            permission_names: permission_names.into_iter().map(Into::into).collect(),
            expires_at: None,
            performed_by: None,
            reason: None,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BulkOutcome {
    Applied,
    /// Already in the requested state.
    Unchanged,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemResult {
    pub permission_name: String,
    pub outcome: BulkOutcome,
}

impl BulkItemResult {
    fn summary(results: &[BulkItemResult]) -> (usize, usize, usize) {
        results.iter().fold((0, 0, 0), |(a, u, f), r| match r.outcome {
            BulkOutcome::Applied => (a + 1, u, f),
            BulkOutcome::Unchanged => (a, u + 1, f),
            BulkOutcome::Failed { .. } => (a, u, f + 1),
        })
    }

    fn any_applied(results: &[BulkItemResult]) -> bool {
        results.iter().any(|r| r.outcome == BulkOutcome::Applied)
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Change {
    Grant {
        is_override: bool,
        expires_at: Option<DateTime<Utc>>,
    },
    Revoke,
    /// Grant unless the binding already grants, whatever its flavour.
    Ensure,
}

#[derive(Debug)]
enum Item {
    Valid(Permission, Change),
    Invalid(String, AuthzError),
}

impl Item {
    fn permission_id(&self) -> Option<Uuid> {
        match self {
            Item::Valid(p, _) => Some(p.id),
            Item::Invalid(..) => None,
        }
    }
}

/// Binding rows a bulk plan can be applied to.
trait BulkBinding: Binding + Sized {
    fn apply_change(&mut self, change: Change, ctx: &ChangeContext) -> bool;
    fn push_into(self, batch: &mut BindingBatch, ctx: &ChangeContext);
}

impl BulkBinding for RolePermission {
    fn apply_change(&mut self, change: Change, ctx: &ChangeContext) -> bool {
        match change {
            Change::Grant { expires_at, .. } => self.grant(expires_at, ctx),
            Change::Revoke => self.revoke(ctx),
            Change::Ensure if self.is_effective(ctx.now) => false,
            Change::Ensure => self.grant(None, ctx),
        }
    }

    fn push_into(self, batch: &mut BindingBatch, ctx: &ChangeContext) {
        batch.audit.push(CreateAuditRecord::for_role_binding(&self, ctx));
        batch.role_bindings.push(self);
    }
}

impl BulkBinding for UserPermission {
    fn apply_change(&mut self, change: Change, ctx: &ChangeContext) -> bool {
        match change {
            Change::Grant {
                is_override,
                expires_at,
            } => self.grant(is_override, expires_at, ctx),
            Change::Revoke => self.revoke(ctx),
            Change::Ensure if self.is_effective(ctx.now) => false,
            Change::Ensure => self.grant(false, None, ctx),
        }
    }

    fn push_into(self, batch: &mut BindingBatch, ctx: &ChangeContext) {
        batch.audit.push(CreateAuditRecord::for_user_binding(&self, ctx));
        batch.user_bindings.push(self);
    }
}

/// Output of the preparation phase. The guards keep the bindings locked
/// until the batch is committed.
struct Prepared {
    results: Vec<BulkItemResult>,
    batch: BindingBatch,
    guards: Vec<OwnedMutexGuard<()>>,
}

fn build<B: BulkBinding>(
    plan: Vec<Item>,
    mut existing: HashMap<Uuid, B>,
    blank: impl Fn(&Permission) -> B,
    ctx: &ChangeContext,
    guards: Vec<OwnedMutexGuard<()>>,
) -> Prepared {
    let mut batch = BindingBatch::default();
    let mut results = Vec::with_capacity(plan.len());

    for item in plan {
        match item {
            Item::Invalid(name, err) => results.push(BulkItemResult {
                permission_name: name,
                outcome: BulkOutcome::Failed {
                    reason: err.to_string(),
                },
            }),
            Item::Valid(permission, change) => {
                let mut binding = existing
                    .remove(&permission.id)
                    .unwrap_or_else(|| blank(&permission));
                let outcome = if binding.apply_change(change, ctx) {
                    binding.push_into(&mut batch, ctx);
                    BulkOutcome::Applied
                } else {
                    BulkOutcome::Unchanged
                };
                results.push(BulkItemResult {
                    permission_name: permission.name,
                    outcome,
                });
            }
        }
    }

    Prepared {
        results,
        batch,
        guards,
    }
}

/// Run `fut` under an optional deadline.
async fn with_deadline<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = KeywardResult<T>>,
) -> KeywardResult<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| AuthzError::BulkTimeout)?,
        None => fut.await,
    }
}

fn context(performed_by: &Option<String>, reason: &Option<String>) -> ChangeContext {
    ChangeContext::new(performed_by.clone(), reason.clone())
}

impl<S: Store, C: PermissionCache> AuthzService<S, C> {
    /// Validate names in request order. Duplicates collapse into their
    /// first occurrence.
    async fn plan(
        &self,
        names: &[String],
        change: Change,
        allow_empty: bool,
    ) -> KeywardResult<Vec<Item>> {
        if names.is_empty() && !allow_empty {
            return Err(AuthzError::EmptyRequest.into());
        }

        let mut seen = HashSet::new();
        let unique: Vec<String> = names
            .iter()
            .filter(|n| seen.insert(n.as_str()))
            .cloned()
            .collect();

        let mut found: HashMap<String, Permission> = self
            .store
            .permissions()
            .get_by_names(&unique)
            .await?
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();

        let requires_active = !matches!(change, Change::Revoke);
        Ok(unique
            .into_iter()
            .map(|name| match found.remove(&name) {
                None => {
                    let err = AuthzError::UnknownPermission(name.clone());
                    Item::Invalid(name, err)
                }
                Some(p) if requires_active && !p.is_active => {
                    let err = AuthzError::InactivePermission(name.clone());
                    Item::Invalid(name, err)
                }
                Some(p) => Item::Valid(p, change),
            })
            .collect())
    }

    /// Revocations for currently effective bindings outside `keep`.
    async fn surplus(
        &self,
        effective: impl Iterator<Item = String>,
        keep: &[String],
    ) -> KeywardResult<Vec<Item>> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let names: Vec<String> = effective
            .filter(|name| !keep.contains(name.as_str()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.plan(&names, Change::Revoke, true).await
    }

    async fn prepare_user(
        &self,
        user_id: Uuid,
        plan: Vec<Item>,
        ctx: &ChangeContext,
    ) -> KeywardResult<Prepared> {
        let keys = plan
            .iter()
            .filter_map(Item::permission_id)
            .map(|permission_id| BindingKey::User {
                user_id,
                permission_id,
            })
            .collect();
        let guards = self.locks.lock_many(keys).await;

        let existing: HashMap<Uuid, UserPermission> = self
            .store
            .bindings()
            .user_bindings(user_id)
            .await?
            .into_iter()
            .map(|b| (b.permission_id, b))
            .collect();

        Ok(build(
            plan,
            existing,
            |p| UserPermission::blank(user_id, p, ctx),
            ctx,
            guards,
        ))
    }

    async fn prepare_role(
        &self,
        role_id: Uuid,
        plan: Vec<Item>,
        ctx: &ChangeContext,
    ) -> KeywardResult<Prepared> {
        let keys = plan
            .iter()
            .filter_map(Item::permission_id)
            .map(|permission_id| BindingKey::Role {
                role_id,
                permission_id,
            })
            .collect();
        let guards = self.locks.lock_many(keys).await;

        let existing: HashMap<Uuid, RolePermission> = self
            .store
            .bindings()
            .role_bindings_for_roles(&[role_id])
            .await?
            .into_iter()
            .map(|b| (b.permission_id, b))
            .collect();

        Ok(build(
            plan,
            existing,
            |p| RolePermission::blank(role_id, p, ctx),
            ctx,
            guards,
        ))
    }

    async fn commit(&self, prepared: Prepared) -> KeywardResult<Vec<BulkItemResult>> {
        let Prepared {
            results,
            batch,
            guards,
        } = prepared;
        if !batch.is_empty() {
            self.store.bindings().apply(batch).await?;
        }
        drop(guards);
        Ok(results)
    }

    fn deadline(&self, requested: Option<Duration>) -> Option<Duration> {
        requested.or(self.config.bulk_timeout())
    }

    async fn finish_user(
        &self,
        operation: &'static str,
        user_id: Uuid,
        prepared: Prepared,
    ) -> KeywardResult<Vec<BulkItemResult>> {
        let results = self.commit(prepared).await?;
        if BulkItemResult::any_applied(&results) {
            self.invalidate_user(user_id).await;
        }
        let (applied, unchanged, failed) = BulkItemResult::summary(&results);
        info!(%user_id, operation, applied, unchanged, failed, "Bulk user permission change");
        Ok(results)
    }

    async fn finish_role(
        &self,
        operation: &'static str,
        role_id: Uuid,
        prepared: Prepared,
    ) -> KeywardResult<Vec<BulkItemResult>> {
        let results = self.commit(prepared).await?;
        if BulkItemResult::any_applied(&results) {
            self.invalidate_role_members(role_id).await;
        }
        let (applied, unchanged, failed) = BulkItemResult::summary(&results);
        info!(%role_id, operation, applied, unchanged, failed, "Bulk role permission change");
        Ok(results)
    }

    // -----------------------------------------------------------------
    // User bulk operations
    // -----------------------------------------------------------------

    pub async fn grant_many_to_user(
        &self,
        request: BulkUserRequest,
    ) -> KeywardResult<Vec<BulkItemResult>> {
        let ctx = context(&request.performed_by, &request.reason);
        let change = Change::Grant {
            is_override: request.is_override,
            expires_at: request.expires_at,
        };
        let prepared = with_deadline(self.deadline(request.timeout), async {
            let plan = self.plan(&request.permission_names, change, false).await?;
            self.prepare_user(request.user_id, plan, &ctx).await
        })
        .await?;
        self.finish_user("grant", request.user_id, prepared).await
    }

    pub async fn revoke_many_from_user(
        &self,
        request: BulkUserRequest,
    ) -> KeywardResult<Vec<BulkItemResult>> {
        let ctx = context(&request.performed_by, &request.reason);
        let prepared = with_deadline(self.deadline(request.timeout), async {
            let plan = self
                .plan(&request.permission_names, Change::Revoke, false)
                .await?;
            self.prepare_user(request.user_id, plan, &ctx).await
        })
        .await?;
        self.finish_user("revoke", request.user_id, prepared).await
    }

    /// Make the user's personally granted set exactly `permission_names`:
    /// grant what is missing and revoke every other effective grant.
    pub async fn sync_user_permissions(
        &self,
        request: BulkUserRequest,
    ) -> KeywardResult<Vec<BulkItemResult>> {
        let ctx = context(&request.performed_by, &request.reason);
        let user_id = request.user_id;
        let prepared = with_deadline(self.deadline(request.timeout), async {
            let mut plan = self
                .plan(&request.permission_names, Change::Ensure, true)
                .await?;
            let current = self.store.bindings().user_bindings(user_id).await?;
            let effective = current
                .into_iter()
                .filter(|b| b.is_effective(ctx.now))
                .map(|b| b.permission_name);
            plan.extend(self.surplus(effective, &request.permission_names).await?);
            self.prepare_user(user_id, plan, &ctx).await
        })
        .await?;
        self.finish_user("sync", user_id, prepared).await
    }

    // -----------------------------------------------------------------
    // Role bulk operations
    // -----------------------------------------------------------------

    pub async fn grant_many_to_role(
        &self,
        request: BulkRoleRequest,
    ) -> KeywardResult<Vec<BulkItemResult>> {
        let ctx = context(&request.performed_by, &request.reason);
        let change = Change::Grant {
            is_override: false,
            expires_at: request.expires_at,
        };
        let prepared = with_deadline(self.deadline(request.timeout), async {
            self.store.roles().get_by_id(request.role_id).await?;
            let plan = self.plan(&request.permission_names, change, false).await?;
            self.prepare_role(request.role_id, plan, &ctx).await
        })
        .await?;
        self.finish_role("grant", request.role_id, prepared).await
    }

    pub async fn revoke_many_from_role(
        &self,
        request: BulkRoleRequest,
    ) -> KeywardResult<Vec<BulkItemResult>> {
        let ctx = context(&request.performed_by, &request.reason);
        let prepared = with_deadline(self.deadline(request.timeout), async {
            self.store.roles().get_by_id(request.role_id).await?;
            let plan = self
                .plan(&request.permission_names, Change::Revoke, false)
                .await?;
            self.prepare_role(request.role_id, plan, &ctx).await
        })
        .await?;
        self.finish_role("revoke", request.role_id, prepared).await
    }

    /// Make the role's granted set exactly `permission_names`.
    pub async fn sync_role_permissions(
        &self,
        request: BulkRoleRequest,
    ) -> KeywardResult<Vec<BulkItemResult>> {
        let ctx = context(&request.performed_by, &request.reason);
        let role_id = request.role_id;
        let prepared = with_deadline(self.deadline(request.timeout), async {
            self.store.roles().get_by_id(role_id).await?;
            let mut plan = self
                .plan(&request.permission_names, Change::Ensure, true)
                .await?;
            let current = self
                .store
                .bindings()
                .role_bindings_for_roles(&[role_id])
                .await?;
            let effective = current
                .into_iter()
                .filter(|b| b.is_effective(ctx.now))
                .map(|b| b.permission_name);
            plan.extend(self.surplus(effective, &request.permission_names).await?);
            self.prepare_role(role_id, plan, &ctx).await
        })
        .await?;
        self.finish_role("sync", role_id, prepared).await
    }
}
