//! Role and user permission bindings.
//!
//! A binding is never deleted. Grants, revokes, and denials update the
//! single row for a (subject, permission) pair; expiry is computed on
//! read from `expires_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::audit::CreateAuditRecord;
use crate::models::permission::Permission;

/// Read-side behaviour shared by role and user bindings.
pub trait Binding {
    fn permission_name(&self) -> &str;
    fn is_granted(&self) -> bool;
    fn expires_at(&self) -> Option<DateTime<Utc>>;
    fn swept_at(&self) -> Option<DateTime<Utc>>;

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }

    fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_granted() && !self.is_expired(now)
    }

    /// A grant that has lapsed and has not yet been reported.
    fn needs_sweep(&self, now: DateTime<Utc>) -> bool {
        self.is_granted() && self.is_expired(now) && self.swept_at().is_none()
    }
}

/// Who performed a change, why, and when.
#[derive(Debug, Clone)]
pub struct ChangeContext {
    pub performed_by: Option<String>,
    pub reason: Option<String>,
    pub now: DateTime<Utc>,
}

impl ChangeContext {
    pub fn new(performed_by: Option<String>, reason: Option<String>) -> Self {
        Self {
            performed_by,
            reason,
            now: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Role -> Permission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub permission_name: String,
    pub is_granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: Option<String>,
    pub reason: Option<String>,
    /// Set once the sweeper has reported this grant as expired.
    pub swept_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RolePermission {
    /// A row for a pair that has never been written, stamped with the
    /// change that creates it. It already reads as a permanent denial, so
    /// the caller must persist it even when `deny(None, ..)` reports no
    /// change.
    pub fn blank(role_id: Uuid, permission: &Permission, ctx: &ChangeContext) -> Self {
        Self {
            role_id,
            permission_id: permission.id,
            permission_name: permission.name.clone(),
            is_granted: false,
            expires_at: None,
            granted_by: ctx.performed_by.clone(),
            reason: ctx.reason.clone(),
            swept_at: None,
            created_at: ctx.now,
            updated_at: ctx.now,
        }
    }

    fn stamp(&mut self, ctx: &ChangeContext) {
        self.granted_by = ctx.performed_by.clone();
        self.reason = ctx.reason.clone();
        self.swept_at = None;
        self.updated_at = ctx.now;
    }

    /// Returns `false` when the binding already grants with the same expiry.
    pub fn grant(&mut self, expires_at: Option<DateTime<Utc>>, ctx: &ChangeContext) -> bool {
        if self.is_effective(ctx.now) && self.expires_at == expires_at {
            return false;
        }
        self.is_granted = true;
        self.expires_at = expires_at;
        self.stamp(ctx);
        true
    }

    /// Turns a live grant into a standing denial for this role. A grant
    /// that has already lapsed is left for the sweeper to report, so the
    /// revoke cannot turn it into a permanent denial.
    pub fn revoke(&mut self, ctx: &ChangeContext) -> bool {
        if !self.is_effective(ctx.now) {
            return false;
        }
        self.is_granted = false;
        self.expires_at = None;
        self.stamp(ctx);
        true
    }

    /// Explicit (optionally temporary) denial, created even without a prior grant.
    pub fn deny(&mut self, expires_at: Option<DateTime<Utc>>, ctx: &ChangeContext) -> bool {
        if !self.is_granted && !self.is_expired(ctx.now) && self.expires_at == expires_at {
            return false;
        }
        self.is_granted = false;
        self.expires_at = expires_at;
        self.stamp(ctx);
        true
    }

    pub fn mark_swept(&mut self, now: DateTime<Utc>) {
        self.swept_at = Some(now);
    }
}

impl Binding for RolePermission {
    fn permission_name(&self) -> &str {
        &self.permission_name
    }
    fn is_granted(&self) -> bool {
        self.is_granted
    }
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
    fn swept_at(&self) -> Option<DateTime<Utc>> {
        self.swept_at
    }
}

// ---------------------------------------------------------------------------
// User -> Permission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermission {
    pub user_id: Uuid,
    pub permission_id: Uuid,
    pub permission_name: String,
    pub is_granted: bool,
    /// Authoritative over anything the user's roles say.
    pub is_override: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: Option<String>,
    pub reason: Option<String>,
    pub swept_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserPermission {
    pub fn blank(user_id: Uuid, permission: &Permission, ctx: &ChangeContext) -> Self {
        Self {
            user_id,
            permission_id: permission.id,
            permission_name: permission.name.clone(),
            is_granted: false,
            is_override: false,
            expires_at: None,
            granted_by: ctx.performed_by.clone(),
            reason: ctx.reason.clone(),
            swept_at: None,
            created_at: ctx.now,
            updated_at: ctx.now,
        }
    }

    fn stamp(&mut self, ctx: &ChangeContext) {
        self.granted_by = ctx.performed_by.clone();
        self.reason = ctx.reason.clone();
        self.swept_at = None;
        self.updated_at = ctx.now;
    }

    pub fn grant(
        &mut self,
        is_override: bool,
        expires_at: Option<DateTime<Utc>>,
        ctx: &ChangeContext,
    ) -> bool {
        if self.is_effective(ctx.now)
            && self.is_override == is_override
            && self.expires_at == expires_at
        {
            return false;
        }
        self.is_granted = true;
        self.is_override = is_override;
        self.expires_at = expires_at;
        self.stamp(ctx);
        true
    }

    /// Withdraws the user's personal decision; role baseline applies again.
    /// A lapsed decision already no longer applies and is left as it is.
    pub fn revoke(&mut self, ctx: &ChangeContext) -> bool {
        if self.is_expired(ctx.now) || (!self.is_granted && !self.is_override) {
            return false;
        }
        self.is_granted = false;
        self.is_override = false;
        self.expires_at = None;
        self.stamp(ctx);
        true
    }

    /// Authoritative denial that wins over every role grant.
    pub fn deny(&mut self, expires_at: Option<DateTime<Utc>>, ctx: &ChangeContext) -> bool {
        if !self.is_granted
            && self.is_override
            && !self.is_expired(ctx.now)
            && self.expires_at == expires_at
        {
            return false;
        }
        self.is_granted = false;
        self.is_override = true;
        self.expires_at = expires_at;
        self.stamp(ctx);
        true
    }

    pub fn mark_swept(&mut self, now: DateTime<Utc>) {
        self.swept_at = Some(now);
    }
}

impl Binding for UserPermission {
    fn permission_name(&self) -> &str {
        &self.permission_name
    }
    fn is_granted(&self) -> bool {
        self.is_granted
    }
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
    fn swept_at(&self) -> Option<DateTime<Utc>> {
        self.swept_at
    }
}

/// Binding rows plus their audit records, written in one transaction.
#[derive(Debug, Clone, Default)]
pub struct BindingBatch {
    pub role_bindings: Vec<RolePermission>,
    pub user_bindings: Vec<UserPermission>,
    pub audit: Vec<CreateAuditRecord>,
}

impl BindingBatch {
    pub fn is_empty(&self) -> bool {
        self.role_bindings.is_empty() && self.user_bindings.is_empty() && self.audit.is_empty()
    }
}
