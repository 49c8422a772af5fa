//! Permission audit log domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::binding::{ChangeContext, RolePermission, UserPermission};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AuditAction {
    Grant,
    Revoke,
    Expire,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Grant => "Grant",
            AuditAction::Revoke => "Revoke",
            AuditAction::Expire => "Expire",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Grant" => Some(AuditAction::Grant),
            "Revoke" => Some(AuditAction::Revoke),
            "Expire" => Some(AuditAction::Expire),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub permission_name: String,
    pub action: AuditAction,
    pub performed_by: Option<String>,
    pub reason: Option<String>,
    pub performed_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuditRecord {
    pub user_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub permission_name: String,
    pub action: AuditAction,
    pub performed_by: Option<String>,
    pub reason: Option<String>,
    pub performed_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl CreateAuditRecord {
    /// Record for a role binding after a grant, revoke, or denial.
    pub fn for_role_binding(binding: &RolePermission, ctx: &ChangeContext) -> Self {
        let action = if binding.is_granted {
            AuditAction::Grant
        } else {
            AuditAction::Revoke
        };
        Self {
            user_id: None,
            role_id: Some(binding.role_id),
            permission_name: binding.permission_name.clone(),
            action,
            performed_by: ctx.performed_by.clone(),
            reason: ctx.reason.clone(),
            performed_at: ctx.now,
            metadata: serde_json::json!({
                "permission_id": binding.permission_id.to_string(),
                "expires_at": binding.expires_at.map(|t| t.to_rfc3339()),
            }),
        }
    }

    pub fn for_user_binding(binding: &UserPermission, ctx: &ChangeContext) -> Self {
        let action = if binding.is_granted {
            AuditAction::Grant
        } else {
            AuditAction::Revoke
        };
        Self {
            user_id: Some(binding.user_id),
            role_id: None,
            permission_name: binding.permission_name.clone(),
            action,
            performed_by: ctx.performed_by.clone(),
            reason: ctx.reason.clone(),
            performed_at: ctx.now,
            metadata: serde_json::json!({
                "permission_id": binding.permission_id.to_string(),
                "override": binding.is_override,
                "expires_at": binding.expires_at.map(|t| t.to_rfc3339()),
            }),
        }
    }

    pub fn role_expired(binding: &RolePermission, now: DateTime<Utc>) -> Self {
        Self {
            user_id: None,
            role_id: Some(binding.role_id),
            permission_name: binding.permission_name.clone(),
            action: AuditAction::Expire,
            performed_by: None,
            reason: None,
            performed_at: now,
            metadata: serde_json::json!({
                "permission_id": binding.permission_id.to_string(),
                "expired_at": binding.expires_at.map(|t| t.to_rfc3339()),
            }),
        }
    }

    pub fn user_expired(binding: &UserPermission, now: DateTime<Utc>) -> Self {
        Self {
            user_id: Some(binding.user_id),
            role_id: None,
            permission_name: binding.permission_name.clone(),
            action: AuditAction::Expire,
            performed_by: None,
            reason: None,
            performed_at: now,
            metadata: serde_json::json!({
                "permission_id": binding.permission_id.to_string(),
                "override": binding.is_override,
                "expired_at": binding.expires_at.map(|t| t.to_rfc3339()),
            }),
        }
    }
}
