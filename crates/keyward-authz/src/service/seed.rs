//! Built-in permission catalog and system roles.

use keyward_core::error::{KeywardError, KeywardResult};
use keyward_core::models::permission::CreatePermission;
use keyward_core::models::role::{CreateRole, Role};
use keyward_core::repository::{PermissionRepository, RoleRepository, Store};
use tracing::info;

use super::AuthzService;
use super::bulk::{BulkOutcome, BulkRoleRequest};
use crate::cache::PermissionCache;

/// `(name, display name, category)` of every system permission.
pub const SYSTEM_PERMISSIONS: &[(&str, &str, &str)] = &[
    ("users.view", "View users", "Users"),
    ("users.create", "Create users", "Users"),
    ("users.edit", "Edit users", "Users"),
    ("users.delete", "Delete users", "Users"),
    ("users.view_profile", "View profiles", "Users"),
    ("users.edit_profile", "Edit own profile", "Users"),
    ("users.view_sessions", "View user sessions", "Users"),
    ("users.manage_sessions", "Manage user sessions", "Users"),
    ("users.view_activities", "View user activity", "Users"),
    ("users.impersonate", "Impersonate users", "Users"),
    ("users.export", "Export users", "Users"),
    ("roles.view", "View roles", "Roles"),
    ("roles.create", "Create roles", "Roles"),
    ("roles.edit", "Edit roles", "Roles"),
    ("roles.delete", "Delete roles", "Roles"),
    ("roles.assign", "Assign roles", "Roles"),
    ("roles.unassign", "Unassign roles", "Roles"),
    ("roles.view_permissions", "View role permissions", "Roles"),
    ("roles.manage_permissions", "Manage role permissions", "Roles"),
    ("permissions.view", "View permissions", "Permissions"),
    ("permissions.create", "Create permissions", "Permissions"),
    ("permissions.edit", "Edit permissions", "Permissions"),
    ("permissions.delete", "Delete permissions", "Permissions"),
    ("permissions.grant", "Grant permissions", "Permissions"),
    ("permissions.revoke", "Revoke permissions", "Permissions"),
    ("permissions.view_audit", "View permission audit", "Permissions"),
    ("content.view", "View content", "Content"),
    ("content.create", "Create content", "Content"),
    ("content.edit", "Edit content", "Content"),
    ("content.delete", "Delete content", "Content"),
    ("content.publish", "Publish content", "Content"),
    ("content.unpublish", "Unpublish content", "Content"),
    ("content.moderate", "Moderate content", "Content"),
    ("content.feature", "Feature content", "Content"),
    ("content.verify", "Verify content", "Content"),
    ("content.view_drafts", "View drafts", "Content"),
    ("content.edit_others", "Edit others' content", "Content"),
    ("content.delete_others", "Delete others' content", "Content"),
    ("community.view_groups", "View groups", "Community"),
    ("community.create_groups", "Create groups", "Community"),
    ("community.manage_groups", "Manage groups", "Community"),
    ("community.delete_groups", "Delete groups", "Community"),
    ("community.view_events", "View events", "Community"),
    ("community.create_events", "Create events", "Community"),
    ("community.manage_events", "Manage events", "Community"),
    ("community.delete_events", "Delete events", "Community"),
    ("community.moderate_comments", "Moderate comments", "Community"),
    ("community.ban_users", "Ban users", "Community"),
    ("community.view_reports", "View reports", "Community"),
    ("community.handle_reports", "Handle reports", "Community"),
    ("system.view_logs", "View logs", "System"),
    ("system.view_metrics", "View metrics", "System"),
    ("system.view_dashboard", "View dashboard", "System"),
    ("system.manage_settings", "Manage settings", "System"),
    ("system.manage_cache", "Manage cache", "System"),
    ("system.manage_jobs", "Manage background jobs", "System"),
    ("system.database_access", "Database access", "System"),
    ("system.configuration", "System configuration", "System"),
    ("system.backup_restore", "Backup and restore", "System"),
    ("system.maintenance_mode", "Maintenance mode", "System"),
    ("security.view_logs", "View security logs", "Security"),
    ("security.manage_2fa", "Manage two-factor settings", "Security"),
    ("security.view_sessions", "View security sessions", "Security"),
    ("security.manage_sessions", "Manage security sessions", "Security"),
    ("security.unlock_accounts", "Unlock accounts", "Security"),
    ("security.reset_passwords", "Reset passwords", "Security"),
    ("security.view_audit", "View audit trail", "Security"),
    ("security.manage_settings", "Manage security settings", "Security"),
];

/// Which system permissions a system role is granted.
#[derive(Debug, Clone, Copy)]
pub enum RoleGrants {
    All,
    AllExcept(&'static [&'static str]),
    Only(&'static [&'static str]),
}

impl RoleGrants {
    fn names(&self) -> Vec<String> {
        let all = SYSTEM_PERMISSIONS.iter().map(|(name, _, _)| *name);
        match self {
            RoleGrants::All => all.map(String::from).collect(),
            RoleGrants::AllExcept(excluded) => all
                .filter(|name| !excluded.contains(name))
                .map(String::from)
                .collect(),
            RoleGrants::Only(names) => names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// `(name, priority, description, grants)` of every system role.
pub const SYSTEM_ROLES: &[(&str, i32, &str, RoleGrants)] = &[
    (
        "SuperAdmin",
        1000,
        "Unrestricted administrative access",
        RoleGrants::All,
    ),
    (
        "Admin",
        900,
        "Administration without infrastructure access",
        RoleGrants::AllExcept(&[
            "users.impersonate",
            "system.database_access",
            "system.backup_restore",
            "system.maintenance_mode",
        ]),
    ),
    (
        "Moderator",
        500,
        "Community and content moderation",
        RoleGrants::Only(&[
            "users.view",
            "users.view_profile",
            "content.view",
            "content.edit",
            "content.delete",
            "content.moderate",
            "content.feature",
            "content.verify",
            "content.view_drafts",
            "community.view_groups",
            "community.view_events",
            "community.moderate_comments",
            "community.ban_users",
            "community.view_reports",
            "community.handle_reports",
        ]),
    ),
    (
        "Member",
        100,
        "Default role for registered users",
        RoleGrants::Only(&[
            "users.view_profile",
            "users.edit_profile",
            "content.view",
            "content.create",
            "community.view_groups",
            "community.view_events",
            "community.create_events",
        ]),
    ),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub grants_applied: usize,
}

impl<S: Store, C: PermissionCache> AuthzService<S, C> {
    /// Create any missing system permissions, system roles, and their
    /// grants. Safe to run on every start.
    pub async fn seed_system_catalog(&self) -> KeywardResult<SeedReport> {
        let mut report = SeedReport::default();

        for (name, display_name, category) in SYSTEM_PERMISSIONS {
            if self.store.permissions().exists(name).await? {
                continue;
            }
            self.store
                .permissions()
                .create(CreatePermission {
                    name: name.to_string(),
                    display_name: display_name.to_string(),
                    category: category.to_string(),
                    description: None,
                    is_system: true,
                })
                .await?;
            report.permissions_created += 1;
        }

        for (name, priority, description, grants) in SYSTEM_ROLES {
            let role = match self.system_role(name).await? {
                Some(role) => role,
                None => {
                    report.roles_created += 1;
                    self.store
                        .roles()
                        .create(CreateRole {
                            name: name.to_string(),
                            description: Some(description.to_string()),
                            category: "System".into(),
                            priority: *priority,
                            is_system: true,
                        })
                        .await?
                }
            };

            let mut request = BulkRoleRequest::new(role.id, grants.names());
            request.performed_by = Some("system".into());
            request.reason = Some("system catalog seed".into());
            let results = self.grant_many_to_role(request).await?;
            report.grants_applied += results
                .iter()
                .filter(|r| r.outcome == BulkOutcome::Applied)
                .count();
        }

        info!(
            permissions = report.permissions_created,
            roles = report.roles_created,
            grants = report.grants_applied,
            "System catalog seeded"
        );
        Ok(report)
    }

    async fn system_role(&self, name: &str) -> KeywardResult<Option<Role>> {
        match self.store.roles().get_by_name(name).await {
            Ok(role) => Ok(Some(role)),
            Err(KeywardError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
