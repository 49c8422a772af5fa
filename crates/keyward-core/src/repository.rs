//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. The authorization crate is generic
//! over these traits and never depends on a concrete store.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::KeywardResult;
use crate::models::{
    audit::{AuditAction, AuditRecord, CreateAuditRecord},
    binding::{BindingBatch, RolePermission, UserPermission},
    permission::{CreatePermission, Permission},
    role::{CreateRole, Role, RoleAssignment},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

pub trait PermissionRepository: Send + Sync {
    /// Fails with `Conflict` when the name is taken.
    fn create(
        &self,
        input: CreatePermission,
    ) -> impl Future<Output = KeywardResult<Permission>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = KeywardResult<Permission>> + Send;
    fn get_by_name(&self, name: &str) -> impl Future<Output = KeywardResult<Permission>> + Send;
    /// Unknown names are silently absent from the result.
    fn get_by_names(
        &self,
        names: &[String],
    ) -> impl Future<Output = KeywardResult<Vec<Permission>>> + Send;
    fn exists(&self, name: &str) -> impl Future<Output = KeywardResult<bool>> + Send;
    /// Persist mutable fields. The name is never written.
    fn update(
        &self,
        permission: &Permission,
    ) -> impl Future<Output = KeywardResult<Permission>> + Send;
    fn delete(&self, id: Uuid) -> impl Future<Output = KeywardResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = KeywardResult<PaginatedResult<Permission>>> + Send;
    fn list_all(&self) -> impl Future<Output = KeywardResult<Vec<Permission>>> + Send;
    fn list_by_category(
        &self,
        category: &str,
    ) -> impl Future<Output = KeywardResult<Vec<Permission>>> + Send;
    fn inactive_names(&self) -> impl Future<Output = KeywardResult<Vec<String>>> + Send;
}

pub trait RoleRepository: Send + Sync {
    /// Fails with `Conflict` when the name is taken.
    fn create(&self, input: CreateRole) -> impl Future<Output = KeywardResult<Role>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = KeywardResult<Role>> + Send;
    fn get_by_name(&self, name: &str) -> impl Future<Output = KeywardResult<Role>> + Send;
    /// Unknown ids are silently absent from the result.
    fn get_by_ids(&self, ids: &[Uuid]) -> impl Future<Output = KeywardResult<Vec<Role>>> + Send;
    /// Persist mutable fields. The name is never written.
    fn update(&self, role: &Role) -> impl Future<Output = KeywardResult<Role>> + Send;
    fn delete(&self, id: Uuid) -> impl Future<Output = KeywardResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = KeywardResult<PaginatedResult<Role>>> + Send;
    fn list_by_category(
        &self,
        category: &str,
    ) -> impl Future<Output = KeywardResult<Vec<Role>>> + Send;
    /// All roles, highest priority first.
    fn list_by_priority(&self) -> impl Future<Output = KeywardResult<Vec<Role>>> + Send;
}

// ---------------------------------------------------------------------------
// Role membership
// ---------------------------------------------------------------------------

pub trait RoleMembershipRepository: Send + Sync {
    /// Returns `false` if the user already held the role.
    fn assign(&self, assignment: RoleAssignment)
    -> impl Future<Output = KeywardResult<bool>> + Send;
    /// Returns `false` if the user did not hold the role.
    fn unassign(
        &self,
        user_id: Uuid,
        role_id: Uuid,
    ) -> impl Future<Output = KeywardResult<bool>> + Send;
    fn role_ids_for_user(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = KeywardResult<Vec<Uuid>>> + Send;
    fn user_ids_for_role(
        &self,
        role_id: Uuid,
    ) -> impl Future<Output = KeywardResult<Vec<Uuid>>> + Send;
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

pub trait BindingRepository: Send + Sync {
    fn role_binding(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> impl Future<Output = KeywardResult<Option<RolePermission>>> + Send;
    fn user_binding(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
    ) -> impl Future<Output = KeywardResult<Option<UserPermission>>> + Send;
    fn role_bindings_for_roles(
        &self,
        role_ids: &[Uuid],
    ) -> impl Future<Output = KeywardResult<Vec<RolePermission>>> + Send;
    fn user_bindings(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = KeywardResult<Vec<UserPermission>>> + Send;
    fn role_bindings_for_permission(
        &self,
        permission_id: Uuid,
    ) -> impl Future<Output = KeywardResult<Vec<RolePermission>>> + Send;
    /// Role and user bindings referencing the permission.
    fn count_for_permission(
        &self,
        permission_id: Uuid,
    ) -> impl Future<Output = KeywardResult<u64>> + Send;
    fn count_for_role(&self, role_id: Uuid) -> impl Future<Output = KeywardResult<u64>> + Send;
    /// Granted role bindings with `expires_at <= now` not yet swept.
    fn pending_role_expirations(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> impl Future<Output = KeywardResult<Vec<RolePermission>>> + Send;
    /// Granted user bindings with `expires_at <= now` not yet swept.
    fn pending_user_expirations(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> impl Future<Output = KeywardResult<Vec<UserPermission>>> + Send;
    /// Upsert every binding and append every audit record atomically.
    fn apply(&self, batch: BindingBatch) -> impl Future<Output = KeywardResult<()>> + Send;
}

// ---------------------------------------------------------------------------
// Audit (append-only)
// ---------------------------------------------------------------------------

/// Query filters for audit records. `from` is inclusive, `to` exclusive.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub permission_name: Option<String>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub trait AuditLogRepository: Send + Sync {
    /// Append a new audit record. No update or delete operations exist.
    fn append(
        &self,
        input: CreateAuditRecord,
    ) -> impl Future<Output = KeywardResult<AuditRecord>> + Send;
    /// Newest first.
    fn list(
        &self,
        filter: AuditFilter,
        pagination: Pagination,
    ) -> impl Future<Output = KeywardResult<PaginatedResult<AuditRecord>>> + Send;
}

// ---------------------------------------------------------------------------
// Store bundle
// ---------------------------------------------------------------------------

/// One handle onto every repository the authorization service needs.
pub trait Store: Send + Sync + 'static {
    type Permissions: PermissionRepository;
    type Roles: RoleRepository;
    type Memberships: RoleMembershipRepository;
    type Bindings: BindingRepository;
    type Audit: AuditLogRepository;

    fn permissions(&self) -> &Self::Permissions;
    fn roles(&self) -> &Self::Roles;
    fn memberships(&self) -> &Self::Memberships;
    fn bindings(&self) -> &Self::Bindings;
    fn audit(&self) -> &Self::Audit;
}
