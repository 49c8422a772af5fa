//! SurrealDB repository implementations.

mod audit;
mod binding;
mod membership;
mod permission;
mod role;

pub use audit::SurrealAuditLogRepository;
pub use binding::SurrealBindingRepository;
pub use membership::SurrealMembershipRepository;
pub use permission::SurrealPermissionRepository;
pub use role::SurrealRoleRepository;

use surrealdb_types::SurrealValue;

/// Row struct for `count() ... GROUP ALL` queries.
#[derive(Debug, SurrealValue)]
pub(crate) struct CountRow {
    pub(crate) total: u64,
}

/// Record key for a (subject, permission) or (user, role) pair.
pub(crate) fn pair_key(left: uuid::Uuid, right: uuid::Uuid) -> String {
    format!("{left}_{right}")
}
