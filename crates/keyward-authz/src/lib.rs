//! Keyward Authz: effective-permission resolution over roles and
//! per-user overrides, with audited grants, bulk operations, and an
//! expiry sweeper.

pub mod cache;
pub mod config;
pub mod error;
pub mod locks;
pub mod resolver;
pub mod service;
pub mod sweeper;

pub use cache::{MokaPermissionCache, PermissionCache};
pub use config::AuthzConfig;
pub use error::AuthzError;
pub use resolver::{Decision, DecisionSource, EffectivePermissions, Snapshot};
pub use service::{
    AuthzService, BulkItemResult, BulkOutcome, BulkRoleRequest, BulkUserRequest, RoleGrants,
    SYSTEM_PERMISSIONS, SYSTEM_ROLES, SeedReport,
};
pub use sweeper::{ExpirySweeper, SweepReport};
