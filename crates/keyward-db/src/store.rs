//! [`Store`] bundle over a single SurrealDB client.

use keyward_core::repository::Store;
use surrealdb::{Connection, Surreal};

use crate::repository::{
    SurrealAuditLogRepository, SurrealBindingRepository, SurrealMembershipRepository,
    SurrealPermissionRepository, SurrealRoleRepository,
};

/// Every repository the authorization service needs, sharing one client.
#[derive(Clone)]
pub struct SurrealStore<C: Connection> {
    permissions: SurrealPermissionRepository<C>,
    roles: SurrealRoleRepository<C>,
    memberships: SurrealMembershipRepository<C>,
    bindings: SurrealBindingRepository<C>,
    audit: SurrealAuditLogRepository<C>,
}

impl<C: Connection> SurrealStore<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self {
            permissions: SurrealPermissionRepository::new(db.clone()),
            roles: SurrealRoleRepository::new(db.clone()),
            memberships: SurrealMembershipRepository::new(db.clone()),
            bindings: SurrealBindingRepository::new(db.clone()),
            audit: SurrealAuditLogRepository::new(db),
        }
    }
}

impl<C: Connection> Store for SurrealStore<C> {
    type Permissions = SurrealPermissionRepository<C>;
    type Roles = SurrealRoleRepository<C>;
    type Memberships = SurrealMembershipRepository<C>;
    type Bindings = SurrealBindingRepository<C>;
    type Audit = SurrealAuditLogRepository<C>;

    fn permissions(&self) -> &Self::Permissions {
        &self.permissions
    }

    fn roles(&self) -> &Self::Roles {
        &self.roles
    }

    fn memberships(&self) -> &Self::Memberships {
        &self.memberships
    }

    fn bindings(&self) -> &Self::Bindings {
        &self.bindings
    }

    fn audit(&self) -> &Self::Audit {
        &self.audit
    }
}
