//! Audit log queries.

use keyward_core::error::KeywardResult;
use keyward_core::models::audit::AuditRecord;
use keyward_core::repository::{AuditFilter, AuditLogRepository, PaginatedResult, Pagination, Store};

use super::AuthzService;
use crate::cache::PermissionCache;

impl<S: Store, C: PermissionCache> AuthzService<S, C> {
    /// Newest first.
    pub async fn audit_log(
        &self,
        filter: AuditFilter,
        pagination: Pagination,
    ) -> KeywardResult<PaginatedResult<AuditRecord>> {
        self.store.audit().list(filter, pagination).await
    }
}
