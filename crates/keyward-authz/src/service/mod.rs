//! Authorization service.
//!
//! Generic over a [`Store`] so that this crate has no dependency on the
//! database crate. The impl blocks are split by concern:
//! catalog, registry, resolution, grants, bulk operations, audit queries,
//! and seeding.

mod audit;
mod bulk;
mod catalog;
mod grants;
mod registry;
mod resolve;
mod seed;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use keyward_core::error::KeywardResult;
use keyward_core::models::permission::Permission;
use keyward_core::repository::{PermissionRepository, RoleMembershipRepository, Store};
use tracing::{debug, warn};
use uuid::Uuid;

pub use bulk::{BulkItemResult, BulkOutcome, BulkRoleRequest, BulkUserRequest};
pub use seed::{RoleGrants, SYSTEM_PERMISSIONS, SYSTEM_ROLES, SeedReport};

use crate::cache::{MokaPermissionCache, PermissionCache};
use crate::config::AuthzConfig;
use crate::error::AuthzError;
use crate::locks::KeyedLocks;
use crate::sweeper::ExpirySweeper;

/// Authorization service: the single entry point for permission checks
/// and for every change that can affect them.
pub struct AuthzService<S: Store, C: PermissionCache = MokaPermissionCache> {
    store: Arc<S>,
    cache: C,
    locks: Arc<KeyedLocks>,
    /// Bumped on every invalidation. A resolution only populates the
    /// cache if no invalidation happened while it was loading.
    generation: AtomicU64,
    config: AuthzConfig,
}

impl<S: Store> AuthzService<S> {
    pub fn new(store: S, config: AuthzConfig) -> Self {
        let cache = MokaPermissionCache::new(&config);
        Self::with_cache(store, cache, config)
    }
}

impl<S: Store, C: PermissionCache> AuthzService<S, C> {
    pub fn with_cache(store: S, cache: C, config: AuthzConfig) -> Self {
        Self {
            store: Arc::new(store),
            cache,
            locks: Arc::new(KeyedLocks::new()),
            generation: AtomicU64::new(0),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    /// An expiry sweeper sharing this service's store and binding locks.
    pub fn sweeper(&self) -> ExpirySweeper<S> {
        ExpirySweeper::new(self.store.clone(), self.locks.clone(), &self.config)
    }

    // -----------------------------------------------------------------
    // Cache invalidation
    // -----------------------------------------------------------------

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) async fn invalidate_user(&self, user_id: Uuid) {
        self.bump_generation();
        self.cache.invalidate(user_id).await;
        debug!(%user_id, "Invalidated cached permissions");
    }

    /// Invalidate every member of a role. Runs after the change has been
    /// committed, so a failed member lookup drops the whole cache instead
    /// of reporting the committed change as failed.
    pub(crate) async fn invalidate_role_members(&self, role_id: Uuid) {
        self.bump_generation();
        match self.store.memberships().user_ids_for_role(role_id).await {
            Ok(members) => {
                for user_id in &members {
                    self.cache.invalidate(*user_id).await;
                }
                debug!(%role_id, members = members.len(), "Invalidated cached permissions for role");
            }
            Err(e) => {
                warn!(%role_id, error = %e, "Role member lookup failed; invalidating all cached permissions");
                self.invalidate_everyone();
            }
        }
    }

    pub(crate) fn invalidate_everyone(&self) {
        self.bump_generation();
        self.cache.invalidate_all();
        debug!("Invalidated all cached permissions");
    }

    // -----------------------------------------------------------------
    // Shared lookups
    // -----------------------------------------------------------------

    /// Resolve a permission name for a grant. Unknown names are
    /// `NotFound`, deactivated ones `InvalidOperation`.
    pub(crate) async fn grantable_permission(&self, name: &str) -> KeywardResult<Permission> {
        let permission = self.store.permissions().get_by_name(name).await?;
        if !permission.is_active {
            return Err(AuthzError::InactivePermission(name.to_string()).into());
        }
        Ok(permission)
    }
}
