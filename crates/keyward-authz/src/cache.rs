//! Per-user cache of resolved permission sets.

use std::sync::Arc;

use chrono::Utc;
use moka::future::Cache;
use tracing::debug;
use uuid::Uuid;

use crate::config::AuthzConfig;
use crate::resolver::EffectivePermissions;

/// Cache key for a user's resolved permission set.
pub fn cache_key(user_id: Uuid) -> String {
    format!("perm:{user_id}")
}

/// Storage for resolved permission sets, keyed by `perm:{user_id}`.
pub trait PermissionCache: Send + Sync + 'static {
    /// Returns `None` for a miss or for an entry past its `valid_until`.
    fn get(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Option<Arc<EffectivePermissions>>> + Send;
    fn set(
        &self,
        user_id: Uuid,
        permissions: Arc<EffectivePermissions>,
    ) -> impl Future<Output = ()> + Send;
    fn invalidate(&self, user_id: Uuid) -> impl Future<Output = ()> + Send;
    fn invalidate_all(&self);
}

/// In-process cache backed by `moka`.
#[derive(Clone)]
pub struct MokaPermissionCache {
    inner: Cache<String, Arc<EffectivePermissions>>,
}

impl MokaPermissionCache {
    pub fn new(config: &AuthzConfig) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(config.cache_ttl())
                .build(),
        }
    }
}

impl PermissionCache for MokaPermissionCache {
    async fn get(&self, user_id: Uuid) -> Option<Arc<EffectivePermissions>> {
        let key = cache_key(user_id);
        let entry = self.inner.get(&key).await?;
        if entry.is_fresh(Utc::now()) {
            debug!(%user_id, "Permission cache hit");
            Some(entry)
        } else {
            debug!(%user_id, "Cached permissions passed a binding expiry");
            self.inner.invalidate(&key).await;
            None
        }
    }

    async fn set(&self, user_id: Uuid, permissions: Arc<EffectivePermissions>) {
        self.inner.insert(cache_key(user_id), permissions).await;
    }

    async fn invalidate(&self, user_id: Uuid) {
        self.inner.invalidate(&cache_key(user_id)).await;
    }

    fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration;

    use super::*;

    fn entry(user_id: Uuid, valid_until: Option<chrono::DateTime<Utc>>) -> Arc<EffectivePermissions> {
        Arc::new(EffectivePermissions {
            user_id,
            decisions: BTreeMap::new(),
            computed_at: Utc::now(),
            valid_until,
        })
    }

    #[test]
    fn key_format() {
        let id = Uuid::nil();
        assert_eq!(cache_key(id), format!("perm:{id}"));
    }

    #[tokio::test]
    async fn set_get_invalidate() {
        let cache = MokaPermissionCache::new(&AuthzConfig::default());
        let user = Uuid::new_v4();

        assert!(cache.get(user).await.is_none());
        cache.set(user, entry(user, None)).await;
        assert!(cache.get(user).await.is_some());

        cache.invalidate(user).await;
        assert!(cache.get(user).await.is_none());
    }

    #[tokio::test]
    async fn stale_entry_is_a_miss() {
        let cache = MokaPermissionCache::new(&AuthzConfig::default());
        let user = Uuid::new_v4();

        cache
            .set(user, entry(user, Some(Utc::now() - Duration::seconds(1))))
            .await;
        assert!(cache.get(user).await.is_none());
    }
}
