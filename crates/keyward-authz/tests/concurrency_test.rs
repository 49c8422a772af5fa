//! Concurrent writers, deadlines, and injected storage failures, using
//! in-memory SurrealDB behind a store that can be told to stall or fail.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use keyward_authz::{
    AuthzConfig, AuthzService, BulkOutcome, BulkUserRequest, EffectivePermissions,
    MokaPermissionCache, PermissionCache,
};
use keyward_core::error::{KeywardError, KeywardResult};
use keyward_core::models::audit::AuditAction;
use keyward_core::models::binding::{BindingBatch, ChangeContext, RolePermission, UserPermission};
use keyward_core::models::permission::CreatePermission;
use keyward_core::models::role::{CreateRole, Role, RoleAssignment};
use keyward_core::repository::{
    AuditFilter, BindingRepository, Pagination, RoleMembershipRepository, Store,
};
use keyward_db::SurrealStore;
use keyward_db::repository::{
    SurrealAuditLogRepository, SurrealBindingRepository, SurrealMembershipRepository,
    SurrealPermissionRepository, SurrealRoleRepository,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tokio::sync::Notify;
use uuid::Uuid;

// -----------------------------------------------------------------------
// A store with switchable faults
// -----------------------------------------------------------------------

#[derive(Default)]
struct Faults {
    /// Added to every binding read.
    read_delay_ms: AtomicU64,
    fail_apply: AtomicBool,
    fail_member_lookup: AtomicBool,
}

impl Faults {
    async fn stall(&self) {
        let ms = self.read_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

fn injected(what: &str) -> KeywardError {
    KeywardError::Database(format!("injected {what} failure"))
}

struct FaultyBindings {
    inner: SurrealBindingRepository<Db>,
    faults: Arc<Faults>,
}

impl BindingRepository for FaultyBindings {
    async fn role_binding(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> KeywardResult<Option<RolePermission>> {
        self.faults.stall().await;
        self.inner.role_binding(role_id, permission_id).await
    }

    async fn user_binding(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
    ) -> KeywardResult<Option<UserPermission>> {
        self.faults.stall().await;
        self.inner.user_binding(user_id, permission_id).await
    }

    async fn role_bindings_for_roles(&self, role_ids: &[Uuid]) -> KeywardResult<Vec<RolePermission>> {
        self.faults.stall().await;
        self.inner.role_bindings_for_roles(role_ids).await
    }

    async fn user_bindings(&self, user_id: Uuid) -> KeywardResult<Vec<UserPermission>> {
        self.faults.stall().await;
        self.inner.user_bindings(user_id).await
    }

    async fn role_bindings_for_permission(
        &self,
        permission_id: Uuid,
    ) -> KeywardResult<Vec<RolePermission>> {
        self.inner.role_bindings_for_permission(permission_id).await
    }

    async fn count_for_permission(&self, permission_id: Uuid) -> KeywardResult<u64> {
        self.inner.count_for_permission(permission_id).await
    }

    async fn count_for_role(&self, role_id: Uuid) -> KeywardResult<u64> {
        self.inner.count_for_role(role_id).await
    }

    async fn pending_role_expirations(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> KeywardResult<Vec<RolePermission>> {
        self.inner.pending_role_expirations(now, limit).await
    }

    async fn pending_user_expirations(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> KeywardResult<Vec<UserPermission>> {
        self.inner.pending_user_expirations(now, limit).await
    }

    async fn apply(&self, batch: BindingBatch) -> KeywardResult<()> {
        if self.faults.fail_apply.load(Ordering::SeqCst) {
            return Err(injected("commit"));
        }
        self.inner.apply(batch).await
    }
}

struct FaultyMemberships {
    inner: SurrealMembershipRepository<Db>,
    faults: Arc<Faults>,
}

impl RoleMembershipRepository for FaultyMemberships {
    async fn assign(&self, assignment: RoleAssignment) -> KeywardResult<bool> {
        self.inner.assign(assignment).await
    }

    async fn unassign(&self, user_id: Uuid, role_id: Uuid) -> KeywardResult<bool> {
        self.inner.unassign(user_id, role_id).await
    }

    async fn role_ids_for_user(&self, user_id: Uuid) -> KeywardResult<Vec<Uuid>> {
        self.inner.role_ids_for_user(user_id).await
    }

    async fn user_ids_for_role(&self, role_id: Uuid) -> KeywardResult<Vec<Uuid>> {
        if self.faults.fail_member_lookup.load(Ordering::SeqCst) {
            return Err(injected("member lookup"));
        }
        self.inner.user_ids_for_role(role_id).await
    }
}

struct FaultyStore {
    inner: SurrealStore<Db>,
    bindings: FaultyBindings,
    memberships: FaultyMemberships,
}

impl Store for FaultyStore {
    type Permissions = SurrealPermissionRepository<Db>;
    type Roles = SurrealRoleRepository<Db>;
    type Memberships = FaultyMemberships;
    type Bindings = FaultyBindings;
    type Audit = SurrealAuditLogRepository<Db>;

    fn permissions(&self) -> &Self::Permissions {
        self.inner.permissions()
    }

    fn roles(&self) -> &Self::Roles {
        self.inner.roles()
    }

    fn memberships(&self) -> &Self::Memberships {
        &self.memberships
    }

    fn bindings(&self) -> &Self::Bindings {
        &self.bindings
    }

    fn audit(&self) -> &Self::Audit {
        self.inner.audit()
    }
}

type Service = AuthzService<FaultyStore>;

async fn memory_db() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    keyward_db::run_migrations(&db).await.unwrap();
    db
}

/// Helper: a service over a faulty store with `a.read`, `a.write`, and
/// `a.delete` in the catalog.
async fn setup() -> (Arc<Service>, Arc<Faults>) {
    let db = memory_db().await;
    let faults = Arc::new(Faults::default());
    let store = FaultyStore {
        inner: SurrealStore::new(db.clone()),
        bindings: FaultyBindings {
            inner: SurrealBindingRepository::new(db.clone()),
            faults: faults.clone(),
        },
        memberships: FaultyMemberships {
            inner: SurrealMembershipRepository::new(db),
            faults: faults.clone(),
        },
    };
    let svc = AuthzService::new(store, AuthzConfig::default());
    for name in ["a.read", "a.write", "a.delete"] {
        svc.create_permission(CreatePermission {
            name: name.into(),
            display_name: name.into(),
            category: "A".into(),
            description: None,
            is_system: false,
        })
        .await
        .unwrap();
    }
    (Arc::new(svc), faults)
}

async fn editor<S: Store, C: PermissionCache>(svc: &Arc<AuthzService<S, C>>) -> Role {
    svc.create_role(CreateRole {
        name: "Editor".into(),
        description: None,
        category: "Custom".into(),
        priority: 10,
        is_system: false,
    })
    .await
    .unwrap()
}

fn ctx() -> ChangeContext {
    ChangeContext::new(Some("admin".into()), None)
}

async fn audit_count(svc: &Service, action: Option<AuditAction>) -> u64 {
    svc.audit_log(
        AuditFilter {
            action,
            ..Default::default()
        },
        Pagination::default(),
    )
    .await
    .unwrap()
    .total
}

// -----------------------------------------------------------------------
// Concurrent writers
// -----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_grants_on_one_pair_keep_one_row() {
    let (svc, faults) = setup().await;
    faults.read_delay_ms.store(5, Ordering::SeqCst);
    let user = Uuid::new_v4();
    let soon = Utc::now() + chrono::Duration::hours(1);
    let later = Utc::now() + chrono::Duration::hours(2);
    let expiries = [None, Some(soon), Some(soon), Some(later), None, Some(later), None, Some(soon)];

    let mut tasks = Vec::new();
    for expires_at in expiries {
        let svc = svc.clone();
        tasks.push(tokio::spawn(async move {
            svc.grant_user_permission(user, "a.read", false, expires_at, ctx())
                .await
        }));
    }

    let mut applied = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() {
            applied += 1;
        }
    }
    faults.read_delay_ms.store(0, Ordering::SeqCst);

    assert!(applied >= 1);
    let rows = svc.store().bindings().user_bindings(user).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_granted);
    assert!(expiries.contains(&rows[0].expires_at));
    assert_eq!(audit_count(&svc, Some(AuditAction::Grant)).await, applied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_bulk_and_single_grants_agree_with_the_log() {
    let (svc, _) = setup().await;
    let user = Uuid::new_v4();

    let bulk = {
        let svc = svc.clone();
        tokio::spawn(async move {
            svc.grant_many_to_user(BulkUserRequest::new(user, ["a.read", "a.write", "a.delete"]))
                .await
        })
    };
    let single = {
        let svc = svc.clone();
        tokio::spawn(async move {
            svc.grant_user_permission(user, "a.write", false, None, ctx())
                .await
        })
    };

    let bulk = bulk.await.unwrap().unwrap();
    let single = single.await.unwrap().unwrap();

    let applied = bulk
        .iter()
        .filter(|r| r.outcome == BulkOutcome::Applied)
        .count() as u64
        + u64::from(single);
    // Whichever ran second found `a.write` already granted.
    assert_eq!(applied, 3);
    assert_eq!(svc.store().bindings().user_bindings(user).await.unwrap().len(), 3);
    assert_eq!(audit_count(&svc, Some(AuditAction::Grant)).await, 3);
}

// -----------------------------------------------------------------------
// Deadlines and injected failures
// -----------------------------------------------------------------------

#[tokio::test]
async fn expired_request_deadline_writes_nothing() {
    let (svc, faults) = setup().await;
    faults.read_delay_ms.store(200, Ordering::SeqCst);
    let user = Uuid::new_v4();

    let mut request = BulkUserRequest::new(user, ["a.read", "a.write"]);
    request.timeout = Some(Duration::from_millis(10));
    let err = svc.grant_many_to_user(request).await.unwrap_err();
    assert!(matches!(err, KeywardError::Timeout), "unexpected error: {err:?}");

    faults.read_delay_ms.store(0, Ordering::SeqCst);
    assert!(svc.store().bindings().user_bindings(user).await.unwrap().is_empty());
    assert_eq!(audit_count(&svc, None).await, 0);

    // The same request without a deadline goes through.
    let results = svc
        .grant_many_to_user(BulkUserRequest::new(user, ["a.read", "a.write"]))
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.outcome == BulkOutcome::Applied));
}

#[tokio::test]
async fn failed_bulk_commit_is_all_or_nothing() {
    let (svc, faults) = setup().await;
    let user = Uuid::new_v4();
    faults.fail_apply.store(true, Ordering::SeqCst);

    let err = svc
        .grant_many_to_user(BulkUserRequest::new(user, ["a.read", "a.write", "a.delete"]))
        .await
        .unwrap_err();
    assert!(matches!(err, KeywardError::Database(_)));
    assert!(svc.store().bindings().user_bindings(user).await.unwrap().is_empty());
    assert_eq!(audit_count(&svc, None).await, 0);
    assert!(!svc.is_allowed(user, "a.read").await);

    // Nothing stays locked after the failure.
    faults.fail_apply.store(false, Ordering::SeqCst);
    let results = svc
        .grant_many_to_user(BulkUserRequest::new(user, ["a.read", "a.write", "a.delete"]))
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.outcome == BulkOutcome::Applied));
    assert_eq!(audit_count(&svc, Some(AuditAction::Grant)).await, 3);
    assert!(svc.is_allowed(user, "a.read").await);
}

#[tokio::test]
async fn member_lookup_failure_after_commit_still_refreshes_cache() {
    let (svc, faults) = setup().await;
    let role = editor(&svc).await;
    let user = Uuid::new_v4();
    svc.assign_role(user, role.id, None).await.unwrap();

    // Prime the cache with the empty set.
    assert!(!svc.is_allowed(user, "a.write").await);

    faults.fail_member_lookup.store(true, Ordering::SeqCst);
    let changed = svc
        .grant_role_permission(role.id, "a.write", None, ctx())
        .await
        .unwrap();
    assert!(changed);
    assert!(svc.is_allowed(user, "a.write").await);

    svc.update_role_priority(role.id, 20).await.unwrap();
    assert_eq!(audit_count(&svc, Some(AuditAction::Grant)).await, 1);
}

// -----------------------------------------------------------------------
// Cache population racing an invalidation
// -----------------------------------------------------------------------

/// Parks the first `set` until the test releases it.
#[derive(Default)]
struct Gate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

struct GatedCache {
    inner: MokaPermissionCache,
    gate: Arc<Gate>,
}

impl PermissionCache for GatedCache {
    async fn get(&self, user_id: Uuid) -> Option<Arc<EffectivePermissions>> {
        self.inner.get(user_id).await
    }

    async fn set(&self, user_id: Uuid, permissions: Arc<EffectivePermissions>) {
        if self.gate.armed.swap(false, Ordering::SeqCst) {
            self.gate.entered.notify_one();
            self.gate.release.notified().await;
        }
        self.inner.set(user_id, permissions).await;
    }

    async fn invalidate(&self, user_id: Uuid) {
        self.inner.invalidate(user_id).await;
    }

    fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn grant_landing_during_cache_fill_is_not_lost() {
    let config = AuthzConfig::default();
    let gate = Arc::new(Gate::default());
    let cache = GatedCache {
        inner: MokaPermissionCache::new(&config),
        gate: gate.clone(),
    };
    let svc = Arc::new(AuthzService::with_cache(
        SurrealStore::new(memory_db().await),
        cache,
        config,
    ));
    svc.create_permission(CreatePermission {
        name: "a.write".into(),
        display_name: "a.write".into(),
        category: "A".into(),
        description: None,
        is_system: false,
    })
    .await
    .unwrap();
    let role = editor(&svc).await;
    let user = Uuid::new_v4();
    svc.assign_role(user, role.id, None).await.unwrap();

    gate.armed.store(true, Ordering::SeqCst);
    let reader = {
        let svc = svc.clone();
        tokio::spawn(async move { svc.is_allowed(user, "a.write").await })
    };

    // The reader has loaded its snapshot and is about to cache it.
    gate.entered.notified().await;
    svc.grant_role_permission(role.id, "a.write", None, ctx())
        .await
        .unwrap();
    gate.release.notify_one();

    assert!(!reader.await.unwrap(), "the reader loaded before the grant");
    assert!(svc.is_allowed(user, "a.write").await);
}
