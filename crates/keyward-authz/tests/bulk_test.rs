//! Integration tests for bulk grants, revokes, and syncs, using
//! in-memory SurrealDB.

use keyward_authz::{
    AuthzConfig, AuthzService, BulkItemResult, BulkOutcome, BulkRoleRequest, BulkUserRequest,
};
use keyward_core::error::KeywardError;
use keyward_core::models::audit::AuditAction;
use keyward_core::models::permission::CreatePermission;
use keyward_core::models::role::CreateRole;
use keyward_core::repository::{AuditFilter, Pagination};
use keyward_db::SurrealStore;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

type Service = AuthzService<SurrealStore<Db>>;

async fn setup() -> Service {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    keyward_db::run_migrations(&db).await.unwrap();
    AuthzService::new(SurrealStore::new(db), AuthzConfig::default())
}

async fn permissions(svc: &Service, names: &[&str]) {
    for name in names {
        svc.create_permission(CreatePermission {
            name: name.to_string(),
            display_name: name.to_string(),
            category: "Test".into(),
            description: None,
            is_system: false,
        })
        .await
        .unwrap();
    }
}

fn outcome<'a>(results: &'a [BulkItemResult], name: &str) -> &'a BulkOutcome {
    &results
        .iter()
        .find(|r| r.permission_name == name)
        .unwrap_or_else(|| panic!("no result for {name}"))
        .outcome
}

#[tokio::test]
async fn unknown_name_fails_only_its_item() {
    let svc = setup().await;
    permissions(&svc, &["a.read"]).await;
    let user = Uuid::new_v4();

    let results = svc
        .grant_many_to_user(BulkUserRequest::new(user, ["a.read", "b.write"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(outcome(&results, "a.read"), &BulkOutcome::Applied);
    assert!(matches!(
        outcome(&results, "b.write"),
        BulkOutcome::Failed { .. }
    ));
    assert!(svc.is_allowed(user, "a.read").await);
    assert!(!svc.is_allowed(user, "b.write").await);
}

#[tokio::test]
async fn empty_request_is_rejected() {
    let svc = setup().await;
    let err = svc
        .grant_many_to_user(BulkUserRequest::new(Uuid::new_v4(), Vec::<String>::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, KeywardError::Validation { .. }));
}

#[tokio::test]
async fn duplicates_are_reported_once_and_regrants_unchanged() {
    let svc = setup().await;
    permissions(&svc, &["a.read", "a.write"]).await;
    let user = Uuid::new_v4();

    let first = svc
        .grant_many_to_user(BulkUserRequest::new(user, ["a.read", "a.read", "a.write"]))
        .await
        .unwrap();
    assert_eq!(first.len(), 2);

    let second = svc
        .grant_many_to_user(BulkUserRequest::new(user, ["a.read", "a.write"]))
        .await
        .unwrap();
    assert!(second.iter().all(|r| r.outcome == BulkOutcome::Unchanged));

    let log = svc
        .audit_log(
            AuditFilter {
                user_id: Some(user),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(log.total, 2);
}

#[tokio::test]
async fn inactive_permission_cannot_be_granted_but_can_be_revoked() {
    let svc = setup().await;
    permissions(&svc, &["a.read"]).await;
    let user = Uuid::new_v4();
    svc.grant_many_to_user(BulkUserRequest::new(user, ["a.read"]))
        .await
        .unwrap();

    let p = svc.get_permission_by_name("a.read").await.unwrap();
    svc.deactivate_permission(p.id).await.unwrap();

    let granted = svc
        .grant_many_to_user(BulkUserRequest::new(Uuid::new_v4(), ["a.read"]))
        .await
        .unwrap();
    assert!(matches!(granted[0].outcome, BulkOutcome::Failed { .. }));

    let revoked = svc
        .revoke_many_from_user(BulkUserRequest::new(user, ["a.read"]))
        .await
        .unwrap();
    assert_eq!(revoked[0].outcome, BulkOutcome::Applied);
}

#[tokio::test]
async fn role_bulk_grant_reaches_members() {
    let svc = setup().await;
    permissions(&svc, &["a.read", "a.write", "a.delete"]).await;
    let role = svc
        .create_role(CreateRole {
            name: "Writer".into(),
            description: None,
            category: "Custom".into(),
            priority: 10,
            is_system: false,
        })
        .await
        .unwrap();
    let user = Uuid::new_v4();
    svc.assign_role(user, role.id, None).await.unwrap();
    assert!(svc.resolve_all(user).await.unwrap().is_empty());

    let mut request = BulkRoleRequest::new(role.id, ["a.read", "a.write"]);
    request.performed_by = Some("admin".into());
    let results = svc.grant_many_to_role(request).await.unwrap();
    assert!(results.iter().all(|r| r.outcome == BulkOutcome::Applied));

    let allowed = svc.resolve_all(user).await.unwrap();
    assert!(allowed.contains("a.read") && allowed.contains("a.write"));

    let results = svc
        .revoke_many_from_role(BulkRoleRequest::new(role.id, ["a.write", "a.delete"]))
        .await
        .unwrap();
    assert_eq!(outcome(&results, "a.write"), &BulkOutcome::Applied);
    // Never granted, so nothing to revoke.
    assert_eq!(outcome(&results, "a.delete"), &BulkOutcome::Unchanged);
    assert!(!svc.is_allowed(user, "a.write").await);

    let revokes = svc
        .audit_log(
            AuditFilter {
                role_id: Some(role.id),
                action: Some(AuditAction::Revoke),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(revokes.total, 1);
}

#[tokio::test]
async fn unknown_role_is_not_found() {
    let svc = setup().await;
    permissions(&svc, &["a.read"]).await;
    let err = svc
        .grant_many_to_role(BulkRoleRequest::new(Uuid::new_v4(), ["a.read"]))
        .await
        .unwrap_err();
    assert!(matches!(err, KeywardError::NotFound { .. }));
}

#[tokio::test]
async fn sync_replaces_granted_set() {
    let svc = setup().await;
    permissions(&svc, &["a.read", "a.write", "a.delete"]).await;
    let user = Uuid::new_v4();

    svc.grant_many_to_user(BulkUserRequest::new(user, ["a.read", "a.write"]))
        .await
        .unwrap();

    let results = svc
        .sync_user_permissions(BulkUserRequest::new(user, ["a.write", "a.delete"]))
        .await
        .unwrap();
    assert_eq!(outcome(&results, "a.write"), &BulkOutcome::Unchanged);
    assert_eq!(outcome(&results, "a.delete"), &BulkOutcome::Applied);
    assert_eq!(outcome(&results, "a.read"), &BulkOutcome::Applied);

    let allowed: Vec<_> = svc.resolve_all(user).await.unwrap().into_iter().collect();
    assert_eq!(allowed, vec!["a.delete".to_string(), "a.write".to_string()]);

    // An empty sync clears everything.
    svc.sync_user_permissions(BulkUserRequest::new(user, Vec::<String>::new()))
        .await
        .unwrap();
    assert!(svc.resolve_all(user).await.unwrap().is_empty());
}

#[tokio::test]
async fn sync_role_permissions() {
    let svc = setup().await;
    permissions(&svc, &["a.read", "a.write"]).await;
    let role = svc
        .create_role(CreateRole {
            name: "Reader".into(),
            description: None,
            category: "Custom".into(),
            priority: 1,
            is_system: false,
        })
        .await
        .unwrap();

    svc.grant_many_to_role(BulkRoleRequest::new(role.id, ["a.write"]))
        .await
        .unwrap();
    svc.sync_role_permissions(BulkRoleRequest::new(role.id, ["a.read"]))
        .await
        .unwrap();

    let readers = svc.roles_with_permission("a.read").await.unwrap();
    assert_eq!(readers.len(), 1);
    assert!(svc.roles_with_permission("a.write").await.unwrap().is_empty());
}
