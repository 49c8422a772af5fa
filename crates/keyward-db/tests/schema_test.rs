//! Integration tests for schema initialization using in-memory SurrealDB.

use surrealdb::Surreal;
use surrealdb::engine::local::Mem;

#[tokio::test]
async fn schema_migration_applies_successfully() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();

    keyward_db::run_migrations(&db).await.unwrap();

    let mut result = db.query("INFO FOR DB").await.unwrap();
    let info: Option<surrealdb_types::Value> = result.take(0).unwrap();
    let info = info.expect("INFO FOR DB should return a value");
    let info_str = format!("{:?}", info);

    for table in [
        "permission",
        "role",
        "role_assignment",
        "role_permission",
        "user_permission",
        "permission_audit",
        "_migration",
    ] {
        assert!(info_str.contains(table), "missing {table} table");
    }
}

#[tokio::test]
async fn migration_is_idempotent() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();

    keyward_db::run_migrations(&db).await.unwrap();
    keyward_db::run_migrations(&db).await.unwrap();

    let mut result = db.query("SELECT * FROM _migration").await.unwrap();
    let records: Vec<surrealdb_types::Value> = result.take(0).unwrap();
    assert_eq!(records.len(), 1, "expected exactly one migration record");
}

#[tokio::test]
async fn unique_index_prevents_duplicate_permission_names() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    keyward_db::run_migrations(&db).await.unwrap();

    let create = "CREATE permission SET name = 'content.edit', \
                  display_name = 'Edit', category = 'Content'";

    db.query(create).await.unwrap().check().unwrap();
    let second = db.query(create).await.unwrap().check();
    assert!(second.is_err(), "duplicate permission name should fail");
}

#[tokio::test]
async fn audit_action_is_constrained() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    keyward_db::run_migrations(&db).await.unwrap();

    let bad = db
        .query(
            "CREATE permission_audit SET permission_name = 'content.edit', \
             action = 'Delete', performed_at = time::now()",
        )
        .await
        .unwrap()
        .check();
    assert!(bad.is_err(), "unknown audit action should be rejected");
}
