//! Schema definitions and migration runner for SurrealDB.
//!
//! All tables are SCHEMAFULL. UUIDs are stored as strings; binding and
//! assignment records use ids derived from their pair so that a second
//! write for the same pair lands on the same record.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "authorization_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Permission catalog
-- =======================================================================
DEFINE TABLE permission SCHEMAFULL;
DEFINE FIELD name ON TABLE permission TYPE string;
DEFINE FIELD display_name ON TABLE permission TYPE string;
DEFINE FIELD description ON TABLE permission TYPE option<string>;
DEFINE FIELD category ON TABLE permission TYPE string;
DEFINE FIELD is_system ON TABLE permission TYPE bool DEFAULT false;
DEFINE FIELD is_active ON TABLE permission TYPE bool DEFAULT true;
DEFINE FIELD created_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_permission_name ON TABLE permission \
    COLUMNS name UNIQUE;
DEFINE INDEX idx_permission_category ON TABLE permission \
    COLUMNS category;

-- =======================================================================
-- Role registry
-- =======================================================================
DEFINE TABLE role SCHEMAFULL;
DEFINE FIELD name ON TABLE role TYPE string;
DEFINE FIELD description ON TABLE role TYPE option<string>;
DEFINE FIELD category ON TABLE role TYPE string;
DEFINE FIELD is_system ON TABLE role TYPE bool DEFAULT false;
DEFINE FIELD is_active ON TABLE role TYPE bool DEFAULT true;
DEFINE FIELD priority ON TABLE role TYPE int DEFAULT 0;
DEFINE FIELD created_at ON TABLE role TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE role TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_role_name ON TABLE role COLUMNS name UNIQUE;

-- =======================================================================
-- Role membership (record id = <user_id>_<role_id>)
-- =======================================================================
DEFINE TABLE role_assignment SCHEMAFULL;
DEFINE FIELD user_id ON TABLE role_assignment TYPE string;
DEFINE FIELD role_id ON TABLE role_assignment TYPE string;
DEFINE FIELD assigned_by ON TABLE role_assignment TYPE option<string>;
DEFINE FIELD assigned_at ON TABLE role_assignment TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_assignment_pair ON TABLE role_assignment \
    COLUMNS user_id, role_id UNIQUE;
DEFINE INDEX idx_assignment_role ON TABLE role_assignment \
    COLUMNS role_id;

-- =======================================================================
-- Role -> Permission bindings (record id = <role_id>_<permission_id>)
-- =======================================================================
DEFINE TABLE role_permission SCHEMAFULL;
DEFINE FIELD role_id ON TABLE role_permission TYPE string;
DEFINE FIELD permission_id ON TABLE role_permission TYPE string;
DEFINE FIELD permission_name ON TABLE role_permission TYPE string;
DEFINE FIELD is_granted ON TABLE role_permission TYPE bool;
DEFINE FIELD expires_at ON TABLE role_permission TYPE option<datetime>;
DEFINE FIELD granted_by ON TABLE role_permission TYPE option<string>;
DEFINE FIELD reason ON TABLE role_permission TYPE option<string>;
DEFINE FIELD swept_at ON TABLE role_permission TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE role_permission TYPE datetime;
DEFINE FIELD updated_at ON TABLE role_permission TYPE datetime;
DEFINE INDEX idx_role_permission_pair ON TABLE role_permission \
    COLUMNS role_id, permission_id UNIQUE;
DEFINE INDEX idx_role_permission_permission ON TABLE role_permission \
    COLUMNS permission_id;

-- =======================================================================
-- User -> Permission bindings (record id = <user_id>_<permission_id>)
-- =======================================================================
DEFINE TABLE user_permission SCHEMAFULL;
DEFINE FIELD user_id ON TABLE user_permission TYPE string;
DEFINE FIELD permission_id ON TABLE user_permission TYPE string;
DEFINE FIELD permission_name ON TABLE user_permission TYPE string;
DEFINE FIELD is_granted ON TABLE user_permission TYPE bool;
DEFINE FIELD is_override ON TABLE user_permission TYPE bool;
DEFINE FIELD expires_at ON TABLE user_permission TYPE option<datetime>;
DEFINE FIELD granted_by ON TABLE user_permission TYPE option<string>;
DEFINE FIELD reason ON TABLE user_permission TYPE option<string>;
DEFINE FIELD swept_at ON TABLE user_permission TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE user_permission TYPE datetime;
DEFINE FIELD updated_at ON TABLE user_permission TYPE datetime;
DEFINE INDEX idx_user_permission_pair ON TABLE user_permission \
    COLUMNS user_id, permission_id UNIQUE;
DEFINE INDEX idx_user_permission_permission ON TABLE user_permission \
    COLUMNS permission_id;

-- =======================================================================
-- Permission audit (append-only)
-- =======================================================================
DEFINE TABLE permission_audit SCHEMAFULL
    PERMISSIONS
        FOR create FULL
        FOR select FULL
        FOR update NONE
        FOR delete NONE;
DEFINE FIELD user_id ON TABLE permission_audit TYPE option<string>;
DEFINE FIELD role_id ON TABLE permission_audit TYPE option<string>;
DEFINE FIELD permission_name ON TABLE permission_audit TYPE string;
DEFINE FIELD action ON TABLE permission_audit TYPE string \
    ASSERT $value IN ['Grant', 'Revoke', 'Expire'];
DEFINE FIELD performed_by ON TABLE permission_audit TYPE option<string>;
DEFINE FIELD reason ON TABLE permission_audit TYPE option<string>;
DEFINE FIELD performed_at ON TABLE permission_audit TYPE datetime;
DEFINE FIELD metadata ON TABLE permission_audit TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE INDEX idx_audit_time ON TABLE permission_audit \
    COLUMNS performed_at;
DEFINE INDEX idx_audit_user ON TABLE permission_audit COLUMNS user_id;
DEFINE INDEX idx_audit_role ON TABLE permission_audit COLUMNS role_id;
DEFINE INDEX idx_audit_permission ON TABLE permission_audit \
    COLUMNS permission_name;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT version FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
    {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "v{} '{}' failed: {}",
                migration.version, migration.name, e,
            ))
        })?;

        db.query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "could not record v{}: {}",
                    migration.version, e,
                ))
            })?;
    }

    if current_version >= latest_version() {
        info!(version = current_version, "Schema is up to date");
    }

    Ok(())
}

fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[0].version < window[1].version,
                "Migrations must be in ascending version order"
            );
        }
    }

    #[test]
    fn binding_tables_enforce_pair_uniqueness() {
        assert!(SCHEMA_V1.contains("COLUMNS role_id, permission_id UNIQUE"));
        assert!(SCHEMA_V1.contains("COLUMNS user_id, permission_id UNIQUE"));
        assert!(SCHEMA_V1.contains("COLUMNS name UNIQUE"));
    }
}
