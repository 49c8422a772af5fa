//! SurrealDB connection management.

use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::info;

use crate::error::DbError;
use crate::schema::run_migrations;
use crate::store::SurrealStore;

/// Where and how to reach the SurrealDB instance holding the catalog.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `host:port` of the WebSocket endpoint.
    pub url: String,
    /// Namespace holding the authorization database.
    pub namespace: String,
    pub database: String,
    /// Root credentials.
    pub username: String,
    pub password: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "keyward".into(),
            database: "authz".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }
}

/// Shared WebSocket client for the authorization store.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    /// Sign in as root and select the configured namespace and database.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Connecting to SurrealDB"
        );

        let db = Surreal::new::<Ws>(&config.url).await?;

        db.signin(Root {
            username: config.username.clone(),
            password: config.password.clone(),
        })
        .await?;

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        info!("Connected to SurrealDB");

        Ok(Self { db })
    }

    /// Raw client, for ad-hoc queries and tests.
    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }

    /// Bring the schema up to date.
    pub async fn migrate(&self) -> Result<(), DbError> {
        run_migrations(&self.db).await
    }

    /// Repository bundle sharing this connection.
    pub fn store(&self) -> SurrealStore<Client> {
        SurrealStore::new(self.db.clone())
    }
}
