//! Keyward Server: application entry point.
//!
//! Connects to SurrealDB, applies migrations, optionally seeds the system
//! catalog, and runs the expiry sweeper until interrupted.

use clap::Parser;
use keyward_authz::{AuthzConfig, AuthzService};
use keyward_db::{DbConfig, DbManager};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keyward")]
#[command(about = "Role and permission authorization engine")]
struct Cli {
    /// SurrealDB WebSocket address, without scheme.
    #[arg(long, env = "KEYWARD_DB_URL", default_value = "127.0.0.1:8000")]
    db_url: String,

    #[arg(long, env = "KEYWARD_DB_NAMESPACE", default_value = "keyward")]
    db_namespace: String,

    #[arg(long, env = "KEYWARD_DB_DATABASE", default_value = "authz")]
    db_database: String,

    #[arg(long, env = "KEYWARD_DB_USERNAME", default_value = "root")]
    db_username: String,

    #[arg(long, env = "KEYWARD_DB_PASSWORD", default_value = "root", hide_env_values = true)]
    db_password: String,

    /// Seconds between expiry sweeps.
    #[arg(long, env = "KEYWARD_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    sweep_interval_secs: u64,

    /// Rows fetched per sweep query.
    #[arg(long, env = "KEYWARD_SWEEP_BATCH_SIZE", default_value_t = 500)]
    sweep_batch_size: u64,

    /// Users whose resolved permissions are kept in memory.
    #[arg(long, env = "KEYWARD_CACHE_CAPACITY", default_value_t = 10_000)]
    cache_capacity: u64,

    #[arg(long, env = "KEYWARD_CACHE_TTL_SECS", default_value_t = 60)]
    cache_ttl_secs: u64,

    /// Deadline for preparing a bulk operation. Unset waits indefinitely.
    #[arg(long, env = "KEYWARD_BULK_TIMEOUT_SECS")]
    bulk_timeout_secs: Option<u64>,

    /// Create missing system permissions and roles on startup.
    #[arg(long, env = "KEYWARD_SEED")]
    seed: bool,
}

impl Cli {
    fn db_config(&self) -> DbConfig {
        DbConfig {
            url: self.db_url.clone(),
            namespace: self.db_namespace.clone(),
            database: self.db_database.clone(),
            username: self.db_username.clone(),
            password: self.db_password.clone(),
        }
    }

    fn authz_config(&self) -> AuthzConfig {
        AuthzConfig {
            cache_capacity: self.cache_capacity,
            cache_ttl_secs: self.cache_ttl_secs,
            sweep_interval_secs: self.sweep_interval_secs,
            sweep_batch_size: self.sweep_batch_size,
            bulk_timeout_secs: self.bulk_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("keyward=info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting Keyward server...");

    let manager = DbManager::connect(&cli.db_config()).await?;
    manager.migrate().await?;

    let service = AuthzService::new(manager.store(), cli.authz_config());
    if cli.seed {
        service.seed_system_catalog().await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(service.sweeper().run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    // Receiver may already be gone if the sweeper exited on its own.
    let _ = shutdown_tx.send(true);
    sweeper.await?;

    tracing::info!("Keyward server stopped.");
    Ok(())
}
