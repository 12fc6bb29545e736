use std::path::{Path, PathBuf};
use std::sync::Arc;

use admissions_gateway_migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::config::{AppConfig, AuthConfig, DatabaseConfig, ResilienceConfig, RetryConfig, RouteConfig};
use crate::database::DatabasePool;
use crate::middlewares::SessionGuard;
use crate::models::DatabaseSessionStore;
use crate::state::AppState;

/// Returns an in-memory SQLite database with all migrations applied
///
/// Each call creates a separate database.
///
/// # Example
/// ```no_run
/// use admissions_gateway::testing::setup;
///
/// # async fn example() {
/// let db = setup::database().await;
/// assert!(db.ping().await.is_ok());
/// # }
/// ```
pub async fn database() -> DatabaseConnection {
    let db = crate::database::connect(&DatabaseConfig::default())
        .await
        .expect("Failed to connect to in-memory database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}

/// Migrated SQLite database in a fresh temporary file
///
/// Unlike [`database`], several pooled connections can be open at once, so
/// statements issued concurrently really overlap. Remove the returned path
/// when done.
pub async fn file_database(max_connections: u32) -> (DatabaseConnection, PathBuf) {
    let path = std::env::temp_dir().join(format!("admissions-gateway-{}.db", Uuid::new_v4()));
    let config = DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", path.display()),
        max_connections,
        ..DatabaseConfig::default()
    };

    let db = crate::database::connect(&config)
        .await
        .expect("Failed to open file database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    (db, path)
}

/// Delete a database created by [`file_database`], including SQLite side files
pub fn remove_file_database(path: &Path) {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(file);
    }
}

/// Migrated database behind a default breaker registry
pub async fn database_pool() -> DatabasePool {
    DatabasePool::new(database().await, &ResilienceConfig::default())
}

/// Session guard over a fresh database with default auth settings
pub async fn session_guard() -> SessionGuard {
    let store = Arc::new(DatabaseSessionStore::new(database_pool().await));
    SessionGuard::new(&AuthConfig::default(), RetryConfig::default(), store)
}

/// Default configuration with generous rate limits and no routes
pub fn config() -> AppConfig {
    let mut config = AppConfig::default();
    if let Some(tier) = config.security.rate_limit.tiers.get_mut("default") {
        tier.requests = 10_000;
    }
    config
}

pub fn route(prefix: &str, upstream: &str, auth_required: bool) -> RouteConfig {
    RouteConfig {
        prefix: prefix.to_string(),
        upstream: upstream.to_string(),
        auth_required,
        rate_limit_tier: "default".to_string(),
        roles: None,
        timeout_ms: None,
    }
}

/// Full application state over a fresh in-memory database
pub async fn state(config: AppConfig) -> AppState {
    state_with_database(config, database().await).await
}

/// Full application state over an already migrated database
pub async fn state_with_database(config: AppConfig, db: DatabaseConnection) -> AppState {
    AppState::build(config, db)
        .await
        .expect("Failed to build application state")
}
