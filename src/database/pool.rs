//! Session-store connection guarded by the breaker registry
//!
//! Every statement runs through one of the three breaker classes, so a slow
//! or failing database fails fast instead of piling up in-flight requests.
//!
//! # Example
//!
//! ```rust
//! use admissions_gateway::config::ResilienceConfig;
//! use admissions_gateway::database::DatabasePool;
//! use sea_orm::ConnectionTrait;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = sea_orm::Database::connect("sqlite::memory:").await?;
//! let pool = DatabasePool::new(db, &ResilienceConfig::default());
//!
//! pool.simple(|db| async move { db.execute_unprepared("SELECT 1").await })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use thiserror::Error;

use crate::config::{DatabaseConfig, ResilienceConfig};
use crate::resilience::{BreakerClass, BreakerError, BreakerRegistry, BreakerStats};

/// Database operation error with circuit breaker support
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Breaker is open, the statement was never sent
    #[error("{name} circuit breaker is open, session store temporarily unavailable")]
    CircuitOpen { name: String },

    /// Statement exceeded the breaker's timeout and was abandoned
    #[error("{name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    QueryFailed(#[from] DbErr),
}

impl From<BreakerError<DbErr>> for DatabaseError {
    fn from(error: BreakerError<DbErr>) -> Self {
        match error {
            BreakerError::Open { name } => DatabaseError::CircuitOpen { name },
            BreakerError::Timeout { name, timeout } => DatabaseError::Timeout { name, timeout },
            BreakerError::Inner(err) => DatabaseError::QueryFailed(err),
        }
    }
}

/// Open the session-store connection described by `config`
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .sqlx_logging(false);

    // Every connection to an in-memory SQLite database is its own database
    if config.url.contains(":memory:") {
        options.max_connections(1).min_connections(1);
    }

    tracing::info!(
        max_connections = config.max_connections,
        "Connecting to session store"
    );
    Database::connect(options).await
}

/// Database connection with circuit breaker protection
#[derive(Clone)]
pub struct DatabasePool {
    connection: DatabaseConnection,
    breakers: BreakerRegistry,
}

impl DatabasePool {
    pub fn new(connection: DatabaseConnection, config: &ResilienceConfig) -> Self {
        Self::with_breakers(connection, BreakerRegistry::new("sessions", config))
    }

    pub fn with_breakers(connection: DatabaseConnection, breakers: BreakerRegistry) -> Self {
        Self {
            connection,
            breakers,
        }
    }

    /// Get a reference to the underlying database connection
    ///
    /// Using this bypasses circuit breaker protection. Migrations and tests
    /// only.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Execute a database operation under the breaker for `class`
    ///
    /// The operation receives its own handle to the connection so the future
    /// it returns owns everything it needs.
    pub async fn execute<F, Fut, T>(&self, class: BreakerClass, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(DatabaseConnection) -> Fut,
        Fut: Future<Output = Result<T, DbErr>>,
    {
        let start = Instant::now();
        let result = self
            .breakers
            .get(class)
            .call(f(self.connection.clone()))
            .await;

        metrics::histogram!("database_queries_duration_seconds", "class" => class.as_str())
            .record(start.elapsed().as_secs_f64());

        result.map_err(|err| {
            let err = DatabaseError::from(err);
            match &err {
                DatabaseError::CircuitOpen { .. } => {
                    tracing::debug!(class = class.as_str(), "Statement short-circuited");
                }
                _ => {
                    tracing::error!(class = class.as_str(), error = %err, "Database operation failed");
                }
            }
            err
        })
    }

    /// Fast keyed lookup
    pub async fn simple<F, Fut, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(DatabaseConnection) -> Fut,
        Fut: Future<Output = Result<T, DbErr>>,
    {
        self.execute(BreakerClass::Simple, f).await
    }

    /// Joins and everything without a more specific class
    pub async fn medium<F, Fut, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(DatabaseConnection) -> Fut,
        Fut: Future<Output = Result<T, DbErr>>,
    {
        self.execute(BreakerClass::Medium, f).await
    }

    /// Mutation
    pub async fn write<F, Fut, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(DatabaseConnection) -> Fut,
        Fut: Future<Output = Result<T, DbErr>>,
    {
        self.execute(BreakerClass::Write, f).await
    }

    /// Round-trip to the database through the `simple` breaker
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        self.simple(|db| async move { db.ping().await }).await
    }

    pub fn stats(&self) -> Vec<BreakerStats> {
        self.breakers.stats()
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("breakers", &self.breakers)
            .finish()
    }
}
