//! Everything built once at startup and shared by every worker

use std::sync::Arc;

use anyhow::Context;
use sea_orm::DatabaseConnection;

use crate::config::{AppConfig, RateLimitBackend, RateLimitConfig};
use crate::database::DatabasePool;
use crate::metrics::AppMetrics;
use crate::middlewares::SessionGuard;
use crate::models::{DatabaseSessionStore, SessionStore};
use crate::proxy::{RouteTable, UpstreamTls};
use crate::security::{LocalRateLimitStore, RateLimitStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: DatabasePool,
    pub guard: SessionGuard,
    pub routes: Arc<RouteTable>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    /// Set when the in-process backend is used, for the sweeper
    pub local_rate_limits: Option<LocalRateLimitStore>,
    pub tls: UpstreamTls,
    pub metrics: AppMetrics,
}

impl AppState {
    pub async fn build(config: AppConfig, connection: DatabaseConnection) -> anyhow::Result<Self> {
        let routes = RouteTable::new(&config.proxy.routes).context("invalid route table")?;
        let pool = DatabasePool::new(connection, &config.resilience);
        let store: Arc<dyn SessionStore> = Arc::new(DatabaseSessionStore::new(pool.clone()));
        let guard = SessionGuard::new(&config.auth, config.resilience.retry.clone(), store);
        let (rate_limits, local_rate_limits) = rate_limit_store(&config.security.rate_limit).await?;
        let tls = UpstreamTls::new(&config.proxy.mesh).context("failed to build upstream TLS")?;
        let metrics = AppMetrics::with_config(Some(&config));

        tracing::info!(
            routes = routes.len(),
            rate_limit_backend = ?config.security.rate_limit.backend,
            "Gateway state initialised"
        );

        Ok(Self {
            config: Arc::new(config),
            pool,
            guard,
            routes: Arc::new(routes),
            rate_limits,
            local_rate_limits,
            tls,
            metrics,
        })
    }
}

async fn rate_limit_store(
    config: &RateLimitConfig,
) -> anyhow::Result<(Arc<dyn RateLimitStore>, Option<LocalRateLimitStore>)> {
    match config.backend {
        RateLimitBackend::Local => {
            let local = LocalRateLimitStore::new();
            Ok((Arc::new(local.clone()), Some(local)))
        }
        #[cfg(feature = "redis-store")]
        RateLimitBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("security.rate_limit.redis_url is not set")?;
            let store = crate::security::RedisRateLimitStore::connect(url).await?;
            Ok((Arc::new(store), None))
        }
        #[cfg(not(feature = "redis-store"))]
        RateLimitBackend::Redis => {
            anyhow::bail!("the redis rate-limit backend requires the redis-store feature")
        }
    }
}
