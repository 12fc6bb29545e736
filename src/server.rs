use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use actix_web::HttpServer;
use admissions_gateway_migration::{Migrator, MigratorTrait};
use anyhow::Context;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, TlsConfig};
use crate::database;
use crate::router;
use crate::state::AppState;

/// Connect, migrate, start maintenance tasks and serve until shutdown
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let connection = database::connect(&config.database)
        .await
        .context("failed to connect to the session store")?;

    if config.database.migrate {
        Migrator::up(&connection, None)
            .await
            .context("failed to apply migrations")?;
    }

    let state = AppState::build(config, connection).await?;
    let tasks = spawn_maintenance(&state);

    let config = state.config.clone();
    let address = (config.server.host.clone(), config.server.port);
    let factory_state = state.clone();

    let server = HttpServer::new(move || router::app(factory_state.clone()))
        .workers(config.server.worker_count())
        .shutdown_timeout(config.app.shutdown_timeout);

    let server = match &config.server.tls {
        Some(tls) => server.bind_rustls_0_23(address.clone(), load_tls(tls)?)?,
        None => server.bind(address.clone())?,
    };

    tracing::info!(
        host = %address.0,
        port = address.1,
        tls = config.server.tls.is_some(),
        workers = config.server.worker_count(),
        "Gateway listening"
    );

    let result = server.run().await;

    for task in tasks {
        task.abort();
    }
    tracing::info!("Gateway stopped");

    result.map_err(Into::into)
}

/// Idle-session pruning and, for the in-process limiter, stale-cell sweeping
pub fn spawn_maintenance(state: &AppState) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    if state.config.auth.prune_interval > 0 {
        let store = state.guard.store().clone();
        let idle = Duration::from_secs(state.config.auth.session_idle_timeout);
        let every = Duration::from_secs(state.config.auth.prune_interval);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                match store.prune_idle(idle).await {
                    Ok(0) => {}
                    Ok(pruned) => tracing::info!(pruned, "Pruned idle sessions"),
                    Err(err) => tracing::warn!(error = %err, "Failed to prune idle sessions"),
                }
            }
        }));
    }

    if let Some(local) = state.local_rate_limits.clone() {
        let longest = state
            .config
            .security
            .rate_limit
            .tiers
            .values()
            .map(|tier| tier.window_secs)
            .max()
            .unwrap_or(60);
        let every = Duration::from_secs(longest.max(1));
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = local.sweep(every);
                tracing::debug!(removed, remaining = local.len(), "Swept rate limiters");
            }
        }));
    }

    tasks
}

fn load_tls(tls: &TlsConfig) -> anyhow::Result<rustls::ServerConfig> {
    let cert_file = File::open(&tls.cert_file)
        .with_context(|| format!("failed to open {}", tls.cert_file.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate chain")?;

    let key_file = File::open(&tls.key_file)
        .with_context(|| format!("failed to open {}", tls.key_file.display()))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .context("failed to parse private key")?
        .with_context(|| format!("no private key in {}", tls.key_file.display()))?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(config)
}
