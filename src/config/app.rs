use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{
    AuthConfig, ConfigError, ProxyConfig, ResilienceConfig, SecurityConfig, Validate, invalid,
};

/// Top-level application configuration that aggregates all config modules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application metadata
    #[serde(default)]
    pub app: AppMetadata,
    /// Listener configuration (host, port, workers, TLS)
    #[serde(default)]
    pub server: ServerConfig,
    /// Session store connection
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Token signing and session lifetime
    #[serde(default)]
    pub auth: AuthConfig,
    /// CORS and rate limiting
    #[serde(default)]
    pub security: SecurityConfig,
    /// Circuit breakers and retry policy
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// Route table and upstream transport
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Internal operations surface
    #[serde(default)]
    pub ops: OpsConfig,
}

/// Application metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_version")]
    pub version: String,
    /// development, staging, production
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Graceful shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Worker event loops; 0 means one per CPU
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Apply pending migrations at startup
    #[serde(default = "default_migrate")]
    pub migrate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    /// Roles allowed to read the breaker dashboard
    #[serde(default = "default_ops_roles")]
    pub roles: Vec<String>,
}

fn default_app_name() -> String {
    "admissions-gateway".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_migrate() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_ops_roles() -> Vec<String> {
    vec!["admin".to_string()]
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
            environment: default_environment(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: 0,
            tls: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
            migrate: default_migrate(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            roles: default_ops_roles(),
        }
    }
}

impl ServerConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

impl Validate for AppMetadata {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(invalid("app.name cannot be empty"));
        }
        if self.environment.is_empty() {
            return Err(invalid("app.environment cannot be empty"));
        }
        if self.shutdown_timeout == 0 {
            return Err(invalid("app.shutdown_timeout must be > 0"));
        }
        Ok(())
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(invalid("server.host cannot be empty"));
        }
        if let Some(tls) = &self.tls {
            if tls.cert_file.as_os_str().is_empty() || tls.key_file.as_os_str().is_empty() {
                return Err(invalid("server.tls requires both cert_file and key_file"));
            }
        }
        Ok(())
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(invalid("database.url cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(invalid("database.max_connections must be > 0"));
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.is_empty() {
            return Err(invalid("observability.log_level cannot be empty"));
        }
        Ok(())
    }
}

impl Validate for OpsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.roles.is_empty() {
            return Err(invalid("ops.roles cannot be empty"));
        }
        Ok(())
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.app.validate()?;
        self.server.validate()?;
        self.database.validate()?;
        self.observability.validate()?;
        self.auth.validate()?;
        self.security.validate()?;
        self.resilience.validate()?;
        self.proxy.validate()?;
        self.ops.validate()?;

        for route in &self.proxy.routes {
            if !self.security.rate_limit.tiers.contains_key(&route.rate_limit_tier) {
                return Err(invalid(format!(
                    "proxy.routes[{}].rate_limit_tier '{}' is not defined in security.rate_limit.tiers",
                    route.prefix, route.rate_limit_tier
                )));
            }
        }

        Ok(())
    }
}

/// Load configuration from files and environment variables
///
/// Precedence (highest to lowest):
/// 1. Environment variables: GATEWAY__SERVER__PORT=8080
/// 2. config/local.toml (git-ignored, developer overrides)
/// 3. config/{APP_ENV}.toml (development/staging/production)
/// 4. config/default.toml (base defaults)
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};

    let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    let config = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", env)).required(false))
        .add_source(File::with_name("config/local").required(false))
        .add_source(
            Environment::with_prefix("GATEWAY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate()?;

    Ok(app_config)
}
