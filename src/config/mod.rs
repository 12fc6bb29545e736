pub mod app;
pub mod auth;
pub mod proxy;
pub mod resilience;
pub mod security;

pub use app::{
    AppConfig, AppMetadata, DatabaseConfig, LogFormat, ObservabilityConfig, OpsConfig,
    ServerConfig, TlsConfig,
};
pub use auth::AuthConfig;
pub use proxy::{MeshConfig, PoolConfig, ProxyConfig, RouteConfig};
pub use resilience::{
    BreakerClassConfig, BreakersConfig, ResilienceConfig, RetryBackoff, RetryConfig,
    WindowConfig,
};
pub use security::{CorsConfig, RateLimitBackend, RateLimitConfig, RateLimitTier, SecurityConfig};

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Startup validation for a configuration section
pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

pub(crate) fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Load the application configuration from files and environment variables
pub fn load() -> Result<AppConfig, ConfigError> {
    app::load_config()
}
