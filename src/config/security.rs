use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{ConfigError, Validate, invalid};

/// Security configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Origin allow-list
    #[serde(default)]
    pub cors: CorsConfig,
    /// Per-client admission quotas
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// CORS (Cross-Origin Resource Sharing) configuration
///
/// Credentials are always allowed, so a wildcard origin is rejected at
/// validation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_enabled")]
    pub enabled: bool,
    /// Exact origins (scheme://host[:port]) allowed to read responses
    #[serde(default = "default_cors_origins")]
    pub origins: Vec<String>,
    /// Max age in seconds for preflight requests
    #[serde(default = "default_cors_max_age")]
    pub max_age: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// In-process limiter cells, one gateway instance
    Local,
    /// Shared sliding-log window in Redis
    Redis,
}

/// A named quota: `requests` admitted per `window_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitTier {
    pub requests: u32,
    pub window_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rate_limit_backend")]
    pub backend: RateLimitBackend,
    /// Required when `backend = "redis"`
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Derive the client key from X-Forwarded-For / Forwarded instead of the peer address
    #[serde(default)]
    pub trust_forwarded: bool,
    /// Named quotas; `default` applies to unrouted and operational paths
    #[serde(default = "default_rate_limit_tiers")]
    pub tiers: HashMap<String, RateLimitTier>,
}

pub const DEFAULT_TIER: &str = "default";

fn default_cors_enabled() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_cors_max_age() -> usize {
    3600
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_rate_limit_backend() -> RateLimitBackend {
    RateLimitBackend::Local
}

fn default_rate_limit_tiers() -> HashMap<String, RateLimitTier> {
    HashMap::from([
        (
            DEFAULT_TIER.to_string(),
            RateLimitTier {
                requests: 100,
                window_secs: 60,
            },
        ),
        (
            "auth".to_string(),
            RateLimitTier {
                requests: 10,
                window_secs: 60,
            },
        ),
    ])
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_cors_enabled(),
            origins: default_cors_origins(),
            max_age: default_cors_max_age(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            backend: default_rate_limit_backend(),
            redis_url: None,
            trust_forwarded: false,
            tiers: default_rate_limit_tiers(),
        }
    }
}

impl RateLimitConfig {
    /// Resolve a tier by name, falling back to `default`
    pub fn tier(&self, name: &str) -> Option<RateLimitTier> {
        self.tiers
            .get(name)
            .or_else(|| self.tiers.get(DEFAULT_TIER))
            .copied()
    }
}

impl Validate for SecurityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.cors.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

impl Validate for CorsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.origins.is_empty() {
            return Err(invalid(
                "security.cors.origins cannot be empty when CORS is enabled",
            ));
        }
        if self.origins.iter().any(|origin| origin == "*") {
            return Err(invalid(
                "security.cors.origins cannot contain '*' because credentials are allowed",
            ));
        }
        if self.max_age == 0 {
            return Err(invalid("security.cors.max_age must be > 0"));
        }
        Ok(())
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if !self.tiers.contains_key(DEFAULT_TIER) {
            return Err(invalid(format!(
                "security.rate_limit.tiers must define a '{}' tier",
                DEFAULT_TIER
            )));
        }
        for (name, tier) in &self.tiers {
            if tier.requests == 0 {
                return Err(invalid(format!(
                    "security.rate_limit.tiers.{}.requests must be > 0",
                    name
                )));
            }
            if tier.window_secs == 0 {
                return Err(invalid(format!(
                    "security.rate_limit.tiers.{}.window_secs must be > 0",
                    name
                )));
            }
        }
        if self.backend == RateLimitBackend::Redis {
            if self.redis_url.as_deref().is_none_or(str::is_empty) {
                return Err(invalid(
                    "security.rate_limit.redis_url is required for the redis backend",
                ));
            }
            if !cfg!(feature = "redis-store") {
                return Err(invalid(
                    "security.rate_limit.backend = \"redis\" requires the redis-store feature",
                ));
            }
        }
        Ok(())
    }
}
