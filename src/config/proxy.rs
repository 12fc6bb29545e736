use actix_web::http::Uri;
use serde::{Deserialize, Serialize};

use super::{ConfigError, Validate, invalid};
use crate::config::security::DEFAULT_TIER;

/// Route table and upstream transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
}

/// A single path prefix mapped onto an upstream base URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path prefix, matched on segment boundaries (e.g. `/api/students`)
    pub prefix: String,
    /// Upstream base URL (e.g. `http://students:3002`)
    pub upstream: String,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default = "default_route_tier")]
    pub rate_limit_tier: String,
    /// Roles allowed past the guard; any authenticated role when unset
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    /// Overrides `proxy.pool.request_timeout_ms`
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Connection pooling for upstream clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Simultaneous connections per client per worker
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Internal service mesh targets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Hostnames treated as internal mesh targets
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Skip certificate verification for mesh hosts only
    #[serde(default)]
    pub relaxed_tls: bool,
}

fn default_route_tier() -> String {
    DEFAULT_TIER.to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl MeshConfig {
    pub fn is_mesh_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|candidate| candidate.eq_ignore_ascii_case(host))
    }
}

impl Validate for ProxyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        for route in &self.routes {
            route.validate()?;
        }
        for (index, route) in self.routes.iter().enumerate() {
            let normalized = route.prefix.trim_end_matches('/');
            if self.routes[..index]
                .iter()
                .any(|other| other.prefix.trim_end_matches('/') == normalized)
            {
                return Err(invalid(format!(
                    "proxy.routes: duplicate prefix '{}'",
                    route.prefix
                )));
            }
        }
        Ok(())
    }
}

impl Validate for RouteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.prefix.starts_with('/') {
            return Err(invalid(format!(
                "proxy.routes[{}].prefix must start with '/'",
                self.prefix
            )));
        }
        let uri: Uri = self.upstream.parse().map_err(|_| {
            invalid(format!(
                "proxy.routes[{}].upstream '{}' is not a valid URL",
                self.prefix, self.upstream
            ))
        })?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => {
                return Err(invalid(format!(
                    "proxy.routes[{}].upstream must use http or https",
                    self.prefix
                )));
            }
        }
        if uri.host().is_none() {
            return Err(invalid(format!(
                "proxy.routes[{}].upstream must include a host",
                self.prefix
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(invalid(format!(
                "proxy.routes[{}].timeout_ms must be > 0",
                self.prefix
            )));
        }
        if self.roles.as_ref().is_some_and(Vec::is_empty) {
            return Err(invalid(format!(
                "proxy.routes[{}].roles cannot be an empty list",
                self.prefix
            )));
        }
        if self.roles.is_some() && !self.auth_required {
            return Err(invalid(format!(
                "proxy.routes[{}].roles requires auth_required = true",
                self.prefix
            )));
        }
        Ok(())
    }
}

impl Validate for PoolConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(invalid("proxy.pool.max_connections must be > 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("proxy.pool.connect_timeout_ms must be > 0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("proxy.pool.request_timeout_ms must be > 0"));
        }
        Ok(())
    }
}
