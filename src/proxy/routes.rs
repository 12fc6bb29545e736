//! Static route table, built once at startup
//!
//! Prefixes match on segment boundaries and the longest prefix wins, so
//! `/api/users/admin` beats `/api/users` and neither matches `/api/usersx`.

use actix_web::http::Uri;

use crate::config::security::DEFAULT_TIER;
use crate::config::{ConfigError, RouteConfig, Validate};

#[derive(Debug, Clone)]
pub struct Route {
    config: RouteConfig,
    prefix: String,
    upstream: Uri,
}

impl Route {
    fn new(config: &RouteConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let upstream = config.upstream.parse::<Uri>().map_err(|_| {
            ConfigError::ValidationError(format!("invalid upstream '{}'", config.upstream))
        })?;

        Ok(Self {
            prefix: config.prefix.trim_end_matches('/').to_string(),
            config: config.clone(),
            upstream,
        })
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    pub fn upstream(&self) -> &Uri {
        &self.upstream
    }

    /// Host the upstream lives on, used to pick the transport
    pub fn upstream_host(&self) -> &str {
        self.upstream.host().unwrap_or_default()
    }

    pub fn is_secure(&self) -> bool {
        self.upstream.scheme_str() == Some("https")
    }

    fn suffix<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    /// Upstream base URL joined with the unmatched part of the path
    pub fn target_url(&self, suffix: &str, query: &str) -> String {
        let base = self.config.upstream.trim_end_matches('/');
        let mut url = String::with_capacity(base.len() + suffix.len() + query.len() + 1);
        url.push_str(base);
        url.push_str(suffix);
        if url.len() == base.len() && self.upstream.path() == "/" {
            url.push('/');
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

/// A resolved route plus the part of the path that follows its prefix
#[derive(Debug, Clone, Copy)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub suffix: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: &[RouteConfig]) -> Result<Self, ConfigError> {
        let mut routes = routes.iter().map(Route::new).collect::<Result<Vec<_>, _>>()?;
        // Longest prefix first; stable so equal lengths keep config order
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { routes })
    }

    pub fn resolve<'a>(&'a self, path: &'a str) -> Option<RouteMatch<'a>> {
        self.routes.iter().find_map(|route| {
            route.suffix(path).map(|suffix| RouteMatch { route, suffix })
        })
    }

    /// Rate-limit tier for `path`; unrouted paths use the default tier
    pub fn tier_for(&self, path: &str) -> &str {
        self.routes
            .iter()
            .find(|route| route.suffix(path).is_some())
            .map(|route| route.config.rate_limit_tier.as_str())
            .unwrap_or(DEFAULT_TIER)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
