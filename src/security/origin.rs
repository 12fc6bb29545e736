//! Origin allow-list
//!
//! Built on `actix-cors` with origin blocking turned off: a request from an
//! unlisted origin still reaches the handler, it just gets no
//! `Access-Control-Allow-*` headers and the browser enforces the block.

use std::collections::HashSet;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::http::Method;
use actix_web::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::config::CorsConfig;
use crate::middlewares::X_REQUEST_ID;
use crate::security::rate_limit::{RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET};

pub const X_CSRF_TOKEN: HeaderName = HeaderName::from_static("x-csrf-token");

/// Response headers a browser script may read
const EXPOSED_HEADERS: [HeaderName; 5] = [
    X_REQUEST_ID,
    RATELIMIT_LIMIT,
    RATELIMIT_REMAINING,
    RATELIMIT_RESET,
    header::RETRY_AFTER,
];

/// Normalized origin allow-list, empty when CORS is disabled
#[derive(Debug, Clone, Default)]
pub struct AllowedOrigins(Arc<HashSet<String>>);

impl AllowedOrigins {
    pub fn new(config: &CorsConfig) -> Self {
        if !config.enabled {
            return Self::default();
        }

        Self(Arc::new(
            config
                .origins
                .iter()
                .map(|origin| origin.trim_end_matches('/').to_ascii_lowercase())
                .collect(),
        ))
    }

    pub fn allows(&self, origin: &HeaderValue) -> bool {
        origin
            .to_str()
            .map(|value| self.0.contains(&value.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// Add the actual-request CORS headers for `origin` to a response that
    /// never reached the CORS middleware, such as a rate-limit rejection
    pub fn decorate(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        let Some(origin) = origin.filter(|origin| self.allows(origin)) else {
            return;
        };

        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        let exposed = EXPOSED_HEADERS
            .iter()
            .map(HeaderName::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&exposed) {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, value);
        }
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
}

/// Build the CORS middleware for `config`
///
/// With CORS disabled no origin is allowed, so no cross-origin headers are
/// ever emitted.
pub fn cors(config: &CorsConfig) -> Cors {
    let base = Cors::default().block_on_origin_mismatch(false);
    if !config.enabled {
        return base;
    }

    let origins = AllowedOrigins::new(config);

    base.allowed_origin_fn(move |origin, head| {
        let allowed = origins.allows(origin);
        if !allowed {
            tracing::warn!(
                origin = ?origin,
                path = %head.uri.path(),
                "Origin not in allow-list, omitting CORS headers"
            );
        }
        allowed
    })
    .allowed_methods([
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::OPTIONS,
    ])
    .allowed_headers([
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        X_CSRF_TOKEN,
        X_REQUEST_ID,
    ])
    .expose_headers(EXPOSED_HEADERS)
    .supports_credentials()
    .max_age(config.max_age)
}
