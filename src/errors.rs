//! HTTP-facing error taxonomy
//!
//! Every failure the gateway itself produces is one of these variants and is
//! rendered as the standard envelope with a machine-readable `code`.

use actix_web::http::StatusCode;
use actix_web::http::header::{self, HeaderValue};
use actix_web::{HttpResponse, ResponseError};

use crate::database::DatabaseError;
use crate::responses::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Missing bearer credential")]
    AuthMissing,

    #[error("Invalid token")]
    AuthInvalid,

    #[error("Token expired")]
    AuthExpired,

    #[error("Session is no longer valid, sign in again")]
    SessionInvalidated,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Insufficient role")]
    Forbidden,

    #[error("No route for {path}")]
    RouteNotFound { path: String },

    #[error("Too many requests, retry in {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("Upstream service unavailable")]
    UpstreamUnavailable {
        upstream: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Service temporarily unavailable")]
    BreakerOpen { name: String },

    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl GatewayError {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        GatewayError::Internal(err.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AuthMissing => "AUTH_MISSING",
            GatewayError::AuthInvalid => "AUTH_INVALID",
            GatewayError::AuthExpired => "AUTH_EXPIRED",
            GatewayError::SessionInvalidated => "SESSION_INVALIDATED",
            GatewayError::Unauthenticated => "UNAUTHENTICATED",
            GatewayError::Forbidden => "FORBIDDEN",
            GatewayError::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            GatewayError::RateLimited { .. } => "RATE_LIMITED",
            GatewayError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            GatewayError::BreakerOpen { .. } => "BREAKER_OPEN",
            GatewayError::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }
}

impl From<DatabaseError> for GatewayError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::CircuitOpen { name } => GatewayError::BreakerOpen { name },
            other => GatewayError::Internal(other.into()),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthMissing
            | GatewayError::AuthInvalid
            | GatewayError::AuthExpired
            | GatewayError::SessionInvalidated
            | GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::BreakerOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());

        match self {
            GatewayError::RateLimited { retry_after } => {
                builder.insert_header((header::RETRY_AFTER, retry_after.to_string()));
            }
            GatewayError::BreakerOpen { .. } => {
                builder.insert_header((header::RETRY_AFTER, HeaderValue::from_static("5")));
            }
            _ => {}
        }

        if self.is_auth_failure() {
            builder.insert_header((header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer")));
        }

        // Internal details stay in the logs
        builder.json(Envelope::<()>::error(self.code(), self.to_string()))
    }
}
