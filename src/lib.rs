#![deny(warnings)]

pub mod config;
pub mod controllers;
pub mod database;
pub mod entities;
pub mod errors;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod responses;
pub mod router;
pub mod security;
pub mod server;
pub mod state;

// Testing utilities (always available for integration tests)
pub mod testing;

// Re-export commonly used types for convenience
pub use database::DatabasePool;
pub use errors::GatewayError;
pub use metrics::{AppMetrics, MetricsMiddleware};
pub use middlewares::{Principal, SessionGuard};
pub use resilience::{BreakerRegistry, CircuitBreaker};
pub use security::RateLimitMiddleware;
pub use state::AppState;
