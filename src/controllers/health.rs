//! Health check endpoints
//!
//! `/health` never touches a dependency. `/ready` pings the session store
//! through the `simple` breaker, so an open breaker reports not-ready
//! without waiting on the database.

use actix_web::web::Data;
use actix_web::{HttpResponse, Responder, get};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::DatabasePool;
use crate::responses::Envelope;

/// Liveness health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Readiness health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// `connected` or `unavailable`
    pub database: String,
}

/// Liveness check endpoint
///
/// Always 200 while the process is serving requests.
#[get("/health")]
pub async fn health() -> impl Responder {
    tracing::debug!("Liveness check: healthy");
    HttpResponse::Ok().json(Envelope::ok(LivenessResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    }))
}

/// Readiness probe
#[get("/ready")]
pub async fn ready(pool: Data<DatabasePool>) -> impl Responder {
    let connection = pool.connection().clone();
    let connected = pool
        .breakers()
        .simple()
        .call_or_else(
            async move { connection.ping().await.map(|_| true) },
            |err| {
                tracing::warn!(error = %err, "Readiness check failed");
                false
            },
        )
        .await;

    let response = ReadinessResponse {
        status: if connected { "ready" } else { "not_ready" }.to_string(),
        timestamp: Utc::now(),
        database: if connected { "connected" } else { "unavailable" }.to_string(),
    };

    if connected {
        HttpResponse::Ok().json(Envelope::ok(response))
    } else {
        HttpResponse::ServiceUnavailable().json(Envelope {
            success: false,
            data: Some(response),
            error: Some("Session store unavailable".to_string()),
            code: Some("NOT_READY".to_string()),
        })
    }
}
