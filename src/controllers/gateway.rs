//! Gateway's own endpoints: status, breaker dashboard and self-logout

use actix_web::http::header::AUTHORIZATION;
use actix_web::web::Data;
use actix_web::{HttpRequest, HttpResponse, delete, get};
use serde::Serialize;

use crate::config::AppConfig;
use crate::database::DatabasePool;
use crate::errors::GatewayError;
use crate::middlewares::{Principal, SessionGuard, require_role};
use crate::proxy::RouteTable;
use crate::responses::Envelope;

#[derive(Debug, Serialize)]
pub struct RouteSummary {
    pub prefix: String,
    pub auth_required: bool,
    pub rate_limit_tier: String,
}

#[derive(Debug, Serialize)]
pub struct GatewayStatus {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub version: String,
    pub environment: String,
    pub routes: Vec<RouteSummary>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub revoked: bool,
}

#[get("/gateway/status")]
pub async fn status(config: Data<AppConfig>, routes: Data<RouteTable>) -> HttpResponse {
    let routes = routes
        .routes()
        .map(|route| RouteSummary {
            prefix: route.config().prefix.clone(),
            auth_required: route.config().auth_required,
            rate_limit_tier: route.config().rate_limit_tier.clone(),
        })
        .collect();

    HttpResponse::Ok().json(Envelope::ok(GatewayStatus {
        kind: "reverse-proxy-gateway",
        name: config.app.name.clone(),
        version: config.app.version.clone(),
        environment: config.app.environment.clone(),
        routes,
    }))
}

/// Breaker stats for operators; restricted to `ops.roles`
#[get("/gateway/breakers")]
pub async fn breakers(
    principal: Principal,
    config: Data<AppConfig>,
    pool: Data<DatabasePool>,
) -> Result<HttpResponse, GatewayError> {
    require_role(Some(&principal), &config.ops.roles)?;
    Ok(HttpResponse::Ok().json(Envelope::ok(pool.stats())))
}

/// Revoke the caller's own session
#[delete("/gateway/session")]
pub async fn logout(
    req: HttpRequest,
    principal: Principal,
    guard: Data<SessionGuard>,
) -> Result<HttpResponse, GatewayError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let token = SessionGuard::bearer(header)?;

    let revoked = guard.logout(token).await?;
    tracing::info!(user_id = principal.user_id, revoked, "Session closed by caller");

    Ok(HttpResponse::Ok().json(Envelope::ok(LogoutResponse { revoked })))
}
