use actix_web::http::header::AUTHORIZATION;
use actix_web::web::{Data, Payload};
use actix_web::{HttpMessage, HttpRequest, HttpResponse};

use super::{Forwarder, RouteTable};
use crate::errors::GatewayError;
use crate::middlewares::{SessionGuard, require_role};

/// Default service: resolve the route, run the guard for protected routes,
/// then forward
///
/// Guard and routing failures return before any upstream I/O.
pub async fn proxy(
    req: HttpRequest,
    payload: Payload,
    routes: Data<RouteTable>,
    forwarder: Data<Forwarder>,
    guard: Data<SessionGuard>,
) -> Result<HttpResponse, GatewayError> {
    let Some(matched) = routes.resolve(req.path()) else {
        tracing::debug!(path = %req.path(), "No route matched");
        return Err(GatewayError::RouteNotFound {
            path: req.path().to_string(),
        });
    };
    let route = matched.route;

    let principal = if route.config().auth_required {
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let principal = guard.authenticate(header).await.inspect_err(|err| {
            metrics::counter!("auth_failures_total", "code" => err.code()).increment(1);
        })?;
        req.extensions_mut().insert(principal.clone());
        Some(principal)
    } else {
        None
    };

    if let Some(roles) = &route.config().roles {
        require_role(principal.as_ref(), roles)?;
    }

    let target = route.target_url(matched.suffix, req.query_string());
    tracing::debug!(
        route = %route.config().prefix,
        user_id = principal.as_ref().map(|p| p.user_id),
        "Route matched"
    );

    forwarder
        .forward(&req, payload, route, &target, principal.as_ref())
        .await
}
