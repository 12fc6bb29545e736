use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::web::{self, Data, ServiceConfig};
use actix_web::{App, Error};

use crate::controllers;
use crate::metrics::MetricsMiddleware;
use crate::middlewares::RequestIdMiddleware;
use crate::proxy::{self, Forwarder};
use crate::security::{AllowedOrigins, RateLimitMiddleware, cors};
use crate::state::AppState;

pub fn route(app: &mut ServiceConfig) {
    // Operations
    app.service(controllers::health::health);
    app.service(controllers::health::ready);
    app.service(controllers::metrics::metrics);

    // Gateway
    app.service(controllers::gateway::status);
    app.service(controllers::gateway::breakers);
    app.service(controllers::gateway::logout);

    // Everything else goes through the route table
    app.default_service(web::to(proxy::proxy));
}

/// Build one worker's application
///
/// Middleware runs request-id, metrics, rate gate, origin gate, then the
/// handler; the last `wrap` is the outermost. The rate gate sits outside
/// CORS so preflights are counted too.
pub fn app(
    state: AppState,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    let forwarder = Forwarder::new(&state.config.proxy, &state.tls);

    App::new()
        .app_data(Data::from(state.config.clone()))
        .app_data(Data::from(state.routes.clone()))
        .app_data(Data::new(state.pool.clone()))
        .app_data(Data::new(state.guard.clone()))
        .app_data(Data::new(state.metrics.clone()))
        .app_data(Data::new(forwarder))
        .configure(route)
        .wrap(cors(&state.config.security.cors))
        .wrap(RateLimitMiddleware::new(
            state.rate_limits.clone(),
            state.config.security.rate_limit.clone(),
            state.routes.clone(),
            AllowedOrigins::new(&state.config.security.cors),
        ))
        .wrap(MetricsMiddleware::new(state.metrics.clone()))
        .wrap(RequestIdMiddleware)
}
