use actix_web::{
    Error,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    web::Data,
};
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};
use std::time::Instant;

use crate::metrics::AppMetrics;
use crate::proxy::RouteTable;

/// Middleware for collecting HTTP metrics
///
/// Requests are labelled with the registered resource pattern or the matched
/// route prefix, never the raw path.
pub struct MetricsMiddleware {
    metrics: AppMetrics,
}

impl MetricsMiddleware {
    pub fn new(metrics: AppMetrics) -> Self {
        Self { metrics }
    }
}

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service,
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
    metrics: AppMetrics,
}

fn route_label(req: &ServiceRequest) -> String {
    req.match_pattern()
        .or_else(|| {
            req.app_data::<Data<RouteTable>>()
                .and_then(|routes| routes.resolve(req.path()))
                .map(|matched| matched.route.config().prefix.clone())
        })
        .unwrap_or_else(|| "unmatched".to_string())
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let method = req.method().to_string();
        let route = route_label(&req);

        self.metrics.http_request_start();

        let metrics = self.metrics.clone();
        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            metrics.http_request_end();

            let status = match &result {
                Ok(res) => res.status().as_u16(),
                Err(err) => err.as_response_error().status_code().as_u16(),
            };
            metrics.record_http_request(&method, &route, status, start.elapsed().as_secs_f64());

            result
        })
    }
}
