//! Request correlation
//!
//! Reuses a well-formed inbound `x-request-id` or generates a UUID v4,
//! stores it in the request extensions, runs the rest of the pipeline inside
//! a `request` span and echoes the id on the response.

use std::future::{Ready, ready};

use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage};
use futures_util::future::LocalBoxFuture;
use tracing::Instrument;
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id of the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_request(req: &ServiceRequest) -> Self {
        let inbound = req
            .headers()
            .get(&X_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| {
                !value.is_empty()
                    && value.len() <= MAX_REQUEST_ID_LEN
                    && value.bytes().all(|b| b.is_ascii_graphic())
            });

        match inbound {
            Some(value) => RequestId(value.to_string()),
            None => RequestId(Uuid::new_v4().to_string()),
        }
    }
}

pub struct RequestIdMiddleware;

impl<S, B> Transform<S, ServiceRequest> for RequestIdMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestIdMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestIdMiddlewareService { service }))
    }
}

pub struct RequestIdMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestIdMiddlewareService<S>
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
        let request_id = RequestId::from_request(&req);
        let span = tracing::info_span!(
            "request",
            request_id = %request_id.as_str(),
            method = %req.method(),
            path = %req.path(),
        );
        req.extensions_mut().insert(request_id.clone());

        let fut = {
            let _entered = span.enter();
            self.service.call(req)
        };

        Box::pin(
            async move {
                let mut res = fut.await?;

                if res.status().is_server_error() {
                    if let Some(err) = res.response().error() {
                        tracing::error!(
                            request_id = %request_id.as_str(),
                            status = res.status().as_u16(),
                            error = ?err,
                            "Request failed"
                        );
                    }
                }

                if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
                    res.headers_mut().insert(X_REQUEST_ID, value);
                }
                Ok(res)
            }
            .instrument(span),
        )
    }
}
