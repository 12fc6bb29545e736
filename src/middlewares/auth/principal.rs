use std::future::Future;
use std::pin::Pin;

use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use serde::{Deserialize, Serialize};

use super::SessionGuard;
use crate::errors::GatewayError;

/// Authenticated caller attached to the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub email: String,
    pub role: String,
}

impl Principal {
    pub fn has_role<S: AsRef<str>>(&self, allowed: &[S]) -> bool {
        allowed.iter().any(|role| role.as_ref() == self.role)
    }
}

/// Post-check on an already authenticated request
pub fn require_role<S: AsRef<str>>(
    principal: Option<&Principal>,
    allowed: &[S],
) -> Result<(), GatewayError> {
    let principal = principal.ok_or(GatewayError::Unauthenticated)?;
    if principal.has_role(allowed) {
        Ok(())
    } else {
        tracing::info!(
            user_id = principal.user_id,
            role = %principal.role,
            "Role not allowed"
        );
        Err(GatewayError::Forbidden)
    }
}

/// Reuses a principal attached earlier in the pipeline, otherwise runs the
/// session guard against the Authorization header.
impl FromRequest for Principal {
    type Error = GatewayError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        if let Some(principal) = req.extensions().get::<Principal>().cloned() {
            return Box::pin(async move { Ok(principal) });
        }

        let Some(guard) = req.app_data::<Data<SessionGuard>>().cloned() else {
            return Box::pin(async move {
                Err(GatewayError::internal(anyhow::anyhow!(
                    "SessionGuard is not registered as app data"
                )))
            });
        };

        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let req = req.clone();

        Box::pin(async move {
            let principal = guard.authenticate(header.as_deref()).await?;
            req.extensions_mut().insert(principal.clone());
            Ok(principal)
        })
    }
}
