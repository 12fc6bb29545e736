use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Principal;
use crate::config::{AuthConfig, RetryConfig};
use crate::errors::GatewayError;
use crate::models::SessionStore;
use crate::resilience::retry;
use crate::security::token::{TokenSigner, digest};

const BEARER_PREFIX: &str = "Bearer ";

/// Token issued by [`SessionGuard::login`]
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Two-phase credential check: signature and expiry first, then liveness in
/// the session store
#[derive(Clone)]
pub struct SessionGuard {
    signer: TokenSigner,
    store: Arc<dyn SessionStore>,
    retry: RetryConfig,
}

impl SessionGuard {
    pub fn new(config: &AuthConfig, retry: RetryConfig, store: Arc<dyn SessionStore>) -> Self {
        Self {
            signer: TokenSigner::new(config),
            store,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Sign a token and make it the user's only live session
    #[tracing::instrument(skip(self, email, role))]
    pub async fn login(
        &self,
        user_id: i64,
        email: &str,
        role: &str,
    ) -> Result<IssuedSession, GatewayError> {
        let (token, claims) = self
            .signer
            .issue(user_id, email, role)
            .map_err(GatewayError::internal)?;

        self.store.replace(user_id, &digest(&token)).await?;

        tracing::info!(user_id, role, "Session issued");
        Ok(IssuedSession {
            expires_at: claims.expires_at(),
            token,
        })
    }

    /// Revoke the session behind `token`; idempotent
    pub async fn logout(&self, token: &str) -> Result<bool, GatewayError> {
        let revoked = self.store.revoke(&digest(token)).await?;
        tracing::info!(revoked, "Session revoked");
        Ok(revoked)
    }

    /// Extract the raw token from an Authorization header value
    pub fn bearer(header: Option<&str>) -> Result<&str, GatewayError> {
        header
            .and_then(|value| value.strip_prefix(BEARER_PREFIX))
            .map(str::trim)
            .ok_or(GatewayError::AuthMissing)
    }

    /// Authenticate an Authorization header value
    ///
    /// On success the session's last activity is bumped on a detached task;
    /// the caller never waits for it.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Principal, GatewayError> {
        let token = Self::bearer(header)?;
        let claims = self.signer.verify(token)?;
        let token_hash = digest(token);

        if !self.store.exists(&token_hash).await? {
            tracing::info!(user_id = claims.sub, "Token verified but session is gone");
            return Err(GatewayError::SessionInvalidated);
        }

        self.spawn_touch(token_hash);

        Ok(Principal {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        })
    }

    fn spawn_touch(&self, token_hash: String) {
        let store = self.store.clone();
        let config = self.retry.clone();

        tokio::spawn(async move {
            let result = retry(&config, || store.touch(&token_hash)).await;
            if let Err(err) = result {
                tracing::warn!(error = %err, "Failed to record session activity");
            }
        });
    }
}
