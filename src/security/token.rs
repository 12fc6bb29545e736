//! Bearer token signing and verification
//!
//! Tokens are HS256 JWTs. Only the SHA-256 digest of a token is ever
//! persisted, so a leaked session table cannot be replayed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::errors::GatewayError;

/// Claims embedded in every token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: i64,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique per issued token, so two logins in the same second differ
    pub jti: String,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct TokenSigner {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
    validation: Arc<Validation>,
    ttl_secs: i64,
}

impl TokenSigner {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway;

        Self {
            encoding: Arc::new(EncodingKey::from_secret(config.jwt_secret.as_bytes())),
            decoding: Arc::new(DecodingKey::from_secret(config.jwt_secret.as_bytes())),
            validation: Arc::new(validation),
            ttl_secs: i64::try_from(config.token_expiration).unwrap_or(i64::MAX),
        }
    }

    /// Sign a fresh token for `user_id`
    pub fn issue(
        &self,
        user_id: i64,
        email: &str,
        role: &str,
    ) -> Result<(String, Claims), jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            role: role.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
            jti: Uuid::new_v4().to_string(),
        };
        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    /// Check signature and expiry
    pub fn verify(&self, token: &str) -> Result<Claims, GatewayError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => GatewayError::AuthExpired,
                _ => {
                    tracing::debug!(error = %err, "Token rejected");
                    GatewayError::AuthInvalid
                }
            })
    }
}

/// One-way digest used as the session key
pub fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
