use serde::{Deserialize, Serialize};

use super::{ConfigError, Validate, invalid};

/// Token signing and session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to sign and verify bearer tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Token lifetime in seconds
    #[serde(default = "default_token_expiration")]
    pub token_expiration: u64,
    /// Clock skew tolerated when checking `exp`, in seconds
    #[serde(default)]
    pub leeway: u64,
    /// Sessions idle for longer than this are pruned, in seconds
    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout: u64,
    /// How often the pruning task runs, in seconds (0 disables it)
    #[serde(default = "default_prune_interval")]
    pub prune_interval: u64,
}

fn default_jwt_secret() -> String {
    "change-me-in-production-this-is-only-a-development-secret".to_string()
}

fn default_token_expiration() -> u64 {
    8 * 60 * 60
}

fn default_session_idle_timeout() -> u64 {
    24 * 60 * 60
}

fn default_prune_interval() -> u64 {
    15 * 60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_expiration: default_token_expiration(),
            leeway: 0,
            session_idle_timeout: default_session_idle_timeout(),
            prune_interval: default_prune_interval(),
        }
    }
}

impl Validate for AuthConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < 32 {
            return Err(invalid("auth.jwt_secret must be at least 32 bytes"));
        }
        if self.token_expiration == 0 {
            return Err(invalid("auth.token_expiration must be > 0"));
        }
        if self.session_idle_timeout == 0 {
            return Err(invalid("auth.session_idle_timeout must be > 0"));
        }
        Ok(())
    }
}
