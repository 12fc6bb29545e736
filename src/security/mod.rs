pub mod origin;
pub mod rate_limit;
pub mod token;

pub use origin::{AllowedOrigins, cors};
#[cfg(feature = "redis-store")]
pub use rate_limit::RedisRateLimitStore;
pub use rate_limit::{LocalRateLimitStore, RateLimitDecision, RateLimitMiddleware, RateLimitStore};
pub use token::{Claims, TokenSigner, digest};
