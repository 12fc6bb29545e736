//! # Rate Limiting
//!
//! Per-client admission against named quota tiers. The tier comes from the
//! matched route (`default` for everything else) and the client key from the
//! peer address, or from `Forwarded` / `X-Forwarded-For` when
//! `trust_forwarded` is set.
//!
//! Every checked response carries `RateLimit-Limit`, `RateLimit-Remaining`
//! and `RateLimit-Reset`; a rejected one also carries `Retry-After`.
//! When the backing store fails the request is admitted and a warning is
//! logged.

use std::future::{Ready, ready};
use std::num::NonZeroU32;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use actix_web::{Error, ResponseError};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::LocalBoxFuture;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};

use crate::config::{RateLimitConfig, RateLimitTier};
use crate::errors::GatewayError;
use crate::proxy::RouteTable;
use crate::security::origin::AllowedOrigins;

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the quota is fully available again (or, when rejected,
    /// until the next request would be admitted)
    pub reset_secs: u64,
}

impl RateLimitDecision {
    fn write_headers(&self, headers: &mut HeaderMap) {
        headers.insert(RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(RATELIMIT_RESET, HeaderValue::from(self.reset_secs));
    }
}

/// Counter backend shared by the middleware
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn check(
        &self,
        tier_name: &str,
        tier: RateLimitTier,
        client: &str,
    ) -> anyhow::Result<RateLimitDecision>;
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, StateInformationMiddleware>;

struct LimiterEntry {
    limiter: DirectLimiter,
    last_seen: AtomicU64,
}

/// In-process GCRA limiters, one per (tier, client)
///
/// The burst equals the tier's request count and capacity replenishes evenly
/// across the window, which approximates a sliding window without keeping a
/// log of timestamps.
#[derive(Clone)]
pub struct LocalRateLimitStore {
    limiters: Arc<DashMap<(String, String), Arc<LimiterEntry>>>,
    origin: Instant,
}

impl Default for LocalRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRateLimitStore {
    pub fn new() -> Self {
        Self {
            limiters: Arc::new(DashMap::new()),
            origin: Instant::now(),
        }
    }

    fn quota(tier: RateLimitTier) -> Quota {
        let burst = NonZeroU32::new(tier.requests).unwrap_or(NonZeroU32::MIN);
        let window = Duration::from_secs(tier.window_secs.max(1));
        Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst)
    }

    fn now_secs(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }

    pub fn check_sync(&self, tier_name: &str, tier: RateLimitTier, client: &str) -> RateLimitDecision {
        let entry = self
            .limiters
            .entry((tier_name.to_string(), client.to_string()))
            .or_insert_with(|| {
                Arc::new(LimiterEntry {
                    limiter: RateLimiter::direct(Self::quota(tier))
                        .with_middleware::<StateInformationMiddleware>(),
                    last_seen: AtomicU64::new(0),
                })
            })
            .clone();
        entry.last_seen.store(self.now_secs(), Ordering::Relaxed);

        let period = Duration::from_secs(tier.window_secs.max(1)) / tier.requests.max(1);
        match entry.limiter.check() {
            Ok(snapshot) => {
                let remaining = snapshot.remaining_burst_capacity();
                let used = tier.requests.saturating_sub(remaining);
                RateLimitDecision {
                    allowed: true,
                    limit: tier.requests,
                    remaining,
                    reset_secs: ceil_secs(period * used),
                }
            }
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                RateLimitDecision {
                    allowed: false,
                    limit: tier.requests,
                    remaining: 0,
                    reset_secs: ceil_secs(wait).max(1),
                }
            }
        }
    }

    /// Drop limiters untouched for `idle`; their state is fully replenished by then
    pub fn sweep(&self, idle: Duration) -> usize {
        let now = self.now_secs();
        let before = self.limiters.len();
        self.limiters
            .retain(|_, entry| now.saturating_sub(entry.last_seen.load(Ordering::Relaxed)) < idle.as_secs());
        before - self.limiters.len()
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}

#[async_trait]
impl RateLimitStore for LocalRateLimitStore {
    async fn check(
        &self,
        tier_name: &str,
        tier: RateLimitTier,
        client: &str,
    ) -> anyhow::Result<RateLimitDecision> {
        Ok(self.check_sync(tier_name, tier, client))
    }
}

#[cfg(feature = "redis-store")]
pub use redis_store::RedisRateLimitStore;

#[cfg(feature = "redis-store")]
mod redis_store {
    use anyhow::Context;
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;

    use super::{RateLimitDecision, RateLimitStore, ceil_secs};
    use crate::config::RateLimitTier;

    /// Sliding-log window shared by every gateway instance
    ///
    /// Trim, count, admit and expire run as one Lua script, so admission is
    /// atomic across instances.
    #[derive(Clone)]
    pub struct RedisRateLimitStore {
        connection: ConnectionManager,
        script: redis::Script,
    }

    const SLIDING_WINDOW: &str = r"
        local key = KEYS[1]
        local now = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])
        local limit = tonumber(ARGV[3])
        redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
        local count = redis.call('ZCARD', key)
        local allowed = 0
        if count < limit then
            redis.call('ZADD', key, now, ARGV[4])
            count = count + 1
            allowed = 1
        end
        redis.call('PEXPIRE', key, window)
        local reset = window
        local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
        if oldest[2] then
            reset = tonumber(oldest[2]) + window - now
        end
        return {allowed, count, reset}
    ";

    impl RedisRateLimitStore {
        pub async fn connect(url: &str) -> anyhow::Result<Self> {
            let client = redis::Client::open(url).context("invalid redis url")?;
            let connection = ConnectionManager::new(client)
                .await
                .context("failed to connect to redis")?;
            Ok(Self {
                connection,
                script: redis::Script::new(SLIDING_WINDOW),
            })
        }
    }

    #[async_trait]
    impl RateLimitStore for RedisRateLimitStore {
        async fn check(
            &self,
            tier_name: &str,
            tier: RateLimitTier,
            client: &str,
        ) -> anyhow::Result<RateLimitDecision> {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let window_ms = tier.window_secs.saturating_mul(1000);
            let key = format!("gateway:ratelimit:{}:{}", tier_name, client);
            let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());

            let mut connection = self.connection.clone();
            let (allowed, count, reset_ms): (i64, i64, i64) = self
                .script
                .key(&key)
                .arg(now_ms)
                .arg(window_ms)
                .arg(tier.requests)
                .arg(member)
                .invoke_async(&mut connection)
                .await?;

            let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
            Ok(RateLimitDecision {
                allowed: allowed == 1,
                limit: tier.requests,
                remaining: tier.requests.saturating_sub(count),
                reset_secs: ceil_secs(std::time::Duration::from_millis(reset_ms.max(0) as u64)),
            })
        }
    }
}

/// Rate limiting middleware for actix-web
///
/// Runs outside the CORS layer so preflights are admission-controlled too.
/// Rejections short-circuit before CORS, so they get the allow-listed
/// origin's CORS headers here.
pub struct RateLimitMiddleware {
    store: Arc<dyn RateLimitStore>,
    config: Arc<RateLimitConfig>,
    routes: Arc<RouteTable>,
    origins: AllowedOrigins,
}

impl RateLimitMiddleware {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        config: RateLimitConfig,
        routes: Arc<RouteTable>,
        origins: AllowedOrigins,
    ) -> Self {
        Self {
            store,
            config: Arc::new(config),
            routes,
            origins,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            store: self.store.clone(),
            config: self.config.clone(),
            routes: self.routes.clone(),
            origins: self.origins.clone(),
        }))
    }
}

/// Rate limiting middleware service
pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    store: Arc<dyn RateLimitStore>,
    config: Arc<RateLimitConfig>,
    routes: Arc<RouteTable>,
    origins: AllowedOrigins,
}

fn client_key(req: &ServiceRequest, trust_forwarded: bool) -> String {
    if trust_forwarded {
        if let Some(addr) = req.connection_info().realip_remote_addr() {
            return addr.to_string();
        }
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        if !self.config.enabled {
            return Box::pin(async move { Ok(service.call(req).await?.map_into_left_body()) });
        }

        let tier_name = self.routes.tier_for(req.path()).to_string();
        let Some(tier) = self.config.tier(&tier_name) else {
            return Box::pin(async move { Ok(service.call(req).await?.map_into_left_body()) });
        };
        let client = client_key(&req, self.config.trust_forwarded);
        let store = self.store.clone();
        let origins = self.origins.clone();

        Box::pin(async move {
            let decision = match store.check(&tier_name, tier, &client).await {
                Ok(decision) => Some(decision),
                Err(err) => {
                    tracing::warn!(error = %err, tier = %tier_name, "Rate limit backend failed, admitting request");
                    None
                }
            };

            match decision {
                Some(decision) if !decision.allowed => {
                    tracing::warn!(
                        client = %client,
                        tier = %tier_name,
                        retry_after = decision.reset_secs,
                        "Rate limit exceeded"
                    );
                    metrics::counter!("rate_limit_rejections_total", "tier" => tier_name).increment(1);

                    let response = GatewayError::RateLimited {
                        retry_after: decision.reset_secs,
                    }
                    .error_response();
                    let origin = req.headers().get(header::ORIGIN).cloned();
                    let mut res = req.into_response(response).map_into_right_body();
                    decision.write_headers(res.headers_mut());
                    origins.decorate(origin.as_ref(), res.headers_mut());
                    Ok(res)
                }
                decision => {
                    let mut res = service.call(req).await?.map_into_left_body();
                    if let Some(decision) = decision {
                        decision.write_headers(res.headers_mut());
                    }
                    Ok(res)
                }
            }
        })
    }
}
