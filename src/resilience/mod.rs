//! Failure isolation for downstream calls
//!
//! - **Circuit Breaker**: rolling-window breaker that fails fast while a
//!   dependency is unhealthy and probes it with a single trial call.
//! - **Registry**: the `simple`, `medium` and `write` breaker classes of a
//!   process, sharing one event channel.
//! - **Retry**: bounded backoff for best-effort side effects.
//!
//! # Example
//!
//! ```rust
//! use admissions_gateway::config::ResilienceConfig;
//! use admissions_gateway::resilience::BreakerRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = BreakerRegistry::new("students", &ResilienceConfig::default());
//!
//! let count = registry
//!     .simple()
//!     .call(async { Ok::<_, std::io::Error>(42) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;
mod registry;
mod retry;
mod window;

pub use circuit_breaker::{
    BreakerError, BreakerEvent, BreakerEventKind, BreakerStats, CircuitBreaker,
    CircuitBreakerConfig, CircuitState,
};
pub use registry::{BreakerClass, BreakerRegistry};
pub use retry::retry;
pub use window::{Bucket, Outcome, WindowSnapshot};
