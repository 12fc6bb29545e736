use serde::{Deserialize, Deserializer, Serialize};

use super::{ConfigError, Validate, invalid};

/// Resilience configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Rolling window shared by every breaker class
    #[serde(default)]
    pub window: WindowConfig,
    /// Per operation-class breaker settings
    #[serde(default)]
    pub breakers: BreakersConfig,
    /// Retry policy for best-effort session touches
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Rolling statistics window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Number of buckets in the window
    #[serde(default = "default_window_buckets")]
    pub buckets: u32,
    /// Total window length in milliseconds
    #[serde(default = "default_window_duration_ms")]
    pub duration_ms: u64,
    /// Minimum calls in the window before the error rate is evaluated
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: u64,
}

/// Settings for one breaker class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerClassConfig {
    pub timeout_ms: u64,
    pub error_threshold_percentage: u8,
    pub reset_timeout_ms: u64,
}

/// Per-class breaker settings
///
/// A class table may set any subset of its fields; the rest keep that
/// class's own defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakersConfig {
    /// Fast keyed lookups
    #[serde(default = "default_simple_breaker", deserialize_with = "simple_breaker")]
    pub simple: BreakerClassConfig,
    /// Joins and anything without a more specific class
    #[serde(default = "default_medium_breaker", deserialize_with = "medium_breaker")]
    pub medium: BreakerClassConfig,
    /// Mutations
    #[serde(default = "default_write_breaker", deserialize_with = "write_breaker")]
    pub write: BreakerClassConfig,
}

/// Fields present in one class table
#[derive(Debug, Default, Deserialize)]
struct BreakerClassOverride {
    timeout_ms: Option<u64>,
    error_threshold_percentage: Option<u8>,
    reset_timeout_ms: Option<u64>,
}

impl BreakerClassOverride {
    fn apply(self, base: BreakerClassConfig) -> BreakerClassConfig {
        BreakerClassConfig {
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            error_threshold_percentage: self
                .error_threshold_percentage
                .unwrap_or(base.error_threshold_percentage),
            reset_timeout_ms: self.reset_timeout_ms.unwrap_or(base.reset_timeout_ms),
        }
    }
}

fn simple_breaker<'de, D: Deserializer<'de>>(d: D) -> Result<BreakerClassConfig, D::Error> {
    BreakerClassOverride::deserialize(d).map(|o| o.apply(default_simple_breaker()))
}

fn medium_breaker<'de, D: Deserializer<'de>>(d: D) -> Result<BreakerClassConfig, D::Error> {
    BreakerClassOverride::deserialize(d).map(|o| o.apply(default_medium_breaker()))
}

fn write_breaker<'de, D: Deserializer<'de>>(d: D) -> Result<BreakerClassConfig, D::Error> {
    BreakerClassOverride::deserialize(d).map(|o| o.apply(default_write_breaker()))
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,
    /// Maximum number of attempts, including the first
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff")]
    pub backoff: RetryBackoff,
    /// Initial delay in milliseconds
    #[serde(default = "default_retry_initial_delay")]
    pub initial_delay: u64,
    /// Maximum delay in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub max_delay: u64,
    /// Multiplier for exponential backoff
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
}

/// Retry backoff strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// delay *= multiplier
    Exponential,
    /// delay += initial_delay
    Linear,
    /// delay = initial_delay
    Constant,
}

fn default_window_buckets() -> u32 {
    10
}

fn default_window_duration_ms() -> u64 {
    10_000
}

fn default_volume_threshold() -> u64 {
    10
}

fn default_simple_breaker() -> BreakerClassConfig {
    BreakerClassConfig {
        timeout_ms: 2000,
        error_threshold_percentage: 60,
        reset_timeout_ms: 20_000,
    }
}

fn default_medium_breaker() -> BreakerClassConfig {
    BreakerClassConfig {
        timeout_ms: 5000,
        error_threshold_percentage: 50,
        reset_timeout_ms: 30_000,
    }
}

fn default_write_breaker() -> BreakerClassConfig {
    BreakerClassConfig {
        timeout_ms: 3000,
        error_threshold_percentage: 30,
        reset_timeout_ms: 45_000,
    }
}

fn default_retry_enabled() -> bool {
    true
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> RetryBackoff {
    RetryBackoff::Exponential
}

fn default_retry_initial_delay() -> u64 {
    100
}

fn default_retry_max_delay() -> u64 {
    2000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            buckets: default_window_buckets(),
            duration_ms: default_window_duration_ms(),
            volume_threshold: default_volume_threshold(),
        }
    }
}

impl Default for BreakersConfig {
    fn default() -> Self {
        Self {
            simple: default_simple_breaker(),
            medium: default_medium_breaker(),
            write: default_write_breaker(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            max_attempts: default_retry_max_attempts(),
            backoff: default_retry_backoff(),
            initial_delay: default_retry_initial_delay(),
            max_delay: default_retry_max_delay(),
            multiplier: default_retry_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait before attempt number `attempt` (1-based; the first retry is attempt 1)
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let initial = self.initial_delay as f64;
        let millis = match self.backoff {
            RetryBackoff::Constant => initial,
            RetryBackoff::Linear => initial * attempt as f64,
            RetryBackoff::Exponential => {
                initial * self.multiplier.powi(attempt.saturating_sub(1) as i32)
            }
        };
        std::time::Duration::from_millis(millis.min(self.max_delay as f64) as u64)
    }

    /// Total attempts allowed, 1 when retries are disabled
    pub fn attempts(&self) -> u32 {
        if self.enabled { self.max_attempts } else { 1 }
    }
}

impl Validate for ResilienceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.window.validate()?;
        self.breakers.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

impl Validate for WindowConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.buckets == 0 {
            return Err(invalid("resilience.window.buckets must be > 0"));
        }
        if self.duration_ms == 0 {
            return Err(invalid("resilience.window.duration_ms must be > 0"));
        }
        if self.duration_ms % self.buckets as u64 != 0 {
            return Err(invalid(
                "resilience.window.duration_ms must be a multiple of resilience.window.buckets",
            ));
        }
        Ok(())
    }
}

impl BreakerClassConfig {
    fn validate_named(&self, name: &str) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(invalid(format!(
                "resilience.breakers.{}.timeout_ms must be > 0",
                name
            )));
        }
        if self.error_threshold_percentage == 0 || self.error_threshold_percentage > 100 {
            return Err(invalid(format!(
                "resilience.breakers.{}.error_threshold_percentage must be in 1..=100",
                name
            )));
        }
        if self.reset_timeout_ms == 0 {
            return Err(invalid(format!(
                "resilience.breakers.{}.reset_timeout_ms must be > 0",
                name
            )));
        }
        Ok(())
    }
}

impl Validate for BreakersConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.simple.validate_named("simple")?;
        self.medium.validate_named("medium")?;
        self.write.validate_named("write")?;
        Ok(())
    }
}

impl Validate for RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_attempts == 0 {
            return Err(invalid(
                "resilience.retry.max_attempts must be > 0 when retry is enabled",
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(invalid("resilience.retry.initial_delay must be <= max_delay"));
        }
        if self.multiplier <= 0.0 {
            return Err(invalid(
                "resilience.retry.multiplier must be > 0.0 when retry is enabled",
            ));
        }
        Ok(())
    }
}
