//! Circuit breaker with rolling-window failure accounting.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐
//! │ Closed  │ ◄────────────────────────┐
//! │ (Normal)│                          │
//! └────┬────┘                          │
//!      │ error % >= threshold          │ trial succeeds
//!      │ and volume >= floor           │
//!      ▼                               │
//! ┌─────────┐  reset_timeout   ┌───────┴───┐
//! │  Open   │─────────────────►│ HalfOpen  │
//! │(Failing)│                  │ (1 trial) │
//! └─────────┘◄─────────────────└───────────┘
//!              trial fails or times out
//! ```
//!
//! Every completed call (success, failure or timeout) lands in the current
//! bucket of the rolling window. The error rate is evaluated over the whole
//! window after each completion while the breaker is closed.
//!
//! Timeouts drop the wrapped future. Work that must finish regardless of the
//! caller has to be spawned by the caller.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

use super::window::{Outcome, RollingWindow, WindowSnapshot, error_percentage};
use crate::config::{BreakerClassConfig, WindowConfig};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, allowing all requests through
    Closed,
    /// Failing state, rejecting all requests until the reset timeout expires
    Open,
    /// Probing state, one trial call allowed through
    HalfOpen,
}

impl CircuitState {
    fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Per-call deadline; exceeding it counts as a failure
    pub timeout: Duration,
    pub error_threshold_percentage: u8,
    /// Time spent open before a trial call is admitted
    pub reset_timeout: Duration,
    pub buckets: u32,
    pub window: Duration,
    /// Minimum calls in the window before the error rate is evaluated
    pub volume_threshold: u64,
}

impl CircuitBreakerConfig {
    pub fn from_class(class: &BreakerClassConfig, window: &WindowConfig) -> Self {
        Self {
            timeout: Duration::from_millis(class.timeout_ms),
            error_threshold_percentage: class.error_threshold_percentage,
            reset_timeout: Duration::from_millis(class.reset_timeout_ms),
            buckets: window.buckets,
            window: Duration::from_millis(window.duration_ms),
            volume_threshold: window.volume_threshold,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from_class(
            &crate::config::BreakersConfig::default().medium,
            &WindowConfig::default(),
        )
    }
}

/// Circuit breaker error
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Short-circuited without invoking the operation
    #[error("{name} is temporarily unavailable (circuit open)")]
    Open { name: String },
    /// The operation did not complete within the breaker's timeout
    #[error("{name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
    /// The underlying operation failed
    #[error("Operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// Map the inner operation error, keeping breaker-originated variants
    pub fn map_inner<F>(self, f: impl FnOnce(E) -> F) -> BreakerError<F> {
        match self {
            BreakerError::Open { name } => BreakerError::Open { name },
            BreakerError::Timeout { name, timeout } => BreakerError::Timeout { name, timeout },
            BreakerError::Inner(err) => BreakerError::Inner(f(err)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerEventKind {
    Open,
    HalfOpen,
    Close,
    Fallback,
    Success,
    Failure,
    Timeout,
    Reject,
}

impl BreakerEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerEventKind::Open => "open",
            BreakerEventKind::HalfOpen => "half_open",
            BreakerEventKind::Close => "close",
            BreakerEventKind::Fallback => "fallback",
            BreakerEventKind::Success => "success",
            BreakerEventKind::Failure => "failure",
            BreakerEventKind::Timeout => "timeout",
            BreakerEventKind::Reject => "reject",
        }
    }
}

/// Lifecycle or per-call event, published to every subscriber of the breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerEvent {
    pub breaker: String,
    pub kind: BreakerEventKind,
}

/// Operational view of one breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub timeout_ms: u64,
    pub error_threshold_percentage: u8,
    pub reset_timeout_ms: u64,
    /// Milliseconds left before a trial call is admitted, while open
    pub reopens_in_ms: Option<u64>,
    pub window: WindowSnapshot,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: RollingWindow,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

enum Admission {
    Normal,
    Trial,
}

/// Releases the half-open trial slot if the trial is dropped before completing
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl TrialPermit<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
            tracing::debug!(
                circuit_breaker = %self.breaker.name,
                "Half-open trial cancelled, slot released"
            );
        }
    }
}

/// Rolling-window circuit breaker
///
/// Cheap to clone; clones share state. The state mutex is only held for
/// admission and bookkeeping, never across the wrapped operation.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    events: broadcast::Sender<BreakerEvent>,
}

impl CircuitBreaker {
    /// Create a breaker with its own event channel
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self::with_events(name, config, events)
    }

    /// Create a breaker that publishes to a shared event channel
    pub fn with_events(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        events: broadcast::Sender<BreakerEvent>,
    ) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        metrics::gauge!("circuit_breaker_state", "breaker" => name.to_string())
            .set(CircuitState::Closed.as_gauge());
        Self {
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: RollingWindow::new(config.buckets, config.window),
                opened_at: None,
                trial_in_flight: false,
            })),
            name,
            config,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state, applying a pending Open -> HalfOpen transition
    pub fn state(&self) -> CircuitState {
        let (state, transitioned) = {
            let mut inner = self.lock();
            let transitioned = self.maybe_half_open(&mut inner, Instant::now());
            (inner.state, transitioned)
        };
        if transitioned {
            self.emit(BreakerEventKind::HalfOpen);
        }
        state
    }

    /// Snapshot for the operations surface; applies a pending Open -> HalfOpen
    /// transition so it always agrees with [`state`](Self::state)
    pub fn stats(&self) -> BreakerStats {
        let now = Instant::now();
        let mut inner = self.lock();
        let transitioned = self.maybe_half_open(&mut inner, now);
        let reopens_in_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.config
                    .reset_timeout
                    .saturating_sub(now.saturating_duration_since(opened_at))
                    .as_millis() as u64,
            ),
            _ => None,
        };
        let stats = BreakerStats {
            name: self.name.to_string(),
            state: inner.state,
            timeout_ms: self.config.timeout.as_millis() as u64,
            error_threshold_percentage: self.config.error_threshold_percentage,
            reset_timeout_ms: self.config.reset_timeout.as_millis() as u64,
            reopens_in_ms,
            window: inner.window.snapshot(now),
        };
        drop(inner);

        if transitioned {
            self.emit(BreakerEventKind::HalfOpen);
        }
        stats
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner, now: Instant) -> bool {
        if inner.state != CircuitState::Open {
            return false;
        }
        let elapsed = inner
            .opened_at
            .map(|opened_at| now.saturating_duration_since(opened_at))
            .unwrap_or(self.config.reset_timeout);
        if elapsed < self.config.reset_timeout {
            return false;
        }
        inner.state = CircuitState::HalfOpen;
        inner.trial_in_flight = false;
        true
    }

    fn admit(&self) -> Result<Admission, BreakerEventKind> {
        let now = Instant::now();
        let (admission, transitioned) = {
            let mut inner = self.lock();
            let transitioned = self.maybe_half_open(&mut inner, now);
            let admission = match inner.state {
                CircuitState::Closed => Ok(Admission::Normal),
                CircuitState::Open => Err(BreakerEventKind::Reject),
                CircuitState::HalfOpen if inner.trial_in_flight => Err(BreakerEventKind::Reject),
                CircuitState::HalfOpen => {
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            };
            (admission, transitioned)
        };
        if transitioned {
            self.emit(BreakerEventKind::HalfOpen);
        }
        admission
    }

    fn record(&self, outcome: Outcome, trial: bool) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.lock();
            inner.window.record(now, outcome);

            if trial {
                inner.trial_in_flight = false;
                if outcome == Outcome::Success {
                    inner.state = CircuitState::Closed;
                    inner.opened_at = None;
                    inner.window.reset();
                    Some(BreakerEventKind::Close)
                } else {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    Some(BreakerEventKind::Open)
                }
            } else if inner.state == CircuitState::Closed {
                let totals = inner.window.totals(now);
                let rate = error_percentage(&totals);
                if totals.total() >= self.config.volume_threshold
                    && rate >= f64::from(self.config.error_threshold_percentage)
                {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    tracing::warn!(
                        circuit_breaker = %self.name,
                        error_percentage = rate,
                        total = totals.total(),
                        threshold = self.config.error_threshold_percentage,
                        "Error rate over threshold"
                    );
                    Some(BreakerEventKind::Open)
                } else {
                    None
                }
            } else {
                // Admitted while closed, completed after the breaker opened
                None
            }
        };

        self.emit(match outcome {
            Outcome::Success => BreakerEventKind::Success,
            Outcome::Failure => BreakerEventKind::Failure,
            Outcome::Timeout => BreakerEventKind::Timeout,
        });
        if let Some(kind) = transition {
            self.emit(kind);
        }
    }

    fn emit(&self, kind: BreakerEventKind) {
        match kind {
            BreakerEventKind::Open => {
                tracing::warn!(circuit_breaker = %self.name, state = "OPEN", "Circuit breaker opened");
            }
            BreakerEventKind::HalfOpen => {
                tracing::info!(circuit_breaker = %self.name, state = "HALF_OPEN", "Circuit breaker admitting a trial call");
            }
            BreakerEventKind::Close => {
                tracing::info!(circuit_breaker = %self.name, state = "CLOSED", "Circuit breaker closed after successful trial");
            }
            BreakerEventKind::Fallback => {
                tracing::info!(circuit_breaker = %self.name, "Fallback triggered");
            }
            BreakerEventKind::Timeout => {
                tracing::warn!(circuit_breaker = %self.name, timeout_ms = self.config.timeout.as_millis() as u64, "Call timed out");
            }
            BreakerEventKind::Failure => {
                tracing::debug!(circuit_breaker = %self.name, "Call failed");
            }
            BreakerEventKind::Reject => {
                tracing::debug!(circuit_breaker = %self.name, "Call short-circuited");
            }
            BreakerEventKind::Success => {
                tracing::trace!(circuit_breaker = %self.name, "Call succeeded");
            }
        }

        metrics::counter!(
            "circuit_breaker_events_total",
            "breaker" => self.name.to_string(),
            "event" => kind.as_str()
        )
        .increment(1);

        if matches!(
            kind,
            BreakerEventKind::Open | BreakerEventKind::HalfOpen | BreakerEventKind::Close
        ) {
            let state = match kind {
                BreakerEventKind::Open => CircuitState::Open,
                BreakerEventKind::HalfOpen => CircuitState::HalfOpen,
                _ => CircuitState::Closed,
            };
            metrics::gauge!("circuit_breaker_state", "breaker" => self.name.to_string())
                .set(state.as_gauge());
        }

        // No subscribers is fine
        let _ = self.events.send(BreakerEvent {
            breaker: self.name.to_string(),
            kind,
        });
    }

    /// Execute an operation protected by the circuit breaker
    ///
    /// While open the operation is never polled. While half-open exactly one
    /// caller runs the trial and everybody else is short-circuited.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let trial = match self.admit() {
            Ok(Admission::Normal) => false,
            Ok(Admission::Trial) => true,
            Err(kind) => {
                self.emit(kind);
                return Err(BreakerError::Open {
                    name: self.name.to_string(),
                });
            }
        };

        let mut permit = TrialPermit {
            breaker: self,
            armed: trial,
        };

        let result = tokio::time::timeout(self.config.timeout, operation).await;
        permit.disarm();

        match result {
            Ok(Ok(value)) => {
                self.record(Outcome::Success, trial);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record(Outcome::Failure, trial);
                Err(BreakerError::Inner(err))
            }
            Err(_) => {
                self.record(Outcome::Timeout, trial);
                Err(BreakerError::Timeout {
                    name: self.name.to_string(),
                    timeout: self.config.timeout,
                })
            }
        }
    }

    /// Like [`call`](Self::call), resolving any breaker or operation error through `fallback`
    pub async fn call_or_else<F, T, E, Fb>(&self, operation: F, fallback: Fb) -> T
    where
        F: Future<Output = Result<T, E>>,
        Fb: FnOnce(BreakerError<E>) -> T,
    {
        match self.call(operation).await {
            Ok(value) => value,
            Err(err) => {
                self.emit(BreakerEventKind::Fallback);
                fallback(err)
            }
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("trial_in_flight", &inner.trial_in_flight)
            .field("config", &self.config)
            .finish()
    }
}
