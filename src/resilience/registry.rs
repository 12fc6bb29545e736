use tokio::sync::broadcast;

use super::circuit_breaker::{BreakerEvent, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
use crate::config::{BreakerClassConfig, ResilienceConfig};

/// Operation class of a guarded call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerClass {
    /// Fast keyed lookup
    Simple,
    /// Joins, the default class
    Medium,
    /// Mutation
    Write,
}

impl BreakerClass {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerClass::Simple => "simple",
            BreakerClass::Medium => "medium",
            BreakerClass::Write => "write",
        }
    }
}

/// The three per-process breakers, built once at startup
///
/// All breakers publish to one event channel so a single subscriber can
/// follow every transition.
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    simple: CircuitBreaker,
    medium: CircuitBreaker,
    write: CircuitBreaker,
    events: broadcast::Sender<BreakerEvent>,
}

impl BreakerRegistry {
    /// Breakers are named `{prefix}.{class}`, e.g. `sessions.write`
    pub fn new(prefix: &str, config: &ResilienceConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        let build = |class: BreakerClass, settings: &BreakerClassConfig| {
            CircuitBreaker::with_events(
                format!("{}.{}", prefix, class.as_str()),
                CircuitBreakerConfig::from_class(settings, &config.window),
                events.clone(),
            )
        };

        Self {
            simple: build(BreakerClass::Simple, &config.breakers.simple),
            medium: build(BreakerClass::Medium, &config.breakers.medium),
            write: build(BreakerClass::Write, &config.breakers.write),
            events,
        }
    }

    pub fn get(&self, class: BreakerClass) -> &CircuitBreaker {
        match class {
            BreakerClass::Simple => &self.simple,
            BreakerClass::Medium => &self.medium,
            BreakerClass::Write => &self.write,
        }
    }

    pub fn simple(&self) -> &CircuitBreaker {
        &self.simple
    }

    pub fn medium(&self) -> &CircuitBreaker {
        &self.medium
    }

    pub fn write(&self) -> &CircuitBreaker {
        &self.write
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> Vec<BreakerStats> {
        [&self.simple, &self.medium, &self.write]
            .into_iter()
            .map(CircuitBreaker::stats)
            .collect()
    }
}
