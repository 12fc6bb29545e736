//! Fixed-size rolling window of call outcomes.
//!
//! The window is split into `buckets` equal slices of time. Slots are
//! addressed by absolute tick (`elapsed / bucket_duration`), so a slot whose
//! stored tick is older than the window is treated as empty and recycled on
//! the next write. Nothing runs in the background.

use serde::Serialize;
use tokio::time::{Duration, Instant};

/// Result of a single guarded call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
}

/// Counters for one time slice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
}

impl Bucket {
    pub fn total(&self) -> u64 {
        self.successes + self.failures + self.timeouts
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Failure => self.failures += 1,
            Outcome::Timeout => self.timeouts += 1,
        }
    }
}

/// Point-in-time copy of the window, oldest bucket first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSnapshot {
    pub buckets: Vec<Bucket>,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub total: u64,
    pub error_percentage: f64,
}

#[derive(Debug)]
pub struct RollingWindow {
    slots: Vec<Bucket>,
    ticks: Vec<u64>,
    bucket_duration: Duration,
    origin: Instant,
}

impl RollingWindow {
    pub fn new(buckets: u32, duration: Duration) -> Self {
        let count = buckets.max(1) as usize;
        let bucket_duration = (duration / count as u32).max(Duration::from_millis(1));
        Self {
            slots: vec![Bucket::default(); count],
            ticks: vec![0; count],
            bucket_duration,
            origin: Instant::now(),
        }
    }

    fn tick_at(&self, now: Instant) -> u64 {
        (now.saturating_duration_since(self.origin).as_nanos()
            / self.bucket_duration.as_nanos()) as u64
    }

    fn is_live(&self, slot_tick: u64, current: u64) -> bool {
        slot_tick <= current && current - slot_tick < self.slots.len() as u64
    }

    pub fn record(&mut self, now: Instant, outcome: Outcome) {
        let tick = self.tick_at(now);
        let index = (tick % self.slots.len() as u64) as usize;
        if self.ticks[index] != tick {
            self.ticks[index] = tick;
            self.slots[index] = Bucket::default();
        }
        self.slots[index].record(outcome);
    }

    /// Sum of all live buckets
    pub fn totals(&self, now: Instant) -> Bucket {
        let current = self.tick_at(now);
        self.slots
            .iter()
            .zip(&self.ticks)
            .filter(|(_, tick)| self.is_live(**tick, current))
            .fold(Bucket::default(), |mut acc, (bucket, _)| {
                acc.successes += bucket.successes;
                acc.failures += bucket.failures;
                acc.timeouts += bucket.timeouts;
                acc
            })
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|bucket| *bucket = Bucket::default());
        self.ticks.iter_mut().for_each(|tick| *tick = 0);
        self.origin = Instant::now();
    }

    pub fn snapshot(&self, now: Instant) -> WindowSnapshot {
        let current = self.tick_at(now);
        let len = self.slots.len() as u64;
        let buckets: Vec<Bucket> = (0..len)
            .rev()
            .map(|age| {
                let Some(tick) = current.checked_sub(age) else {
                    return Bucket::default();
                };
                let index = (tick % len) as usize;
                if self.ticks[index] == tick {
                    self.slots[index]
                } else {
                    Bucket::default()
                }
            })
            .collect();

        let totals = self.totals(now);
        WindowSnapshot {
            buckets,
            successes: totals.successes,
            failures: totals.failures,
            timeouts: totals.timeouts,
            total: totals.total(),
            error_percentage: error_percentage(&totals),
        }
    }
}

pub fn error_percentage(totals: &Bucket) -> f64 {
    let total = totals.total();
    if total == 0 {
        return 0.0;
    }
    (totals.failures + totals.timeouts) as f64 * 100.0 / total as f64
}
