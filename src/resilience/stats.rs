//! Rolling outcome counts for circuit breakers.
//!
//! The window is split into fixed-span buckets. Buckets older than the
//! window are dropped as time moves forward, so the failure ratio only
//! reflects recent calls.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    started: Instant,
    successes: u64,
    failures: u64,
    timeouts: u64,
    rejections: u64,
}

impl Bucket {
    fn new(started: Instant) -> Self {
        Self {
            started,
            successes: 0,
            failures: 0,
            timeouts: 0,
            rejections: 0,
        }
    }
}

/// Aggregated counts over the live window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowTotals {
    pub successes: u64,
    /// Failures, timeouts included.
    pub failures: u64,
    pub timeouts: u64,
    /// Calls denied while OPEN; not part of the ratio.
    pub rejections: u64,
}

impl WindowTotals {
    /// Completed calls that count toward the ratio.
    pub fn samples(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn failure_percentage(&self) -> f64 {
        match self.samples() {
            0 => 0.0,
            n => self.failures as f64 * 100.0 / n as f64,
        }
    }
}

/// Bucketed rolling window of call outcomes.
#[derive(Debug, Clone)]
pub struct BreakerStats {
    window: Duration,
    bucket_span: Duration,
    buckets: VecDeque<Bucket>,
}

impl BreakerStats {
    pub fn new(window: Duration, buckets: u32) -> Self {
        let mut stats = Self {
            window,
            bucket_span: window,
            buckets: VecDeque::new(),
        };
        stats.resize(window, buckets);
        stats
    }

    /// Change the window geometry. Existing buckets are kept and age out normally.
    pub fn resize(&mut self, window: Duration, buckets: u32) {
        self.window = window;
        self.bucket_span = (window / buckets.max(1)).max(Duration::from_millis(1));
    }

    pub fn record_success(&mut self, now: Instant) {
        self.current(now).successes += 1;
    }

    pub fn record_failure(&mut self, now: Instant, timed_out: bool) {
        let bucket = self.current(now);
        bucket.failures += 1;
        if timed_out {
            bucket.timeouts += 1;
        }
    }

    pub fn record_rejection(&mut self, now: Instant) {
        self.current(now).rejections += 1;
    }

    pub fn totals(&mut self, now: Instant) -> WindowTotals {
        self.evict(now);
        self.buckets.iter().fold(WindowTotals::default(), |acc, b| WindowTotals {
            successes: acc.successes + b.successes,
            failures: acc.failures + b.failures,
            timeouts: acc.timeouts + b.timeouts,
            rejections: acc.rejections + b.rejections,
        })
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if now.saturating_duration_since(front.started) >= self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn current(&mut self, now: Instant) -> &mut Bucket {
        self.evict(now);
        let needs_new = match self.buckets.back() {
            Some(back) => now.saturating_duration_since(back.started) >= self.bucket_span,
            None => true,
        };
        if needs_new {
            self.buckets.push_back(Bucket::new(now));
        }
        // A bucket was pushed above if the deque was empty.
        let len = self.buckets.len();
        &mut self.buckets[len - 1]
    }
}
