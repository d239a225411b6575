//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: target assumed down, calls fail fast
//! - Half-Open: a single probe decides whether the target recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: samples >= volume_threshold and failure % > error_threshold_percentage
//! Open → Half-Open: first call after reset_timeout (that call is the probe)
//! Half-Open → Closed: probe succeeds, stats reset
//! Half-Open → Open: probe fails, reset window restarts
//! ```
//!
//! One breaker per target. State and stats live behind one mutex that is
//! never held across an await. The embedded [`TimeoutGuard`] bounds each call.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::BreakerConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::resilience::stats::{BreakerStats, WindowTotals};
use crate::resilience::timeouts::TimeoutGuard;

/// Substitute result produced from the error that triggered it.
pub type Fallback<T> = Arc<dyn Fn(&GatewayError) -> T + Send + Sync>;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Thresholds and the per-call deadline. Swappable at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    pub error_threshold_percentage: f64,
    pub volume_threshold: u32,
    pub reset_timeout: Duration,
    pub rolling_window: Duration,
    pub rolling_buckets: u32,
    /// `None` disables the embedded timeout guard.
    pub timeout: Option<Duration>,
}

impl BreakerSettings {
    pub fn from_config(config: &BreakerConfig, timeout: Option<Duration>) -> Self {
        Self {
            error_threshold_percentage: config.error_threshold_percentage,
            volume_threshold: config.volume_threshold,
            reset_timeout: config.reset_timeout(),
            rolling_window: config.rolling_window(),
            rolling_buckets: config.rolling_buckets,
            timeout,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from_config(&BreakerConfig::default(), Some(Duration::from_secs(3)))
    }
}

/// Point-in-time view for admin endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub target: String,
    pub state: BreakerState,
    #[serde(flatten)]
    pub totals: WindowTotals,
    pub failure_percentage: f64,
    /// Milliseconds until a probe is allowed, when OPEN.
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    stats: BreakerStats,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

enum Outcome {
    Success,
    Failure { timed_out: bool },
    /// The target answered but the call was rejected (4xx).
    Ignored,
}

/// Per-target circuit breaker producing results of type `T`.
pub struct CircuitBreaker<T> {
    target: String,
    settings: ArcSwap<BreakerSettings>,
    inner: Mutex<BreakerInner>,
    fallback: Option<Fallback<T>>,
}

impl<T> CircuitBreaker<T> {
    pub fn new(target: impl Into<String>, settings: BreakerSettings) -> Self {
        let stats = BreakerStats::new(settings.rolling_window, settings.rolling_buckets);
        Self {
            target: target.into(),
            settings: ArcSwap::from_pointee(settings),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                stats,
                opened_at: None,
                probe_in_flight: false,
            }),
            fallback: None,
        }
    }

    /// Configure the substitute returned when a call is denied or fails.
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&GatewayError) -> T + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn settings(&self) -> Arc<BreakerSettings> {
        self.settings.load_full()
    }

    /// Swap thresholds in place; state and counts are kept.
    pub fn update_settings(&self, settings: BreakerSettings) {
        {
            let mut inner = self.lock();
            inner.stats.resize(settings.rolling_window, settings.rolling_buckets);
        }
        self.settings.store(Arc::new(settings));
    }

    /// Current state. OPEN stays OPEN here until a call claims the probe.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let settings = self.settings.load();
        let now = Instant::now();
        let mut inner = self.lock();
        let totals = inner.stats.totals(now);
        let retry_after_ms = match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(opened_at)) => Some(
                settings
                    .reset_timeout
                    .saturating_sub(now.saturating_duration_since(opened_at))
                    .as_millis() as u64,
            ),
            _ => None,
        };

        BreakerSnapshot {
            target: self.target.clone(),
            state: inner.state,
            totals,
            failure_percentage: totals.failure_percentage(),
            retry_after_ms,
        }
    }

    /// Call through the breaker, substituting the fallback on denial or failure.
    pub async fn fire<F, Fut>(&self, op: F) -> GatewayResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        match self.call(&CancellationToken::new(), op).await {
            Ok(value) => Ok(value),
            Err(err) => self.recover(err),
        }
    }

    /// Call through the breaker without applying the fallback.
    ///
    /// Used when an outer retry loop decides when the failure is final.
    pub async fn call<F, Fut>(&self, cancel: &CancellationToken, op: F) -> GatewayResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let settings = self.settings.load_full();
        let mut permit = self.acquire(&settings)?;

        let outcome = match settings.timeout {
            Some(deadline) => TimeoutGuard::new(self.target.clone(), deadline).run(cancel, op).await,
            None => op(cancel.child_token()).await,
        };

        permit.settled = true;
        let classified = match &outcome {
            Ok(_) => Outcome::Success,
            Err(err) if err.counts_as_failure() => Outcome::Failure {
                timed_out: matches!(err, GatewayError::Timeout { .. }),
            },
            Err(_) => Outcome::Ignored,
        };
        self.on_outcome(permit.probe, classified, &settings);

        outcome
    }

    /// Replace a final error with the fallback when one is configured.
    ///
    /// Only denials and counted failures are substituted; client errors
    /// (4xx, validation) always reach the caller.
    pub fn recover(&self, err: GatewayError) -> GatewayResult<T> {
        let substitutable = err.counts_as_failure() || matches!(err, GatewayError::CircuitOpen { .. });
        match &self.fallback {
            Some(fallback) if substitutable => {
                tracing::debug!(target_service = %self.target, error = %err, "Serving fallback");
                Ok(fallback(&err))
            }
            _ => Err(err),
        }
    }

    fn acquire(&self, settings: &BreakerSettings) -> GatewayResult<CallPermit<'_, T>> {
        let now = Instant::now();
        let mut inner = self.lock();

        let probe = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                if now.saturating_duration_since(opened_at) < settings.reset_timeout {
                    return Err(self.reject(&mut inner, now));
                }
                self.transition(&mut inner, BreakerState::HalfOpen);
                inner.probe_in_flight = true;
                true
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.reject(&mut inner, now));
                }
                inner.probe_in_flight = true;
                true
            }
        };

        Ok(CallPermit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    fn reject(&self, inner: &mut BreakerInner, now: Instant) -> GatewayError {
        inner.stats.record_rejection(now);
        metrics::record_breaker_rejection(&self.target);
        tracing::debug!(target_service = %self.target, state = inner.state.as_str(), "Call denied by breaker");
        GatewayError::CircuitOpen {
            target: self.target.clone(),
        }
    }

    fn on_outcome(&self, probe: bool, outcome: Outcome, settings: &BreakerSettings) {
        let now = Instant::now();
        let mut inner = self.lock();
        let probing = probe && inner.state == BreakerState::HalfOpen;
        if probe {
            inner.probe_in_flight = false;
        }

        match outcome {
            Outcome::Success | Outcome::Ignored if probing => {
                inner.stats.reset();
                inner.opened_at = None;
                self.transition(&mut inner, BreakerState::Closed);
            }
            Outcome::Success => inner.stats.record_success(now),
            Outcome::Ignored => {}
            Outcome::Failure { timed_out } => {
                inner.stats.record_failure(now, timed_out);
                if probing {
                    self.trip(&mut inner, now);
                } else if inner.state == BreakerState::Closed {
                    let totals = inner.stats.totals(now);
                    if totals.samples() >= settings.volume_threshold as u64
                        && totals.failure_percentage() > settings.error_threshold_percentage
                    {
                        self.trip(&mut inner, now);
                    }
                }
            }
        }
    }

    fn trip(&self, inner: &mut BreakerInner, now: Instant) {
        inner.opened_at = Some(now);
        self.transition(inner, BreakerState::Open);
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        metrics::record_breaker_transition(&self.target, from.as_str(), to.as_str());
        match to {
            BreakerState::Open => {
                tracing::warn!(target_service = %self.target, from = from.as_str(), "Circuit opened")
            }
            _ => tracing::info!(
                target_service = %self.target,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            ),
        }
    }

    fn release_abandoned_probe(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
        tracing::debug!(target_service = %self.target, "Probe abandoned before completion");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission ticket for one call. Frees the probe slot if the call is dropped mid-flight.
struct CallPermit<'a, T> {
    breaker: &'a CircuitBreaker<T>,
    probe: bool,
    settled: bool,
}

impl<T> Drop for CallPermit<'_, T> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_abandoned_probe();
        }
    }
}
