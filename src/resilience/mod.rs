//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a downstream target:
//!     → retries.rs (optional; bounded attempts, backoff, bail on terminal errors)
//!         → circuit_breaker.rs (admit / deny, account outcome in stats.rs)
//!             → timeouts.rs (deadline; cancel and drop late results)
//!                 → transport call
//! ```
//!
//! # Design Decisions
//! - One breaker per target, shared by every request
//! - Fail fast while OPEN; a single probe in HALF_OPEN
//! - Timeouts count as failures; client errors (4xx) do not
//! - The fallback is applied once, after retries are done

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod stats;
pub mod timeouts;

pub use circuit_breaker::{BreakerSettings, BreakerSnapshot, BreakerState, CircuitBreaker, Fallback};
pub use retries::{RetryExecutor, RetryPolicy};
pub use timeouts::TimeoutGuard;
