//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (fixed window per client IP)
//!     → 429 with Retry-After, or pass to routing
//! ```
//!
//! Request body size is capped by the HTTP layer (`security.max_body_size`).

pub mod rate_limit;

pub use rate_limit::{rate_limit_middleware, RateLimitDecision, RateLimiter};
