//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! GET /health
//!     → probe.rs (one probe per service, in parallel)
//!     → TimeoutGuard per probe (health.probe_timeout_ms)
//!     → UP if every service answered, otherwise PARTIAL
//! ```

pub mod probe;

pub use probe::{HealthProbe, HealthReport, HealthStatus, ServiceHealth};
