//! Resilience gateway library.
//!
//! Circuit breakers, retries, timeouts and rate limiting in front of the
//! payment, inventory and shipping services, plus the order saga that
//! sequences them.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod resilience;

// Workflows
pub mod orchestration;

// Cross-cutting concerns
pub mod admin;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
