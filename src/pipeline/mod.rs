//! Downstream call pipelines.
//!
//! # Data Flow
//! ```text
//! Handler builds ServiceCallSpec
//!     → registry.rs (pipeline by target id or route prefix)
//!     → service.rs (retry → breaker → timeout)
//!     → transport.rs (HTTP or in-process collaborators)
//!     → JSON answer, fallback, or GatewayError
//! ```
//!
//! `faults.rs` decorates a transport with injected failures for tests.

pub mod call;
pub mod faults;
pub mod registry;
pub mod service;
pub mod transport;

pub use call::ServiceCallSpec;
pub use registry::PipelineRegistry;
pub use service::{Pipeline, PipelineSnapshot};
pub use transport::{HttpTransport, Transport};
