//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (x-request-id)
//!     → security::rate_limit (per-IP window)
//!     → orders.rs | proxy.rs | /health | admin
//!     → response.rs (GatewayError → status + JSON body)
//! ```

pub mod orders;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::ApiError;
pub use server::{AppState, HttpServer};
