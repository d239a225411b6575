//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, env overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → pipeline registry / rate limiter built once at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server applies thresholds in place (arc-swap), state is kept
//! ```

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BreakerConfig, CatalogItem, CollaboratorConfig, CollaboratorMode, FallbackKind,
    GatewayConfig, HealthConfig, ListenerConfig, OrchestrationConfig, ObservabilityConfig,
    RateLimitConfig, RetryConfig, SecurityConfig, ServiceConfig, ServicesConfig, TimeoutConfig,
};
