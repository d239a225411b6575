//! Gateway error taxonomy.
//!
//! # Classification
//! ```text
//! Validation        → 400, never retried, never counted by breakers
//! Downstream (5xx)  → counted failure, retried
//! Downstream (4xx)  → target is alive: not counted, terminal for retries
//! Timeout           → counted failure, retried
//! CircuitOpen       → fallback if configured, else service unavailable
//! RateLimitExceeded → 429 at the boundary, no downstream call
//! WorkflowAbort     → saga stopped at `step`
//! ```

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::orchestration::types::WorkflowStep;

/// Errors surfaced by the resilience primitives, pipelines and the order workflow.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Malformed or missing input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A collaborator call failed. `status` is `None` for transport errors.
    #[error("{target} call failed: {message}")]
    Downstream {
        target: String,
        status: Option<u16>,
        message: String,
        body: Option<Value>,
    },

    /// The call did not complete before its deadline.
    #[error("{target} request timed out after {} ms", .after.as_millis())]
    Timeout { target: String, after: Duration },

    /// The breaker denied the call without invoking the target.
    #[error("Circuit breaker for {target} is open")]
    CircuitOpen { target: String },

    /// Caller exhausted its request budget for the current window.
    #[error("Rate limit exceeded for {key}")]
    RateLimitExceeded { key: String, retry_after: Duration },

    /// A required workflow step failed terminally.
    #[error("Order workflow aborted at {step}: {reason}")]
    WorkflowAbort {
        step: WorkflowStep,
        reason: String,
        status: u16,
        details: Value,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Build a downstream error from a transport failure (no HTTP status).
    pub fn transport(target: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Downstream {
            target: target.into(),
            status: None,
            message: message.into(),
            body: None,
        }
    }

    /// HTTP status returned by the collaborator, if any.
    pub fn downstream_status(&self) -> Option<u16> {
        match self {
            GatewayError::Downstream { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether this outcome is charged against the breaker failure ratio.
    pub fn counts_as_failure(&self) -> bool {
        match self {
            GatewayError::Downstream { status, .. } => !matches!(status, Some(s) if (400..500).contains(s)),
            GatewayError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Whether a retry executor must stop immediately on this error.
    pub fn is_terminal(&self) -> bool {
        match self {
            GatewayError::Downstream { .. } | GatewayError::Timeout { .. } => !self.counts_as_failure(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downstream(status: Option<u16>) -> GatewayError {
        GatewayError::Downstream {
            target: "inventory".into(),
            status,
            message: "boom".into(),
            body: None,
        }
    }

    #[test]
    fn test_failure_classification() {
        assert!(downstream(None).counts_as_failure());
        assert!(downstream(Some(503)).counts_as_failure());
        assert!(!downstream(Some(404)).counts_as_failure());
        assert!(GatewayError::Timeout { target: "payment".into(), after: Duration::from_secs(3) }.counts_as_failure());
        assert!(!GatewayError::Validation("missing items".into()).counts_as_failure());
        assert!(!GatewayError::CircuitOpen { target: "payment".into() }.counts_as_failure());
    }

    #[test]
    fn test_terminal_classification() {
        assert!(!downstream(Some(500)).is_terminal());
        assert!(downstream(Some(404)).is_terminal());
        assert!(GatewayError::CircuitOpen { target: "shipping".into() }.is_terminal());
        assert!(GatewayError::Validation("bad".into()).is_terminal());
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::Timeout { target: "payment".into(), after: Duration::from_millis(3000) };
        assert_eq!(err.to_string(), "payment request timed out after 3000 ms");

        let err = GatewayError::CircuitOpen { target: "shipping".into() };
        assert_eq!(err.to_string(), "Circuit breaker for shipping is open");
    }
}
